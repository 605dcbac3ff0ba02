/// file: src/pipeline.rs
/// description: End-to-end jobs shared by the CLI and the HTTP API.
/// Pipeline — wires a target source, a browser session, the batch runner and
/// the sinks together for one run, and the offline CSV publishing paths.
use crate::cleaner;
use crate::config::Config;
use crate::database::DbClient;
use crate::harvester::ScrollHarvester;
use crate::models::{AppError, CleanRow};
use crate::publisher::{DedupPublisher, DeltaMode, PublishReport, PublishingSink, RecordStore};
use crate::runner::{BatchRunner, RowSink, RunReport, TeeSink};
use crate::session::ChromiumSession;
use crate::staging::{self, CsvStagingSink};
use crate::targets::{self, TargetSource};
use std::path::Path;
use tracing::info;

/// Result of a run that stages and publishes.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub report: RunReport,
    pub published: usize,
}

impl ScrapeOutcome {
    pub fn message(&self) -> String {
        format!(
            "Harvested {} of {} targets, {} new connections",
            self.report.outcomes.len() - self.report.failed_targets(),
            self.report.outcomes.len(),
            self.published
        )
    }
}

pub fn delta_mode(cfg: &Config) -> DeltaMode {
    DeltaMode::from_clear_flag(cfg.publish.clear_delta)
}

/// One batch on a fresh browser session. The session is shut down on every
/// exit path.
pub async fn run_batch(
    cfg: &Config,
    source: &dyn TargetSource,
    sink: &mut dyn RowSink,
) -> Result<RunReport, AppError> {
    let targets = targets::load_targets(source, &cfg.batch.url_template).await?;
    if targets.is_empty() {
        return Err(AppError::BadRequest("no targets configured".to_string()));
    }

    let runner = BatchRunner::new(
        ScrollHarvester::new(cfg.harvest.clone()),
        cfg.batch.flush_every,
    );

    let mut session = ChromiumSession::launch(&cfg.session).await?;
    let result = runner.run(&mut session, &targets, sink).await;
    session.shutdown().await;
    result
}

/// Stage to the CSV file and publish every flush into the store.
pub async fn scrape_and_publish(cfg: &Config, db: &DbClient) -> Result<ScrapeOutcome, AppError> {
    let source = targets::source_for(&cfg.batch, db);
    let mut sink = TeeSink {
        first: CsvStagingSink::new(&cfg.batch.staging_csv_path),
        second: PublishingSink::new(DedupPublisher::new(db.clone(), delta_mode(cfg))),
    };

    let report = run_batch(cfg, source.as_ref(), &mut sink).await?;
    Ok(ScrapeOutcome {
        report,
        published: sink.second.published(),
    })
}

/// Stage to the CSV file only.
pub async fn stage_only(cfg: &Config, db: &DbClient) -> Result<RunReport, AppError> {
    let source = targets::source_for(&cfg.batch, db);
    let mut sink = CsvStagingSink::new(&cfg.batch.staging_csv_path);
    let report = run_batch(cfg, source.as_ref(), &mut sink).await?;
    info!(path = %sink.path().display(), rows = report.total_rows, "Staging file updated");
    Ok(report)
}

/// Clean a staging file and publish it.
pub async fn publish_staged<S: RecordStore>(
    path: &Path,
    store: S,
    mode: DeltaMode,
) -> Result<PublishReport, AppError> {
    let raw = staging::read_staged(path)?;
    let cleaned = cleaner::clean(&raw);
    info!(path = %path.display(), raw = raw.len(), cleaned = cleaned.len(), "Publishing staged rows");
    DedupPublisher::new(store, mode).publish(&cleaned).await
}

/// Publish an already-clean `[handle, company, date]` export.
pub async fn import_legacy<S: RecordStore>(
    path: &Path,
    store: S,
    mode: DeltaMode,
) -> Result<PublishReport, AppError> {
    let rows: Vec<CleanRow> = staging::read_legacy(path)?
        .into_iter()
        .filter(|r| !r.handle.is_empty() && !r.item.is_empty())
        .collect();
    info!(path = %path.display(), rows = rows.len(), "Importing legacy rows");
    DedupPublisher::new(store, mode).publish(&rows).await
}
