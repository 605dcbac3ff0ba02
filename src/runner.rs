/// file: src/runner.rs
/// description: Sequential batch over targets with threshold and final flushes.
/// Batch runner — harvests each target in turn on one exclusive session,
/// buffers the raw rows and hands them to a `RowSink` in flush-sized chunks.
///
/// A target that cannot be loaded or never shows its list is recorded as a
/// zero-row outcome. Any other error stops the batch, but only after the rows
/// already buffered have been flushed.
use crate::harvester::{HarvestState, ScrollHarvester, Termination};
use crate::models::{AppError, RawRow, Target};
use crate::session::PageSession;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination of flushed raw rows.
#[async_trait]
pub trait RowSink: Send {
    async fn write_rows(&mut self, rows: &[RawRow]) -> Result<(), AppError>;
}

/// Writes every flush to `first`, then to `second`.
pub struct TeeSink<A, B> {
    pub first: A,
    pub second: B,
}

#[async_trait]
impl<A: RowSink, B: RowSink> RowSink for TeeSink<A, B> {
    async fn write_rows(&mut self, rows: &[RawRow]) -> Result<(), AppError> {
        self.first.write_rows(rows).await?;
        self.second.write_rows(rows).await
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub handle: String,
    pub url: String,
    pub rows: usize,
    pub state: HarvestState,
    pub termination: Option<Termination>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub total_rows: usize,
    pub flushes: usize,
    pub outcomes: Vec<TargetOutcome>,
}

impl RunReport {
    pub fn failed_targets(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == HarvestState::Failed)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct BatchRunner {
    harvester: ScrollHarvester,
    flush_every: usize,
}

impl BatchRunner {
    pub fn new(harvester: ScrollHarvester, flush_every: usize) -> Self {
        Self {
            harvester,
            flush_every: flush_every.max(1),
        }
    }

    pub async fn run<S, K>(
        &self,
        session: &mut S,
        targets: &[Target],
        sink: &mut K,
    ) -> Result<RunReport, AppError>
    where
        S: PageSession + ?Sized,
        K: RowSink + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch_run", %run_id, targets = targets.len());
        self.run_inner(run_id, session, targets, sink)
            .instrument(span)
            .await
    }

    async fn run_inner<S, K>(
        &self,
        run_id: Uuid,
        session: &mut S,
        targets: &[Target],
        sink: &mut K,
    ) -> Result<RunReport, AppError>
    where
        S: PageSession + ?Sized,
        K: RowSink + ?Sized,
    {
        let run_date = Local::now().date_naive();
        let mut buffer: Vec<RawRow> = Vec::new();
        let mut report = RunReport {
            run_id,
            run_date,
            total_rows: 0,
            flushes: 0,
            outcomes: Vec::with_capacity(targets.len()),
        };

        info!(flush_every = self.flush_every, "Batch started");

        let mut fatal: Option<AppError> = None;
        for (i, target) in targets.iter().enumerate() {
            let outcome = match self.harvester.harvest(&mut *session, &target.url).await {
                Ok(harvest) => {
                    let rows = harvest.texts.len();
                    debug!(
                        handle = %target.handle,
                        rows,
                        items = harvest.item_count,
                        cycles = harvest.cycles,
                        "Target harvested"
                    );
                    buffer.extend(harvest.texts.into_iter().map(|text| RawRow {
                        source_url: target.url.clone(),
                        text,
                        date: run_date,
                    }));
                    TargetOutcome {
                        handle: target.handle.clone(),
                        url: target.url.clone(),
                        rows,
                        state: HarvestState::Done,
                        termination: Some(harvest.termination),
                        error: None,
                    }
                }
                Err(e) if e.is_target_failure() => {
                    warn!(handle = %target.handle, url = %target.url, error = %e, "Target skipped");
                    TargetOutcome {
                        handle: target.handle.clone(),
                        url: target.url.clone(),
                        rows: 0,
                        state: HarvestState::Failed,
                        termination: None,
                        error: Some(e.to_string()),
                    }
                }
                Err(e) => {
                    error!(handle = %target.handle, index = i, error = %e, "Batch aborted");
                    fatal = Some(e);
                    break;
                }
            };

            report.total_rows += outcome.rows;
            report.outcomes.push(outcome);

            if buffer.len() >= self.flush_every
                && let Err(e) = flush(&mut *sink, &mut buffer, &mut report.flushes).await
            {
                error!(error = %e, "Flush failed; stopping batch");
                fatal = Some(e);
                break;
            }
        }

        // Final flush runs on every exit path.
        if let Err(e) = flush(&mut *sink, &mut buffer, &mut report.flushes).await {
            match &fatal {
                Some(_) => error!(error = %e, pending = buffer.len(), "Final flush failed"),
                None => return Err(e),
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            total_rows = report.total_rows,
            failed_targets = report.failed_targets(),
            flushes = report.flushes,
            "Batch finished"
        );
        Ok(report)
    }
}

/// Writes the buffer to the sink. The buffer is only cleared on success.
async fn flush<K>(
    sink: &mut K,
    buffer: &mut Vec<RawRow>,
    flushes: &mut usize,
) -> Result<(), AppError>
where
    K: RowSink + ?Sized,
{
    if buffer.is_empty() {
        return Ok(());
    }
    sink.write_rows(buffer).await?;
    info!(rows = buffer.len(), "Flushed rows");
    buffer.clear();
    *flushes += 1;
    Ok(())
}
