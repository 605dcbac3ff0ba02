/// file: src/targets.rs
/// description: Target list sources (handle file or the handles table).
use crate::config::BatchConfig;
use crate::database::DbClient;
use crate::models::{AppError, Target};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Profile handles in batch order.
    async fn handles(&self) -> Result<Vec<String>, AppError>;
}

/// One handle per line; only the first comma-separated column is read.
/// Blank lines, `#` comments and a `handle` header are skipped.
pub struct HandleFile {
    path: PathBuf,
}

impl HandleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub fn parse_handles(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split(',').next())
        .map(|h| h.trim().trim_matches('"').to_string())
        .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case("handle"))
        .collect()
}

#[async_trait]
impl TargetSource for HandleFile {
    async fn handles(&self) -> Result<Vec<String>, AppError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(parse_handles(&contents))
    }
}

#[async_trait]
impl TargetSource for DbClient {
    async fn handles(&self) -> Result<Vec<String>, AppError> {
        self.fetch_handles().await
    }
}

/// File source when `TARGETS_FILE` is set, otherwise the database.
pub fn source_for(cfg: &BatchConfig, db: &DbClient) -> Box<dyn TargetSource> {
    match &cfg.targets_file {
        Some(path) => Box::new(HandleFile::new(path.clone())),
        None => Box::new(db.clone()),
    }
}

/// Loads the handles and turns them into targets. Repeated handles are
/// dropped, invalid ones are logged and skipped.
pub async fn load_targets(
    source: &dyn TargetSource,
    url_template: &str,
) -> Result<Vec<Target>, AppError> {
    let handles = source.handles().await?;
    Ok(build_targets(&handles, url_template))
}

pub fn build_targets(handles: &[String], url_template: &str) -> Vec<Target> {
    let mut seen = HashSet::new();
    let targets: Vec<Target> = handles
        .iter()
        .filter(|h| seen.insert(h.as_str()))
        .filter_map(|h| match Target::from_handle(h, url_template) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(handle = %h, error = %e, "Skipping invalid handle");
                None
            }
        })
        .collect();
    info!(targets = targets.len(), "Targets loaded");
    targets
}
