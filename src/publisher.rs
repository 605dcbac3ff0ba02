/// file: src/publisher.rs
/// description: Dedup against persisted (handle, item) keys and delta publishing.
/// Publisher — appends only never-seen `(handle, item)` pairs to the record
/// store, mirrors them into the delta view and flags the appended range as
/// new for auditing.
use crate::cleaner;
use crate::models::{AppError, CleanRow, RawRow, RecordKey, RowRange};
use crate::runner::RowSink;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// How the delta view is updated on each publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    Append,
    Replace,
}

impl DeltaMode {
    pub fn from_clear_flag(clear_delta: bool) -> Self {
        if clear_delta {
            DeltaMode::Replace
        } else {
            DeltaMode::Append
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read_all_keys(&self) -> Result<HashSet<RecordKey>, AppError>;

    /// Append in order, skipping keys another writer stored since the last
    /// read. Returns what was actually inserted.
    async fn append_rows(&self, rows: &[CleanRow]) -> Result<Appended, AppError>;

    async fn write_delta(&self, rows: &[CleanRow], mode: DeltaMode) -> Result<(), AppError>;

    async fn mark_range(&self, range: RowRange) -> Result<(), AppError>;
}

/// Rows an append inserted and the id range they landed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub range: RowRange,
    pub rows: Vec<CleanRow>,
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

/// Rows whose key is absent from `existing`, first occurrence wins within
/// the batch. Encounter order is kept.
pub fn select_new(rows: &[CleanRow], existing: &HashSet<RecordKey>) -> Vec<CleanRow> {
    let mut seen: HashSet<RecordKey> = HashSet::new();
    rows.iter()
        .filter(|row| {
            let key = row.key();
            !existing.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub received: usize,
    pub new_rows: Vec<CleanRow>,
    pub range: Option<RowRange>,
}

impl PublishReport {
    pub fn is_noop(&self) -> bool {
        self.new_rows.is_empty()
    }
}

pub struct DedupPublisher<S> {
    store: S,
    delta_mode: DeltaMode,
}

impl<S: RecordStore> DedupPublisher<S> {
    pub fn new(store: S, delta_mode: DeltaMode) -> Self {
        Self { store, delta_mode }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn publish(&self, rows: &[CleanRow]) -> Result<PublishReport, AppError> {
        self.publish_with_mode(rows, self.delta_mode).await
    }

    /// Publish with an explicit delta mode for this call.
    pub async fn publish_with_mode(
        &self,
        rows: &[CleanRow],
        delta_mode: DeltaMode,
    ) -> Result<PublishReport, AppError> {
        let existing = self.store.read_all_keys().await?;
        let candidates = select_new(rows, &existing);

        let noop = |new_rows: Vec<CleanRow>| PublishReport {
            received: rows.len(),
            new_rows,
            range: None,
        };

        if candidates.is_empty() {
            info!(received = rows.len(), "No new interests this run");
            return Ok(noop(candidates));
        }

        let Appended { range, rows: inserted } = self.store.append_rows(&candidates).await?;
        if inserted.len() < candidates.len() {
            warn!(
                candidates = candidates.len(),
                inserted = inserted.len(),
                "Some keys were stored concurrently; skipped"
            );
        }
        if inserted.is_empty() {
            return Ok(noop(inserted));
        }

        self.store.write_delta(&inserted, delta_mode).await?;
        self.store.mark_range(range).await?;

        info!(
            received = rows.len(),
            appended = inserted.len(),
            first_id = range.start,
            last_id = range.end,
            ?delta_mode,
            "Published new rows"
        );

        Ok(PublishReport {
            received: rows.len(),
            new_rows: inserted,
            range: Some(range),
        })
    }
}

// ---------------------------------------------------------------------------
// Sink adapter
// ---------------------------------------------------------------------------

/// Cleans each flushed batch and publishes it. Every flush is an independent
/// publish, so a store failure never touches rows published earlier.
///
/// One sink spans one run: in `Replace` mode the delta view is replaced by
/// the first publish that adds rows and appended to by later ones, so it
/// ends up holding the whole run's additions.
pub struct PublishingSink<S> {
    publisher: DedupPublisher<S>,
    published: usize,
    delta_started: bool,
}

impl<S: RecordStore> PublishingSink<S> {
    pub fn new(publisher: DedupPublisher<S>) -> Self {
        Self {
            publisher,
            published: 0,
            delta_started: false,
        }
    }

    fn delta_mode(&self) -> DeltaMode {
        if self.delta_started {
            DeltaMode::Append
        } else {
            self.publisher.delta_mode
        }
    }

    /// Rows newly persisted across all flushes so far.
    pub fn published(&self) -> usize {
        self.published
    }
}

#[async_trait]
impl<S: RecordStore> RowSink for PublishingSink<S> {
    async fn write_rows(&mut self, rows: &[RawRow]) -> Result<(), AppError> {
        let cleaned = cleaner::clean(rows);
        debug!(raw = rows.len(), cleaned = cleaned.len(), "Cleaned flushed rows");
        let report = self
            .publisher
            .publish_with_mode(&cleaned, self.delta_mode())
            .await?;
        if !report.is_noop() {
            self.delta_started = true;
        }
        self.published += report.new_rows.len();
        Ok(())
    }
}
