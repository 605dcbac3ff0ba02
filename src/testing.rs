/// file: src/testing.rs
/// description: Scripted in-memory fakes for the session, store and sink seams.
use crate::config::HarvestConfig;
use crate::models::{AppError, CleanRow, RawRow, RecordKey, RowRange};
use crate::publisher::{Appended, DeltaMode, RecordStore};
use crate::runner::RowSink;
use crate::session::PageSession;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub fn test_harvest_config() -> HarvestConfig {
    HarvestConfig {
        loader_selector: None,
        item_wait_timeout: Duration::from_millis(20),
        settle: Duration::ZERO,
        stall_limit: 3,
        max_scrolls: 40,
        ..HarvestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Item count as a function of scrolls performed on the current page.
#[derive(Debug, Clone)]
pub enum CountScript {
    Constant(usize),
    Growing { start: usize },
    /// Indexed by scroll count; the last value repeats.
    Sequence(Vec<usize>),
}

impl CountScript {
    fn at(&self, scrolls: u32) -> usize {
        match self {
            CountScript::Constant(n) => *n,
            CountScript::Growing { start } => start + scrolls as usize,
            CountScript::Sequence(seq) => {
                let i = (scrolls as usize).min(seq.len().saturating_sub(1));
                seq.get(i).copied().unwrap_or(0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FakeFailure {
    Navigation,
    SelectorTimeout,
    /// Any DOM call on this page fails; not a per-target error.
    BrowserCrash,
    /// Scrolls beyond this many fail.
    ScrollAfter(u32),
    /// The list attaches but its texts cannot be read.
    TextsUnreadable,
}

#[derive(Debug, Clone)]
pub struct FakePage {
    counts: CountScript,
    failure: Option<FakeFailure>,
    /// Loader selector and its match count, indexed by polls since the
    /// last load or scroll.
    loader: Option<(String, CountScript)>,
}

impl FakePage {
    pub fn new(counts: CountScript) -> Self {
        Self {
            counts,
            failure: None,
            loader: None,
        }
    }

    pub fn failing(mut self, failure: FakeFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_loader(mut self, selector: &str, counts: CountScript) -> Self {
        self.loader = Some((selector.to_string(), counts));
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeSession {
    pages: HashMap<String, FakePage>,
    current: Option<FakePage>,
    page_scrolls: u32,
    loader_polls: u32,
    pub loads: Vec<String>,
    pub loader_checks: u32,
    pub scroll_calls: u32,
    pub text_reads: u32,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, page: FakePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    fn page(&self) -> Result<&FakePage, AppError> {
        let page = self
            .current
            .as_ref()
            .ok_or_else(|| AppError::Browser("no page loaded".into()))?;
        if matches!(page.failure, Some(FakeFailure::BrowserCrash)) {
            return Err(AppError::Browser("target crashed".into()));
        }
        Ok(page)
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn load(&mut self, url: &str) -> Result<(), AppError> {
        self.loads.push(url.to_string());
        self.page_scrolls = 0;
        self.loader_polls = 0;
        self.current = self.pages.get(url).cloned();
        match self.current.as_ref().and_then(|p| p.failure) {
            Some(FakeFailure::Navigation) => Err(AppError::Navigation {
                url: url.to_string(),
                reason: "timed out".into(),
            }),
            _ if self.current.is_none() => Err(AppError::Navigation {
                url: url.to_string(),
                reason: "unknown page".into(),
            }),
            _ => Ok(()),
        }
    }

    async fn wait_for_any_item(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AppError> {
        let page = self.page()?;
        if matches!(page.failure, Some(FakeFailure::SelectorTimeout))
            || page.counts.at(0) == 0
        {
            return Err(AppError::SelectorTimeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn count_items(&mut self, selector: &str) -> Result<usize, AppError> {
        let (scrolls, polls) = (self.page_scrolls, self.loader_polls);
        let page = self.page()?;
        let loader_count = match &page.loader {
            Some((loader, script)) if loader == selector => Some(script.at(polls)),
            _ => None,
        };
        let item_count = page.counts.at(scrolls);
        match loader_count {
            Some(n) => {
                self.loader_polls += 1;
                self.loader_checks += 1;
                Ok(n)
            }
            None => Ok(item_count),
        }
    }

    async fn read_item_texts(&mut self, _selector: &str) -> Result<Vec<String>, AppError> {
        self.text_reads += 1;
        if matches!(self.page()?.failure, Some(FakeFailure::TextsUnreadable)) {
            return Err(AppError::Browser("text extraction failed".into()));
        }
        let n = self.count_items("").await?;
        Ok((0..n).map(|i| format!("Company {i}")).collect())
    }

    async fn scroll_one_viewport(&mut self, _anchor_selector: &str) -> Result<(), AppError> {
        self.scroll_calls += 1;
        let failure = self.page()?.failure;
        if let Some(FakeFailure::ScrollAfter(n)) = failure
            && self.page_scrolls >= n
        {
            return Err(AppError::Browser("scroll script failed".into()));
        }
        self.page_scrolls += 1;
        self.loader_polls = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub rows: tokio::sync::Mutex<Vec<CleanRow>>,
    pub delta: tokio::sync::Mutex<Vec<CleanRow>>,
    pub marked: tokio::sync::Mutex<Vec<RowRange>>,
    pub fail_appends: bool,
    /// Keys another writer stores between the key read and the append.
    pub concurrent_keys: HashSet<RecordKey>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read_all_keys(&self) -> Result<HashSet<RecordKey>, AppError> {
        Ok(self.rows.lock().await.iter().map(CleanRow::key).collect())
    }

    async fn append_rows(&self, rows: &[CleanRow]) -> Result<Appended, AppError> {
        if self.fail_appends {
            return Err(AppError::Io(std::io::Error::other("store offline")));
        }
        let inserted: Vec<CleanRow> = rows
            .iter()
            .filter(|r| !self.concurrent_keys.contains(&r.key()))
            .cloned()
            .collect();
        let mut stored = self.rows.lock().await;
        let start = stored.len() as i64 + 1;
        stored.extend_from_slice(&inserted);
        let range = if inserted.is_empty() {
            RowRange { start: 0, end: -1 }
        } else {
            RowRange {
                start,
                end: stored.len() as i64,
            }
        };
        Ok(Appended {
            range,
            rows: inserted,
        })
    }

    async fn write_delta(&self, rows: &[CleanRow], mode: DeltaMode) -> Result<(), AppError> {
        let mut delta = self.delta.lock().await;
        if mode == DeltaMode::Replace {
            delta.clear();
        }
        delta.extend_from_slice(rows);
        Ok(())
    }

    async fn mark_range(&self, range: RowRange) -> Result<(), AppError> {
        self.marked.lock().await.push(range);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySink {
    pub flushes: Vec<Vec<RawRow>>,
}

impl MemorySink {
    pub fn rows(&self) -> Vec<RawRow> {
        self.flushes.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn write_rows(&mut self, rows: &[RawRow]) -> Result<(), AppError> {
        self.flushes.push(rows.to_vec());
        Ok(())
    }
}
