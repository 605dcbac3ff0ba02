/// file: src/models.rs
/// description: Domain rows, HTTP request/response shapes, and AppError mapping.
/// Domain types shared by the harvester, the cleaner, the publisher and the
/// HTTP surface.
///
/// Column order of the serde structs is part of the on-disk contract: staging
/// files are `[source_url, name, run_date]`, persisted rows are
/// `[handle, company, date]`.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AppError {
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("no element matching `{selector}` attached within {timeout_ms} ms")]
    SelectorTimeout { selector: String, timeout_ms: u64 },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("a scrape run is already in progress")]
    Busy,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Failures scoped to a single target. The batch logs them and moves on.
    pub fn is_target_failure(&self) -> bool {
        matches!(
            self,
            AppError::Navigation { .. } | AppError::SelectorTimeout { .. }
        )
    }

    /// Store read/write failures.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::Pool(_) | AppError::Postgres(_) | AppError::Csv(_) | AppError::Io(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) | AppError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            AppError::Busy => StatusCode::CONFLICT,
            AppError::Navigation { .. } | AppError::SelectorTimeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        #[derive(Serialize)]
        struct Body {
            status: &'static str,
            message: String,
        }

        (
            status,
            Json(Body {
                status: "error",
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// One profile to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub handle: String,
    pub url: String,
}

impl Target {
    /// Builds the navigable URL by substituting `handle` into `template`.
    pub fn from_handle(handle: &str, template: &str) -> Result<Self, AppError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(AppError::BadRequest("empty handle".to_string()));
        }
        let url = url::Url::parse(&template.replacen("{}", handle, 1))?;
        Ok(Self {
            handle: handle.to_string(),
            url: url.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One scraped DOM text, as staged on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub source_url: String,
    #[serde(rename = "name")]
    pub text: String,
    #[serde(rename = "run_date")]
    pub date: NaiveDate,
}

/// A normalized row ready for publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanRow {
    pub handle: String,
    #[serde(rename = "company")]
    pub item: String,
    pub date: NaiveDate,
}

impl CleanRow {
    pub fn key(&self) -> RecordKey {
        (self.handle.clone(), self.item.clone())
    }
}

/// Dedup key of the persisted store.
pub type RecordKey = (String, String);

/// A persisted `(handle, item)` pair and the date it was first seen.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedRecord {
    pub handle: String,
    pub company: String,
    pub date_scraped: NaiveDate,
    pub is_new: bool,
}

/// Inclusive range of persisted row ids written by one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: i64,
    pub end: i64,
}

impl RowRange {
    pub fn len(&self) -> usize {
        (self.end - self.start + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

// ---------------------------------------------------------------------------
// HTTP request shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsQuery {
    #[serde(default)]
    pub handle: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ScrapeSummary {
    pub status: String,
    pub message: String,
    pub data_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<PersistedRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
