/// file: src/cleaner.rs
/// description: Pure RawRow -> CleanRow normalization.
use crate::models::{CleanRow, RawRow};
use regex::Regex;
use std::sync::LazyLock;

static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/in/([^/]+)/").expect("handle regex is valid"));

/// Marker of the follower-count line interleaved with real interests.
const FOLLOWER_MARKER: &str = "followers";

/// Short profile identifier in `url`, or the whole URL when there is none.
pub fn extract_handle(url: &str) -> String {
    HANDLE_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| url.to_string())
}

/// Item name of a scraped text, or `None` when the row is metadata noise.
///
/// Text nodes sometimes concatenate a title and a caption; only the first
/// line is the item.
pub fn clean_item(text: &str) -> Option<String> {
    if text.to_lowercase().contains(FOLLOWER_MARKER) {
        return None;
    }
    let item = text.trim().lines().next().unwrap_or_default().trim();
    (!item.is_empty()).then(|| item.to_string())
}

pub fn clean(raw: &[RawRow]) -> Vec<CleanRow> {
    raw.iter()
        .filter_map(|row| {
            clean_item(&row.text).map(|item| CleanRow {
                handle: extract_handle(&row.source_url),
                item,
                date: row.date,
            })
        })
        .collect()
}
