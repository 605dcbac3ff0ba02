/// file: src/staging.rs
/// description: Append-only staging CSV of raw rows and CSV readers for offline publishing.
use crate::models::{AppError, CleanRow, RawRow};
use crate::runner::RowSink;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STAGING_HEADER: [&str; 3] = ["source_url", "name", "run_date"];

/// Appends each flush to a CSV file; the header is written only when the
/// file is new or empty.
pub struct CsvStagingSink {
    path: PathBuf,
}

impl CsvStagingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, rows: &[RawRow]) -> Result<(), AppError> {
        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut w = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if size == 0 {
            w.write_record(STAGING_HEADER)?;
        }
        for row in rows {
            w.serialize(row)?;
        }
        w.flush()?;
        Ok(())
    }
}

#[async_trait]
impl RowSink for CsvStagingSink {
    async fn write_rows(&mut self, rows: &[RawRow]) -> Result<(), AppError> {
        self.append(rows)?;
        debug!(path = %self.path.display(), rows = rows.len(), "Staged rows");
        Ok(())
    }
}

/// Reads a staging file back in row order.
pub fn read_staged(path: &Path) -> Result<Vec<RawRow>, AppError> {
    let mut rdr = csv::Reader::from_path(path)?;
    rdr.deserialize()
        .map(|r| r.map_err(AppError::from))
        .collect()
}

/// Reads a `[handle, company, date]` file, as written by earlier exports.
pub fn read_legacy(path: &Path) -> Result<Vec<CleanRow>, AppError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    rdr.deserialize()
        .map(|r| r.map_err(AppError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(text: &str) -> RawRow {
        RawRow {
            source_url: "https://x/in/abc/details/interests/".into(),
            text: text.into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn header_is_written_once_across_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interests.csv");
        let mut sink = CsvStagingSink::new(&path);

        sink.write_rows(&[raw("Acme")]).await.unwrap();
        sink.write_rows(&[raw("Globex\nSoftware"), raw("Initech")]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("source_url,name,run_date\n"));
        assert_eq!(contents.matches("source_url,name,run_date").count(), 1);

        let rows = read_staged(&path).unwrap();
        assert_eq!(rows, vec![raw("Acme"), raw("Globex\nSoftware"), raw("Initech")]);
    }

    #[tokio::test]
    async fn empty_existing_file_gets_a_header() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut sink = CsvStagingSink::new(file.path());

        sink.write_rows(&[raw("Acme")]).await.unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            contents,
            "source_url,name,run_date\nhttps://x/in/abc/details/interests/,Acme,2025-06-01\n"
        );
    }

    #[test]
    fn reads_legacy_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.csv");
        std::fs::write(&path, "handle,company,date\nabc, Acme Corp ,2024-11-05\n").unwrap();

        let rows = read_legacy(&path).unwrap();

        assert_eq!(
            rows,
            vec![CleanRow {
                handle: "abc".into(),
                item: "Acme Corp".into(),
                date: NaiveDate::from_ymd_opt(2024, 11, 5).unwrap(),
            }]
        );
    }

    #[test]
    fn missing_staging_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_staged(&dir.path().join("nope.csv")).unwrap_err();
        assert!(err.is_persistence());
    }
}
