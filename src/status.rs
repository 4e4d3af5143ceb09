//! Per-item download status and the `status.csv` summaries written next to
//! each document stage's output.

use crate::error::Result;
use crate::records::{count_rows, write_csv};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of one item of a document stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Output file holds at least one document
    Success,
    /// Output file exists with a header only
    Empty,
    /// Attempted and no output was written
    Fail,
    NotStarted,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Fail => "fail",
            Self::NotStarted => "not_started",
        };
        f.write_str(s)
    }
}

/// Status derived from the output file alone.
pub fn probe(output: &Path) -> DownloadStatus {
    if !output.exists() {
        return DownloadStatus::NotStarted;
    }
    match count_rows(output) {
        Ok(0) => DownloadStatus::Empty,
        Ok(_) => DownloadStatus::Success,
        Err(e) => {
            warn!(path = %output.display(), error = %e, "Unreadable output file");
            DownloadStatus::Fail
        }
    }
}

/// Tracks items that failed during the current run.
#[derive(Debug, Default)]
pub struct RunStatus {
    failed: HashSet<String>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_failed(&mut self, key: impl Into<String>) {
        self.failed.insert(key.into());
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// File status, with `NotStarted` upgraded to `Fail` for items that failed this run.
    pub fn resolve(&self, key: &str, output: &Path) -> DownloadStatus {
        match probe(output) {
            DownloadStatus::NotStarted if self.failed.contains(key) => DownloadStatus::Fail,
            other => other,
        }
    }
}

/// Counters a document stage reports when it finishes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageSummary {
    /// Items the stage considered
    pub items: usize,
    /// Items whose output already existed
    pub skipped: usize,
    /// Output files written this run
    pub downloaded: usize,
    pub failed: usize,
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items: {} downloaded, {} skipped, {} failed",
            self.items, self.downloaded, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Serialize)]
struct CitedStatusRow<'a> {
    #[serde(rename = "EID")]
    eid: &'a str,
    #[serde(rename = "Status")]
    status: DownloadStatus,
}

#[derive(Debug, Serialize)]
struct PairStatusRow<'a> {
    #[serde(rename = "CitedEID")]
    cited_eid: &'a str,
    #[serde(rename = "MiscitedEID")]
    miscited_eid: &'a str,
    #[serde(rename = "Status")]
    status: DownloadStatus,
}

#[derive(Debug, Serialize)]
struct CitingStatusRow<'a> {
    #[serde(rename = "CitingEID")]
    citing_eid: &'a str,
    #[serde(rename = "Status")]
    status: DownloadStatus,
}

/// `EID,Status` summary for single-key stages.
pub fn write_single(path: &Path, items: &[(String, DownloadStatus)]) -> Result<()> {
    let rows: Vec<CitedStatusRow> = items
        .iter()
        .map(|(eid, status)| CitedStatusRow {
            eid,
            status: *status,
        })
        .collect();
    write_csv(path, &["EID", "Status"], &rows)?;
    info!(path = %path.display(), entries = rows.len(), "Wrote status.csv");
    Ok(())
}

/// `CitedEID,MiscitedEID,Status` summary for the citing stage.
pub fn write_pairs(path: &Path, items: &[(String, String, DownloadStatus)]) -> Result<()> {
    let rows: Vec<PairStatusRow> = items
        .iter()
        .map(|(cited, miscited, status)| PairStatusRow {
            cited_eid: cited,
            miscited_eid: miscited,
            status: *status,
        })
        .collect();
    write_csv(path, &["CitedEID", "MiscitedEID", "Status"], &rows)?;
    info!(path = %path.display(), entries = rows.len(), "Wrote status.csv");
    Ok(())
}

/// `CitingEID,Status` summary for the reference stage.
pub fn write_citing(path: &Path, items: &[(String, DownloadStatus)]) -> Result<()> {
    let rows: Vec<CitingStatusRow> = items
        .iter()
        .map(|(eid, status)| CitingStatusRow {
            citing_eid: eid,
            status: *status,
        })
        .collect();
    write_csv(path, &["CitingEID", "Status"], &rows)?;
    info!(path = %path.display(), entries = rows.len(), "Wrote status.csv");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_states() -> Result<()> {
        let dir = TempDir::new()?;
        let missing = dir.path().join("missing.csv");
        let empty = dir.path().join("empty.csv");
        let full = dir.path().join("full.csv");
        std::fs::write(&empty, "EID,Title,Link\n")?;
        std::fs::write(&full, "EID,Title,Link\n2-s2.0-1,T,L\n")?;

        assert_eq!(probe(&missing), DownloadStatus::NotStarted);
        assert_eq!(probe(&empty), DownloadStatus::Empty);
        assert_eq!(probe(&full), DownloadStatus::Success);

        let mut run = RunStatus::new();
        run.mark_failed("missing");
        assert_eq!(run.resolve("missing", &missing), DownloadStatus::Fail);
        assert_eq!(run.resolve("other", &missing), DownloadStatus::NotStarted);
        assert_eq!(run.failed_count(), 1);
        Ok(())
    }

    #[test]
    fn test_write_pairs() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("status.csv");
        write_pairs(
            &path,
            &[
                ("C1".to_string(), "M1".to_string(), DownloadStatus::Success),
                ("C1".to_string(), "M2".to_string(), DownloadStatus::NotStarted),
            ],
        )?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(
            text,
            "CitedEID,MiscitedEID,Status\nC1,M1,success\nC1,M2,not_started\n"
        );
        Ok(())
    }
}
