//! Flat record types exchanged between stages, and the CSV helpers that read
//! and write them.
//!
//! Every stage hands off through CSV files; column names here are the
//! on-disk contract between stages.

use crate::config::record_link;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Title recorded when the JSON endpoint answered without any title
pub const TITLE_NOT_FOUND: &str = "Title not found";

/// Title recorded when the document does not exist
pub const TITLE_404: &str = "404 Not Found";

/// Title recorded when every attempt failed
pub const TITLE_ERROR: &str = "Error";

/// Row of the input identifier list (`eid.csv`). Extra columns are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct EidRow {
    #[serde(rename = "EID")]
    pub eid: String,
}

/// Row of `eid_with_titles.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRecord {
    #[serde(rename = "EID")]
    pub eid: String,
    #[serde(rename = "Title", default)]
    pub title: String,
}

impl TitleRecord {
    /// A title that does not need fetching again: non-empty and not `Error`.
    pub fn is_resolved(&self) -> bool {
        !self.title.trim().is_empty() && self.title != TITLE_ERROR
    }

    /// A title that can drive a secondary-document search.
    pub fn is_searchable(&self) -> bool {
        self.is_resolved() && self.title != TITLE_404 && self.title != TITLE_NOT_FOUND
    }
}

/// Document row shared by the miscited, citing and reference files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "EID", default)]
    pub eid: String,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Link", default)]
    pub link: String,
}

impl DocumentRecord {
    /// Record with the canonical record-page link.
    pub fn new(eid: impl Into<String>, title: impl Into<String>) -> Self {
        let eid = eid.into();
        Self {
            link: record_link(&eid),
            title: title.into(),
            eid,
        }
    }

    /// Stored link, falling back to the canonical one.
    pub fn link_or_canonical(&self) -> String {
        if self.link.trim().is_empty() {
            record_link(self.eid.trim())
        } else {
            self.link.trim().to_string()
        }
    }
}

/// Column order of every combined miscitation table
pub const MISCITATION_COLUMNS: &[&str] = &[
    "Cited Article Title",
    "Cited Article EID",
    "Cited Article Link",
    "Miscited Article Title",
    "Miscited Article EID",
    "Miscited Article Link",
    "Citing Article Title",
    "Citing Article EID",
    "Citing Article Link",
];

/// One (cited, miscited, citing) path of the three-tier tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiscitationRow {
    #[serde(rename = "Cited Article Title", default)]
    pub cited_title: String,
    #[serde(rename = "Cited Article EID", default)]
    pub cited_eid: String,
    #[serde(rename = "Cited Article Link", default)]
    pub cited_link: String,
    #[serde(rename = "Miscited Article Title", default)]
    pub miscited_title: String,
    #[serde(rename = "Miscited Article EID", default)]
    pub miscited_eid: String,
    #[serde(rename = "Miscited Article Link", default)]
    pub miscited_link: String,
    #[serde(rename = "Citing Article Title", default)]
    pub citing_title: String,
    #[serde(rename = "Citing Article EID", default)]
    pub citing_eid: String,
    #[serde(rename = "Citing Article Link", default)]
    pub citing_link: String,
}

impl MiscitationRow {
    /// All three identifiers and titles are present.
    pub fn is_complete(&self) -> bool {
        [
            &self.cited_eid,
            &self.cited_title,
            &self.miscited_eid,
            &self.miscited_title,
            &self.citing_eid,
            &self.citing_title,
        ]
        .iter()
        .all(|v| !v.trim().is_empty())
    }
}

/// Miscitation row flagged by a filter rule, with the rule name in `Reason`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedRow {
    #[serde(rename = "Cited Article Title")]
    pub cited_title: String,
    #[serde(rename = "Cited Article EID")]
    pub cited_eid: String,
    #[serde(rename = "Cited Article Link")]
    pub cited_link: String,
    #[serde(rename = "Miscited Article Title")]
    pub miscited_title: String,
    #[serde(rename = "Miscited Article EID")]
    pub miscited_eid: String,
    #[serde(rename = "Miscited Article Link")]
    pub miscited_link: String,
    #[serde(rename = "Citing Article Title")]
    pub citing_title: String,
    #[serde(rename = "Citing Article EID")]
    pub citing_eid: String,
    #[serde(rename = "Citing Article Link")]
    pub citing_link: String,
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl FlaggedRow {
    pub fn new(row: MiscitationRow, reason: &str) -> Self {
        Self {
            cited_title: row.cited_title,
            cited_eid: row.cited_eid,
            cited_link: row.cited_link,
            miscited_title: row.miscited_title,
            miscited_eid: row.miscited_eid,
            miscited_link: row.miscited_link,
            citing_title: row.citing_title,
            citing_eid: row.citing_eid,
            citing_link: row.citing_link,
            reason: reason.to_string(),
        }
    }
}

/// Row of `overall_references_of_citing.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    #[serde(rename = "Citing Article Title")]
    pub citing_title: String,
    #[serde(rename = "Citing Article EID")]
    pub citing_eid: String,
    #[serde(rename = "Citing Article Link")]
    pub citing_link: String,
    #[serde(rename = "Reference Title")]
    pub reference_title: String,
    #[serde(rename = "Reference EID")]
    pub reference_eid: String,
    #[serde(rename = "Reference Link")]
    pub reference_link: String,
}

/// Read every record of a headed CSV file.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        rows.push(record?);
    }
    debug!(path = %path.display(), rows = rows.len(), "Read CSV");
    Ok(rows)
}

/// Number of data rows (header excluded) in a CSV file.
pub fn count_rows(path: &Path) -> Result<usize> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut count = 0;
    for record in rdr.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Write records to `path` with the given header, replacing it atomically.
///
/// The header is always written, so an empty slice yields a header-only file.
/// Data goes to a sibling `.part` file that is renamed into place, so a file
/// under its final name is always complete.
pub fn write_csv<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = part_path(path);
    {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        wtr.write_record(headers)?;
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote CSV");
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Column order of every document file
pub const DOCUMENT_COLUMNS: &[&str] = &["EID", "Title", "Link"];

/// Column order of `eid_with_titles.csv`
pub const TITLE_COLUMNS: &[&str] = &["EID", "Title"];

/// Column order of the flagged tables
pub const FLAGGED_COLUMNS: &[&str] = &[
    "Cited Article Title",
    "Cited Article EID",
    "Cited Article Link",
    "Miscited Article Title",
    "Miscited Article EID",
    "Miscited Article Link",
    "Citing Article Title",
    "Citing Article EID",
    "Citing Article Link",
    "Reason",
];

/// Column order of `overall_references_of_citing.csv`
pub const REFERENCE_COLUMNS: &[&str] = &[
    "Citing Article Title",
    "Citing Article EID",
    "Citing Article Link",
    "Reference Title",
    "Reference EID",
    "Reference Link",
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_title_record_states() {
        let rec = |t: &str| TitleRecord {
            eid: "E".to_string(),
            title: t.to_string(),
        };
        assert!(rec("A paper").is_searchable());
        assert!(!rec("").is_resolved());
        assert!(!rec("Error").is_resolved());
        assert!(rec("404 Not Found").is_resolved());
        assert!(!rec("404 Not Found").is_searchable());
        assert!(!rec("Title not found").is_searchable());
    }

    #[test]
    fn test_eid_rows_ignore_extra_columns() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("eid.csv");
        std::fs::write(&path, "EID,Abstract,Year\n2-s2.0-1,link,2020\n2-s2.0-2,,2021\n")?;
        let rows: Vec<EidRow> = read_csv(&path)?;
        let eids: Vec<&str> = rows.iter().map(|r| r.eid.as_str()).collect();
        assert_eq!(eids, vec!["2-s2.0-1", "2-s2.0-2"]);
        Ok(())
    }

    #[test]
    fn test_empty_write_keeps_header() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("E1.csv");
        write_csv::<DocumentRecord>(&path, DOCUMENT_COLUMNS, &[])?;
        assert_eq!(std::fs::read_to_string(&path)?, "EID,Title,Link\n");
        assert_eq!(count_rows(&path)?, 0);
        assert!(!dir.path().join("nested").join("E1.csv.part").exists());
        Ok(())
    }

    #[test]
    fn test_flagged_row_columns() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("filtered.csv");
        let row = MiscitationRow {
            cited_title: "a, with comma".to_string(),
            cited_eid: "C".to_string(),
            cited_link: String::new(),
            miscited_title: "b".to_string(),
            miscited_eid: "M".to_string(),
            miscited_link: String::new(),
            citing_title: "c".to_string(),
            citing_eid: "X".to_string(),
            citing_link: String::new(),
        };
        let flagged = FlaggedRow::new(row.clone(), "F08");
        write_csv(&path, FLAGGED_COLUMNS, &[flagged])?;

        let text = std::fs::read_to_string(&path)?;
        let header = text.lines().next().unwrap_or_default();
        assert!(header.ends_with("Citing Article Link,Reason"));

        let back: Vec<MiscitationRow> = read_csv(&path)?;
        assert_eq!(back, vec![row]);
        Ok(())
    }

    #[test]
    fn test_document_link_fallback() {
        let mut doc = DocumentRecord::new("2-s2.0-9", "T");
        assert!(doc.link.contains("eid=2-s2.0-9"));
        doc.link.clear();
        assert_eq!(doc.link_or_canonical(), record_link("2-s2.0-9"));
    }
}
