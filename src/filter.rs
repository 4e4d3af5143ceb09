//! Title-overlap filter over the combined miscitation tables.
//!
//! Rule F08 flags a miscited title that carries too many words beyond the
//! cited title. Flagged rows go to `filtered` tables with the rule name in a
//! `Reason` column; the rest go to `cleaned` tables.

use crate::config::Layout;
use crate::error::Result;
use crate::records::{
    read_csv, write_csv, FlaggedRow, MiscitationRow, FLAGGED_COLUMNS, MISCITATION_COLUMNS,
};
use std::path::Path;
use tracing::{info, warn};

/// Rule name written to the `Reason` column
pub const F08: &str = "F08";

/// Default share of extra words tolerated by [`f08`]
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// True when `miscited` has too many extra words compared with `cited`.
///
/// With both titles lowercased, every occurrence of the cited title is removed
/// from the miscited one. `n` is the miscited word count and `d` the number of
/// words removed; the row is flagged when `d == 0` or `n / d - 1 > threshold`.
pub fn f08(cited: &str, miscited: &str, threshold: f64) -> bool {
    if miscited.trim().is_empty() {
        return false;
    }
    let cited = cited.to_lowercase();
    let miscited = miscited.to_lowercase();

    let cleaned = if cited.is_empty() {
        miscited.clone()
    } else {
        miscited.replace(&cited, "")
    };

    let n = miscited.split_whitespace().count();
    let d = n.saturating_sub(cleaned.split_whitespace().count());
    if d == 0 {
        return true;
    }
    (n as f64 / d as f64) - 1.0 > threshold
}

/// Outcome of filtering one table
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterSplit {
    pub filtered: Vec<FlaggedRow>,
    pub cleaned: Vec<MiscitationRow>,
}

/// Split rows by [`f08`]; rows without a cited EID are dropped.
pub fn split_rows(rows: Vec<MiscitationRow>, threshold: f64) -> FilterSplit {
    let mut split = FilterSplit::default();
    for row in rows {
        if row.cited_eid.trim().is_empty() {
            continue;
        }
        if f08(&row.cited_title, &row.miscited_title, threshold) {
            split.filtered.push(FlaggedRow::new(row, F08));
        } else {
            split.cleaned.push(row);
        }
    }
    split
}

/// Filter `input` into `filtered_path` and `cleaned_path`. Empty outputs are not written.
pub fn filter_file(input: &Path, filtered_path: &Path, cleaned_path: &Path, threshold: f64) -> Result<FilterSplit> {
    let rows: Vec<MiscitationRow> = read_csv(input)?;
    let total = rows.len();
    let split = split_rows(rows, threshold);

    if split.filtered.is_empty() {
        info!(path = %input.display(), "No rows flagged");
    } else {
        write_csv(filtered_path, FLAGGED_COLUMNS, &split.filtered)?;
    }
    if split.cleaned.is_empty() {
        info!(path = %input.display(), "No rows passed the filter");
    } else {
        write_csv(cleaned_path, MISCITATION_COLUMNS, &split.cleaned)?;
    }

    info!(
        path = %input.display(),
        total,
        filtered = split.filtered.len(),
        cleaned = split.cleaned.len(),
        "Filtered miscitations"
    );
    Ok(split)
}

/// Totals across the overall table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterSummary {
    pub cited_tables: usize,
    pub filtered: usize,
    pub cleaned: usize,
}

/// Filter every per-cited table and the overall table under `layout`.
pub fn run_filter(layout: &Layout, threshold: f64) -> Result<FilterSummary> {
    let mut summary = FilterSummary::default();

    let by_eid = layout.by_eid_dir();
    if by_eid.is_dir() {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&by_eid)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();

        for dir in dirs {
            let input = dir.join("miscitations.csv");
            if !input.exists() {
                warn!(dir = %dir.display(), "miscitations.csv not found, skipping");
                continue;
            }
            match filter_file(&input, &dir.join("filtered.csv"), &dir.join("cleaned.csv"), threshold) {
                Ok(_) => summary.cited_tables += 1,
                Err(e) => warn!(path = %input.display(), error = %e, "Cannot filter table"),
            }
        }
    } else {
        warn!(dir = %by_eid.display(), "Per-EID directory does not exist");
    }

    let overall = layout.overall_csv();
    if overall.exists() {
        let split = filter_file(
            &overall,
            &layout.overall_filtered_csv(),
            &layout.overall_cleaned_csv(),
            threshold,
        )?;
        summary.filtered = split.filtered.len();
        summary.cleaned = split.cleaned.len();
    } else {
        warn!(path = %overall.display(), "Overall table not found, skipping");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(cited_eid: &str, cited: &str, miscited: &str) -> MiscitationRow {
        MiscitationRow {
            cited_title: cited.to_string(),
            cited_eid: cited_eid.to_string(),
            cited_link: String::new(),
            miscited_title: miscited.to_string(),
            miscited_eid: "M".to_string(),
            miscited_link: String::new(),
            citing_title: "Citing".to_string(),
            citing_eid: "X".to_string(),
            citing_link: String::new(),
        }
    }

    #[test]
    fn test_f08() {
        // Exact match: n = d, ratio 0.
        assert!(!f08("Deep learning", "Deep Learning", DEFAULT_THRESHOLD));
        // One extra word over two matched: 3/2 - 1 = 0.5 > 0.3.
        assert!(f08("deep learning", "Deep learning revisited", DEFAULT_THRESHOLD));
        // One extra word over four matched: 5/4 - 1 = 0.25.
        assert!(!f08("deep learning for crops", "Deep learning for crops revisited", DEFAULT_THRESHOLD));
        // Cited title absent from the miscited title.
        assert!(f08("soil moisture", "A different paper", DEFAULT_THRESHOLD));
        // Missing miscited title is never flagged.
        assert!(!f08("soil moisture", "", DEFAULT_THRESHOLD));
        // Extra words tolerated under a looser threshold.
        assert!(!f08("deep learning", "Deep learning revisited", 0.6));
    }

    #[test]
    fn test_split_rows_drops_missing_cited_eid() {
        let split = split_rows(
            vec![
                row("C1", "deep learning", "deep learning"),
                row("C1", "deep learning", "something else"),
                row("", "deep learning", "deep learning"),
            ],
            DEFAULT_THRESHOLD,
        );
        assert_eq!(split.cleaned.len(), 1);
        assert_eq!(split.filtered.len(), 1);
        assert_eq!(split.filtered[0].reason, "F08");
    }

    #[test]
    fn test_run_filter() -> Result<()> {
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        let rows = vec![
            row("C1", "deep learning", "Deep learning"),
            row("C1", "deep learning", "Unrelated"),
        ];
        write_csv(&layout.by_eid_csv("C1"), MISCITATION_COLUMNS, &rows)?;
        write_csv(&layout.by_eid_csv("C2"), MISCITATION_COLUMNS, &rows[..1])?;
        write_csv(&layout.overall_csv(), MISCITATION_COLUMNS, &rows)?;

        let summary = run_filter(&layout, DEFAULT_THRESHOLD)?;
        assert_eq!(summary.cited_tables, 2);
        assert_eq!(summary.filtered, 1);
        assert_eq!(summary.cleaned, 1);

        let c1 = layout.by_eid_dir().join("C1");
        let flagged: Vec<FlaggedRow> = read_csv(&c1.join("filtered.csv"))?;
        assert_eq!(flagged[0].miscited_title, "Unrelated");
        assert!(c1.join("cleaned.csv").exists());
        assert!(!layout.by_eid_dir().join("C2").join("filtered.csv").exists());
        assert!(layout.overall_filtered_csv().exists());
        assert!(layout.overall_cleaned_csv().exists());
        Ok(())
    }
}
