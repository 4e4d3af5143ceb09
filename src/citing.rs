//! Stage 3: cited-by search for every miscited document.

use crate::config::Layout;
use crate::error::Result;
use crate::harvest::Harvester;
use crate::records::{read_csv, write_csv, DocumentRecord, DOCUMENT_COLUMNS};
use crate::search::SearchQuery;
use crate::status::{self, DownloadStatus, RunStatus, StageSummary};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// One miscited document under the cited document it was found for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationPair {
    pub cited_eid: String,
    pub miscited_eid: String,
}

impl CitationPair {
    fn key(&self) -> String {
        format!("{}/{}", self.cited_eid, self.miscited_eid)
    }
}

/// `<stem, path>` of every per-document CSV in `dir`, sorted by stem; `status.csv` excluded.
pub fn document_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem == "status" {
            continue;
        }
        files.push((stem.to_string(), path.clone()));
    }
    files.sort();
    Ok(files)
}

/// Every `(cited, miscited)` pair found in `miscited_downloads/`.
pub fn discover_pairs(layout: &Layout) -> Result<Vec<CitationPair>> {
    let mut pairs = Vec::new();
    for (cited_eid, path) in document_files(&layout.miscited_dir())? {
        let rows: Vec<DocumentRecord> = match read_csv(&path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable miscited file, skipping");
                continue;
            }
        };
        let mut seen = HashSet::new();
        for row in rows {
            let miscited_eid = row.eid.trim().to_string();
            if miscited_eid.is_empty() || !seen.insert(miscited_eid.clone()) {
                continue;
            }
            pairs.push(CitationPair {
                cited_eid: cited_eid.clone(),
                miscited_eid,
            });
        }
    }
    Ok(pairs)
}

/// Write `citing_downloads/<CITED>/<MISCITED>.csv` for every pair that lacks one.
pub async fn download_citing(layout: &Layout, harvester: &Harvester, chunk_size: usize) -> Result<StageSummary> {
    let pairs = discover_pairs(layout)?;
    std::fs::create_dir_all(layout.citing_dir())?;
    info!(count = pairs.len(), "Miscited documents to expand");

    let mut run = RunStatus::new();
    let mut summary = StageSummary {
        items: pairs.len(),
        ..Default::default()
    };

    for chunk in pairs.chunks(chunk_size.max(1)) {
        for pair in chunk {
            let output = layout.citing_csv(&pair.cited_eid, &pair.miscited_eid);
            if output.exists() {
                debug!(cited = %pair.cited_eid, miscited = %pair.miscited_eid, "Already downloaded, skipping");
                summary.skipped += 1;
                continue;
            }

            info!(cited = %pair.cited_eid, miscited = %pair.miscited_eid, "Searching citing documents");
            let query = SearchQuery::CitedBy {
                eid: pair.miscited_eid.clone(),
            };
            match harvester.collect(&query).await {
                Ok(documents) => {
                    write_csv(&output, DOCUMENT_COLUMNS, &documents)?;
                    info!(miscited = %pair.miscited_eid, documents = documents.len(), "Saved citing documents");
                    summary.downloaded += 1;
                }
                Err(e) => {
                    error!(
                        cited = %pair.cited_eid,
                        miscited = %pair.miscited_eid,
                        error = %e,
                        "Cited-by search failed"
                    );
                    run.mark_failed(pair.key());
                    summary.failed += 1;
                }
            }
        }
        write_status(layout, &pairs, &run)?;
    }
    write_status(layout, &pairs, &run)?;

    info!(%summary, "Citing stage complete");
    Ok(summary)
}

fn write_status(layout: &Layout, pairs: &[CitationPair], run: &RunStatus) -> Result<()> {
    let items: Vec<(String, String, DownloadStatus)> = pairs
        .iter()
        .map(|p| {
            let output = layout.citing_csv(&p.cited_eid, &p.miscited_eid);
            (p.cited_eid.clone(), p.miscited_eid.clone(), run.resolve(&p.key(), &output))
        })
        .collect();
    status::write_pairs(&layout.citing_status_csv(), &items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{no_results_html, results_html, static_harvester, StaticRenderer};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed(layout: &Layout) -> Result<()> {
        std::fs::create_dir_all(layout.miscited_dir())?;
        std::fs::write(
            layout.miscited_csv("C2"),
            "EID,Title,Link\nM3,Third,\n",
        )?;
        std::fs::write(
            layout.miscited_csv("C1"),
            "EID,Title,Link\nM1,First,\n,Blank eid,\nM2,Second,\nM1,First again,\n",
        )?;
        std::fs::write(layout.miscited_status_csv(), "EID,Status\nC1,success\n")?;
        Ok(())
    }

    #[test]
    fn test_discover_pairs() -> Result<()> {
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        seed(&layout)?;
        let pairs: Vec<(String, String)> = discover_pairs(&layout)?
            .into_iter()
            .map(|p| (p.cited_eid, p.miscited_eid))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("C1".to_string(), "M1".to_string()),
                ("C1".to_string(), "M2".to_string()),
                ("C2".to_string(), "M3".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_download_citing() -> Result<()> {
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        seed(&layout)?;

        let renderer = Arc::new(
            StaticRenderer::new()
                .page(&["citedby.uri", "eid=M1&"], results_html(&[("X1", "Citing one"), ("X2", "Citing two")]))
                .page(&["citedby.uri", "eid=M2&"], no_results_html()),
        );
        let harvester = static_harvester(Arc::clone(&renderer));

        let summary = download_citing(&layout, &harvester, 10).await?;
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);

        let docs: Vec<DocumentRecord> = read_csv(&layout.citing_csv("C1", "M1"))?;
        assert_eq!(docs.iter().map(|d| d.eid.as_str()).collect::<Vec<_>>(), vec!["X1", "X2"]);
        assert_eq!(std::fs::read_to_string(layout.citing_csv("C1", "M2"))?, "EID,Title,Link\n");
        assert!(!layout.citing_csv("C2", "M3").exists());
        assert_eq!(
            std::fs::read_to_string(layout.citing_status_csv())?,
            "CitedEID,MiscitedEID,Status\nC1,M1,success\nC1,M2,empty\nC2,M3,fail\n"
        );

        let again = download_citing(&layout, &harvester, 10).await?;
        assert_eq!(again.skipped, 2);
        Ok(())
    }
}
