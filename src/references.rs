//! Stage 5: reference lists of the citing documents.
//!
//! The reference tables are kept apart from the miscitation table; they are
//! collected for later cross-checking of the citing documents.

use crate::citing::document_files;
use crate::config::Layout;
use crate::error::Result;
use crate::harvest::Harvester;
use crate::records::{
    read_csv, write_csv, DocumentRecord, ReferenceRow, DOCUMENT_COLUMNS, REFERENCE_COLUMNS,
};
use crate::search::{parse_reference_count, SearchQuery};
use crate::status::{self, RunStatus, StageSummary};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Every citing document under `citing_downloads/`, first occurrence per EID.
pub fn discover_citing(layout: &Layout) -> Result<Vec<DocumentRecord>> {
    let root = layout.citing_dir();
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut cited_dirs = Vec::new();
    for entry in std::fs::read_dir(&root)? {
        let path = entry?.path();
        if path.is_dir() {
            cited_dirs.push(path);
        }
    }
    cited_dirs.sort();

    let mut seen = HashSet::new();
    let mut documents = Vec::new();
    for dir in cited_dirs {
        for (_, path) in document_files(&dir)? {
            let rows: Vec<DocumentRecord> = match read_csv(&path) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable citing file, skipping");
                    continue;
                }
            };
            for row in rows {
                if !row.eid.is_empty() && seen.insert(row.eid.clone()) {
                    documents.push(row);
                }
            }
        }
    }
    Ok(documents)
}

async fn fetch_references(harvester: &Harvester, eid: &str) -> Result<Vec<DocumentRecord>> {
    let query = SearchQuery::References { eid: eid.to_string() };
    let first = harvester.render_page(&query, 0).await?;
    match parse_reference_count(&first)? {
        Some(0) | None => {
            info!(eid, "No references listed");
            Ok(Vec::new())
        }
        Some(count) => {
            debug!(eid, count, "Reference count");
            harvester.collect_from(&query, &first).await
        }
    }
}

/// Download the reference list of every citing document lacking one, then
/// rebuild `overall_references_of_citing.csv`.
pub async fn download_references(layout: &Layout, harvester: &Harvester, chunk_size: usize) -> Result<StageSummary> {
    let citing = discover_citing(layout)?;
    std::fs::create_dir_all(layout.references_dir())?;
    info!(count = citing.len(), "Citing documents to expand");

    let mut run = RunStatus::new();
    let mut summary = StageSummary {
        items: citing.len(),
        ..Default::default()
    };

    for chunk in citing.chunks(chunk_size.max(1)) {
        for document in chunk {
            let output = layout.references_csv(&document.eid);
            if output.exists() {
                debug!(eid = %document.eid, "Already downloaded, skipping");
                summary.skipped += 1;
                continue;
            }

            match fetch_references(harvester, &document.eid).await {
                Ok(references) => {
                    write_csv(&output, DOCUMENT_COLUMNS, &references)?;
                    info!(eid = %document.eid, references = references.len(), "Saved references");
                    summary.downloaded += 1;
                }
                Err(e) => {
                    error!(eid = %document.eid, error = %e, "Reference download failed");
                    run.mark_failed(document.eid.clone());
                    summary.failed += 1;
                }
            }
        }
        write_status(layout, &citing, &run)?;
    }
    write_status(layout, &citing, &run)?;

    let rows = combine_references(layout, &citing)?;
    write_csv(&layout.overall_references_csv(), REFERENCE_COLUMNS, &rows)?;
    info!(rows = rows.len(), %summary, "Reference stage complete");
    Ok(summary)
}

fn write_status(layout: &Layout, citing: &[DocumentRecord], run: &RunStatus) -> Result<()> {
    let items: Vec<_> = citing
        .iter()
        .map(|d| (d.eid.clone(), run.resolve(&d.eid, &layout.references_csv(&d.eid))))
        .collect();
    status::write_citing(&layout.references_status_csv(), &items)
}

/// One row per (citing document, reference) with a downloaded reference list.
fn combine_references(layout: &Layout, citing: &[DocumentRecord]) -> Result<Vec<ReferenceRow>> {
    let mut rows = Vec::new();
    for document in citing {
        let path = layout.references_csv(&document.eid);
        if !path.exists() {
            continue;
        }
        let references: Vec<DocumentRecord> = match read_csv(&path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read reference file, skipping");
                continue;
            }
        };
        for reference in references.into_iter().filter(|r| !r.eid.is_empty()) {
            rows.push(ReferenceRow {
                citing_title: document.title.clone(),
                citing_eid: document.eid.clone(),
                citing_link: document.link_or_canonical(),
                reference_link: reference.link_or_canonical(),
                reference_title: reference.title,
                reference_eid: reference.eid,
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{results_html, static_harvester, StaticRenderer};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn with_header(count: &str, rows: &[(&str, &str)]) -> String {
        results_html(rows).replace(
            "<body>",
            &format!(r#"<body><div class="documentHeader"><span id="pageTitleHeader">{}</span></div>"#, count),
        )
    }

    #[tokio::test]
    async fn test_download_references() -> Result<()> {
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        std::fs::create_dir_all(layout.citing_dir().join("C1"))?;
        std::fs::write(
            layout.citing_csv("C1", "M1"),
            "EID,Title,Link\n2-s2.0-11,Citing one,\n2-s2.0-12,Citing two,\n",
        )?;
        std::fs::write(
            layout.citing_csv("C1", "M2"),
            "EID,Title,Link\n2-s2.0-11,Citing one again,\nbogus,Not an EID,\n",
        )?;
        std::fs::write(layout.citing_status_csv(), "CitedEID,MiscitedEID,Status\n")?;

        let renderer = Arc::new(
            StaticRenderer::new()
                .page(&["CITEID(11)"], with_header("2 references", &[("R1", "Ref one"), ("R2", "Ref two")]))
                .page(&["CITEID(12)"], with_header("0 references", &[])),
        );
        let harvester = static_harvester(Arc::clone(&renderer));

        let summary = download_references(&layout, &harvester, 1).await?;
        assert_eq!(summary.items, 3);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(std::fs::read_to_string(layout.references_csv("2-s2.0-12"))?, "EID,Title,Link\n");

        let overall: Vec<ReferenceRow> = read_csv(&layout.overall_references_csv())?;
        assert_eq!(overall.len(), 2);
        assert_eq!(overall[0].citing_title, "Citing one");
        assert_eq!(overall[1].reference_eid, "R2");
        assert_eq!(
            std::fs::read_to_string(layout.references_status_csv())?,
            "CitingEID,Status\n2-s2.0-11,success\n2-s2.0-12,empty\nbogus,fail\n"
        );
        Ok(())
    }

    #[test]
    fn test_unreadable_reference_file_is_skipped() -> Result<()> {
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        std::fs::create_dir_all(layout.references_dir())?;
        std::fs::write(layout.references_csv("2-s2.0-11"), b"EID,Title,Link\nR1,\xff\xfe,\n")?;
        std::fs::write(layout.references_csv("2-s2.0-12"), "EID,Title,Link\nR2,Ref two,\n")?;

        let citing = vec![
            DocumentRecord::new("2-s2.0-11", "Citing one"),
            DocumentRecord::new("2-s2.0-12", "Citing two"),
        ];
        let rows = combine_references(&layout, &citing)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].citing_eid, "2-s2.0-12");
        assert_eq!(rows[0].reference_eid, "R2");
        Ok(())
    }

    #[test]
    fn test_discover_citing_without_downloads() -> Result<()> {
        let dir = TempDir::new()?;
        assert!(discover_citing(&Layout::new(dir.path()))?.is_empty());
        Ok(())
    }
}
