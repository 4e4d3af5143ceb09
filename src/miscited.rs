//! Stage 2: secondary-document search for every resolved title.

use crate::config::Layout;
use crate::error::{Result, ScopusError};
use crate::harvest::Harvester;
use crate::records::{read_csv, write_csv, TitleRecord, DOCUMENT_COLUMNS};
use crate::search::SearchQuery;
use crate::status::{self, RunStatus, StageSummary};
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Cited documents with a title usable as a search phrase, in file order.
pub fn searchable_titles(layout: &Layout) -> Result<Vec<TitleRecord>> {
    let path = layout.titles_csv();
    if !path.exists() {
        return Err(ScopusError::Config(format!(
            "input file {} not found",
            path.display()
        )));
    }
    let mut seen = HashSet::new();
    let rows = read_csv::<TitleRecord>(&path)?
        .into_iter()
        .filter(|r| !r.eid.is_empty() && r.is_searchable())
        .filter(|r| seen.insert(r.eid.clone()))
        .collect();
    Ok(rows)
}

/// Write `miscited_downloads/<EID>.csv` for every cited document that lacks one.
pub async fn download_miscited(layout: &Layout, harvester: &Harvester, chunk_size: usize) -> Result<StageSummary> {
    let cited = searchable_titles(layout)?;
    std::fs::create_dir_all(layout.miscited_dir())?;
    info!(count = cited.len(), "Cited documents with usable titles");

    let mut run = RunStatus::new();
    let mut summary = StageSummary {
        items: cited.len(),
        ..Default::default()
    };

    for chunk in cited.chunks(chunk_size.max(1)) {
        for record in chunk {
            let output = layout.miscited_csv(&record.eid);
            if output.exists() {
                debug!(eid = %record.eid, "Already downloaded, skipping");
                summary.skipped += 1;
                continue;
            }

            info!(eid = %record.eid, title = %record.title, "Searching secondary documents");
            let query = SearchQuery::Secondary {
                title: record.title.clone(),
            };
            match harvester.collect(&query).await {
                Ok(documents) => {
                    write_csv(&output, DOCUMENT_COLUMNS, &documents)?;
                    info!(
                        eid = %record.eid,
                        documents = documents.len(),
                        path = %output.display(),
                        "Saved miscited documents"
                    );
                    summary.downloaded += 1;
                }
                Err(e) => {
                    error!(eid = %record.eid, error = %e, "Secondary search failed");
                    run.mark_failed(record.eid.clone());
                    summary.failed += 1;
                }
            }
        }
        write_status(layout, &cited, &run)?;
    }
    write_status(layout, &cited, &run)?;

    info!(%summary, "Miscited stage complete");
    Ok(summary)
}

fn write_status(layout: &Layout, cited: &[TitleRecord], run: &RunStatus) -> Result<()> {
    let items: Vec<_> = cited
        .iter()
        .map(|r| (r.eid.clone(), run.resolve(&r.eid, &layout.miscited_csv(&r.eid))))
        .collect();
    status::write_single(&layout.miscited_status_csv(), &items)
}
