//! Stage 4: join the cited, miscited and citing tiers into one table.
//!
//! The join is driven by file presence: a miscited row contributes only when
//! its citing file exists, and a cited document only when it has a usable
//! title in `eid_with_titles.csv`.

use crate::citing::document_files;
use crate::config::{record_link, Layout};
use crate::error::{Result, ScopusError};
use crate::records::{
    read_csv, write_csv, DocumentRecord, MiscitationRow, TitleRecord, MISCITATION_COLUMNS,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Rows of the joined table, grouped by cited EID in processing order
#[derive(Debug, Default)]
pub struct Miscitations {
    pub by_cited: Vec<(String, Vec<MiscitationRow>)>,
}

impl Miscitations {
    pub fn total(&self) -> usize {
        self.by_cited.iter().map(|(_, rows)| rows.len()).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &MiscitationRow> {
        self.by_cited.iter().flat_map(|(_, rows)| rows.iter())
    }
}

/// Build the joined rows from the files under `layout`.
pub fn generate_miscitations(layout: &Layout) -> Result<Miscitations> {
    let titles_path = layout.titles_csv();
    if !titles_path.exists() {
        return Err(ScopusError::Config(format!(
            "input file {} not found",
            titles_path.display()
        )));
    }

    let lookup: HashMap<String, String> = read_csv::<TitleRecord>(&titles_path)?
        .into_iter()
        .filter(|r| r.is_searchable())
        .map(|r| (r.eid, r.title))
        .collect();
    info!(titles = lookup.len(), "Loaded title lookup");

    let mut result = Miscitations::default();
    for (cited_eid, miscited_path) in document_files(&layout.miscited_dir())? {
        let Some(cited_title) = lookup.get(&cited_eid) else {
            warn!(eid = %cited_eid, "Cited EID has no usable title, skipping");
            continue;
        };

        let miscited: Vec<DocumentRecord> = match read_csv(&miscited_path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(path = %miscited_path.display(), error = %e, "Cannot read miscited file, skipping");
                continue;
            }
        };
        let mut rows = Vec::new();
        for miscited_doc in miscited.iter().filter(|d| !d.eid.is_empty()) {
            let citing_path: PathBuf = layout.citing_csv(&cited_eid, &miscited_doc.eid);
            if !citing_path.exists() {
                warn!(cited = %cited_eid, miscited = %miscited_doc.eid, "Citing file missing, skipping");
                continue;
            }
            let citing: Vec<DocumentRecord> = match read_csv(&citing_path) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(path = %citing_path.display(), error = %e, "Cannot read citing file, skipping");
                    continue;
                }
            };
            for citing_doc in citing.iter().filter(|d| !d.eid.is_empty()) {
                let row = MiscitationRow {
                    cited_title: cited_title.clone(),
                    cited_eid: cited_eid.clone(),
                    cited_link: record_link(&cited_eid),
                    miscited_title: miscited_doc.title.clone(),
                    miscited_eid: miscited_doc.eid.clone(),
                    miscited_link: miscited_doc.link_or_canonical(),
                    citing_title: citing_doc.title.clone(),
                    citing_eid: citing_doc.eid.clone(),
                    citing_link: citing_doc.link_or_canonical(),
                };
                if row.is_complete() {
                    rows.push(row);
                } else {
                    debug!(
                        cited = %cited_eid,
                        miscited = %miscited_doc.eid,
                        citing = %citing_doc.eid,
                        "Incomplete row dropped"
                    );
                }
            }
        }

        debug!(eid = %cited_eid, rows = rows.len(), "Joined cited document");
        result.by_cited.push((cited_eid, rows));
    }

    Ok(result)
}

/// Write `overall_miscitations.csv` and the per-cited breakdown.
///
/// A cited EID without rows has no per-cited directory; one left by an
/// earlier run is removed. Returns the number of rows in the overall table.
pub fn write_miscitations(layout: &Layout) -> Result<usize> {
    let miscitations = generate_miscitations(layout)?;

    for (cited_eid, rows) in &miscitations.by_cited {
        if rows.is_empty() {
            let stale = layout.by_eid_dir().join(cited_eid);
            if stale.is_dir() {
                std::fs::remove_dir_all(&stale)?;
                info!(eid = %cited_eid, path = %stale.display(), "Removed per-EID table without rows");
            }
            continue;
        }
        write_csv(&layout.by_eid_csv(cited_eid), MISCITATION_COLUMNS, rows)?;
    }

    let overall: Vec<&MiscitationRow> = miscitations.rows().collect();
    write_csv(&layout.overall_csv(), MISCITATION_COLUMNS, &overall)?;
    info!(
        rows = overall.len(),
        cited = miscitations.by_cited.len(),
        path = %layout.overall_csv().display(),
        "Wrote combined miscitations"
    );
    Ok(miscitations.total())
}
