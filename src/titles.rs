//! Stage 1: resolve the title of every identifier in `eid.csv` through the
//! document-details JSON endpoint.
//!
//! Identifiers are fetched one after another. Progress is saved after every
//! chunk so an interrupted run resumes where it stopped.

use crate::config::Layout;
use crate::error::{Result, ScopusError};
use crate::records::{
    read_csv, write_csv, EidRow, TitleRecord, TITLE_404, TITLE_COLUMNS, TITLE_ERROR,
    TITLE_NOT_FOUND,
};
use crate::session::Session;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Document-details endpoint, joined onto the base URL
const DOC_DETAILS_PATH: &str = "gateway/doc-details/documents/";

#[derive(Debug, Deserialize)]
struct DocumentDetails {
    #[serde(default)]
    titles: Vec<String>,
}

/// Counters reported at the end of the stage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TitleSummary {
    pub input: usize,
    pub skipped: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// Title fetcher bound to the shared session
pub struct TitleFetcher {
    session: Arc<Session>,
    max_attempts: u32,
    retry_delay: Duration,
    chunk_size: usize,
}

impl TitleFetcher {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            chunk_size: 100,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Title of one EID, or one of the failure sentinels. Never fails.
    pub async fn fetch_title(&self, eid: &str) -> String {
        let url = match self
            .session
            .config()
            .endpoint(&format!("{}{}", DOC_DETAILS_PATH, eid))
        {
            Ok(url) => url,
            Err(e) => {
                error!(eid, error = %e, "Cannot build document URL");
                return TITLE_ERROR.to_string();
            }
        };

        let mut last_status = None;
        for attempt in 1..=self.max_attempts {
            let response = match self
                .session
                .client()
                .get(url.clone())
                .header("Accept", "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(eid, attempt, error = %e, "Request failed");
                    self.pause().await;
                    continue;
                }
            };

            let status = response.status();
            last_status = Some(status);

            if status == reqwest::StatusCode::FORBIDDEN {
                warn!(eid, attempt, "403 Forbidden, re-login if needed");
                self.relogin().await;
                self.pause().await;
                continue;
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                info!(eid, attempt, "404 Not Found");
                return TITLE_404.to_string();
            }

            if status.is_success() {
                match response.json::<DocumentDetails>().await {
                    Ok(details) => {
                        let title = details
                            .titles
                            .into_iter()
                            .map(|t| t.trim().to_string())
                            .find(|t| !t.is_empty())
                            .unwrap_or_else(|| TITLE_NOT_FOUND.to_string());
                        info!(eid, attempt, title = %title, "Resolved title");
                        return title;
                    }
                    Err(e) => {
                        error!(eid, attempt, error = %e, "Undecodable document JSON");
                        self.relogin().await;
                        self.pause().await;
                        continue;
                    }
                }
            }

            warn!(eid, attempt, status = status.as_u16(), "Unexpected status, retrying");
            self.pause().await;
        }

        if last_status == Some(reqwest::StatusCode::NOT_FOUND) {
            info!(eid, attempts = self.max_attempts, "404 Not Found");
            TITLE_404.to_string()
        } else {
            error!(eid, attempts = self.max_attempts, "Failed after all attempts");
            TITLE_ERROR.to_string()
        }
    }

    /// Fill `eid_with_titles.csv` for every EID in `eid.csv` still lacking a title.
    pub async fn run(&self, layout: &Layout) -> Result<TitleSummary> {
        let input_path = layout.eid_csv();
        if !input_path.exists() {
            return Err(ScopusError::Config(format!(
                "input file {} not found",
                input_path.display()
            )));
        }

        let mut input_eids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for row in read_csv::<EidRow>(&input_path)? {
            let eid = row.eid.trim().to_string();
            if !eid.is_empty() && seen.insert(eid.clone()) {
                input_eids.push(eid);
            }
        }
        info!(count = input_eids.len(), path = %input_path.display(), "Loaded identifiers");

        let output_path = layout.titles_csv();
        let existing: Vec<TitleRecord> = if output_path.exists() {
            read_csv(&output_path)?
        } else {
            Vec::new()
        };
        info!(count = existing.len(), "Loaded existing titles");

        let resolved: HashSet<&str> = existing
            .iter()
            .filter(|r| r.is_resolved())
            .map(|r| r.eid.as_str())
            .collect();
        let pending: Vec<String> = input_eids
            .iter()
            .filter(|eid| !resolved.contains(eid.as_str()))
            .cloned()
            .collect();

        let mut titles: HashMap<String, String> = existing
            .iter()
            .map(|r| (r.eid.clone(), r.title.clone()))
            .collect();

        let mut summary = TitleSummary {
            input: input_eids.len(),
            skipped: input_eids.len() - pending.len(),
            ..Default::default()
        };
        info!(pending = pending.len(), skipped = summary.skipped, "Identifiers needing a title");

        if pending.is_empty() {
            return Ok(summary);
        }

        for (index, chunk) in pending.chunks(self.chunk_size).enumerate() {
            for eid in chunk {
                let title = self.fetch_title(eid).await;
                if title == TITLE_ERROR {
                    summary.failed += 1;
                } else {
                    summary.fetched += 1;
                }
                titles.insert(eid.clone(), title);
            }

            let done = (index * self.chunk_size + chunk.len()).min(pending.len());
            info!(done, total = pending.len(), "Saving partial results");
            save_titles(&output_path, &input_eids, &existing, &titles)?;
        }

        info!(
            fetched = summary.fetched,
            failed = summary.failed,
            path = %output_path.display(),
            "Title stage complete"
        );
        Ok(summary)
    }

    async fn relogin(&self) {
        if let Err(e) = self.session.relogin().await {
            error!(error = %e, "Re-login failed");
        }
    }

    async fn pause(&self) {
        if !self.retry_delay.is_zero() {
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

/// Input order first, then rows only present in the previous output.
fn save_titles(
    path: &std::path::Path,
    input_eids: &[String],
    existing: &[TitleRecord],
    titles: &HashMap<String, String>,
) -> Result<()> {
    let input: HashSet<&str> = input_eids.iter().map(String::as_str).collect();
    let rows: Vec<TitleRecord> = input_eids
        .iter()
        .filter_map(|eid| {
            titles.get(eid).map(|title| TitleRecord {
                eid: eid.clone(),
                title: title.clone(),
            })
        })
        .chain(
            existing
                .iter()
                .filter(|r| !input.contains(r.eid.as_str()))
                .cloned(),
        )
        .collect();
    write_csv(path, TITLE_COLUMNS, &rows)
}
