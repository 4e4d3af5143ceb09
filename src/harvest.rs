//! Collects every page of one result list.

use crate::browser::PageRenderer;
use crate::error::{Result, ScopusError};
use crate::records::DocumentRecord;
use crate::search::{parse_results, Paging, ResultPage, SearchQuery};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Randomized pause between two page renders
#[derive(Debug, Clone, Copy)]
pub struct PoliteDelay {
    pub base: Duration,
    pub jitter: Duration,
}

impl PoliteDelay {
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub async fn pause(&self) {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % (jitter_ms + 1)
        };
        let wait = self.base + Duration::from_millis(extra);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for PoliteDelay {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1500),
            jitter: Duration::from_millis(1500),
        }
    }
}

/// Renders result lists page by page and gathers their document rows.
pub struct Harvester {
    renderer: Arc<dyn PageRenderer>,
    base_url: Url,
    paging: Paging,
    delay: PoliteDelay,
}

impl Harvester {
    pub fn new(renderer: Arc<dyn PageRenderer>, base_url: Url, paging: Paging, delay: PoliteDelay) -> Self {
        Self {
            renderer,
            base_url,
            paging,
            delay,
        }
    }

    /// Render one page of `query`.
    pub async fn render_page(&self, query: &SearchQuery, page: u32) -> Result<String> {
        let url = query.url(&self.base_url, &self.paging, page)?;
        debug!(query = %query.label(), page, url = %url, backend = self.renderer.name(), "Rendering page");
        let html = self.renderer.render(&url).await;
        self.delay.pause().await;
        html
    }

    /// Every document of `query`; empty when the list has zero hits.
    ///
    /// An unrecognized page anywhere fails the whole list, and so does a list
    /// still full on its last allowed page. A partial list is never reported
    /// as complete.
    pub async fn collect(&self, query: &SearchQuery) -> Result<Vec<DocumentRecord>> {
        let first = self.render_page(query, 0).await?;
        self.collect_from(query, &first).await
    }

    /// Like [`Harvester::collect`], with the first page already rendered.
    pub async fn collect_from(&self, query: &SearchQuery, first_html: &str) -> Result<Vec<DocumentRecord>> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut html = first_html.to_string();
        let mut page = 0;

        loop {
            let rows = match parse_results(&html)? {
                ResultPage::Documents(rows) => rows,
                ResultPage::NoResults if page == 0 => {
                    info!(query = %query.label(), "No results");
                    return Ok(Vec::new());
                }
                ResultPage::NoResults => break,
                ResultPage::Unrecognized => {
                    warn!(query = %query.label(), page, "Unrecognized result page");
                    return Err(ScopusError::Parse(format!(
                        "unrecognized result page {} for {}",
                        page,
                        query.label()
                    )));
                }
            };

            let on_page = rows.len();
            let before = records.len();
            for row in rows {
                if seen.insert(row.eid.clone()) {
                    records.push(row);
                }
            }
            let added = records.len() - before;
            debug!(query = %query.label(), page, on_page, added, "Parsed page");

            page += 1;
            if added == 0 || on_page < self.paging.page_size as usize {
                break;
            }
            if page >= self.paging.max_pages {
                warn!(
                    query = %query.label(),
                    pages = page,
                    documents = records.len(),
                    "Result list exceeds the page limit"
                );
                return Err(ScopusError::Truncated {
                    query: query.label(),
                    max_pages: self.paging.max_pages,
                });
            }
            html = self.render_page(query, page).await?;
        }

        info!(query = %query.label(), pages = page, documents = records.len(), "Collected result list");
        Ok(records)
    }
}
