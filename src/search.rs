//! Search-page URLs and result-page parsing.
//!
//! The database exposes three rendered result lists the pipeline reads:
//! the "secondary documents" search, the cited-by list of a document and the
//! reference list of a document. All three render document rows linking to
//! record pages carrying an `eid=` query parameter, which is what the parser
//! keys on.

use crate::error::{Result, ScopusError};
use crate::records::DocumentRecord;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Marker rendered when a search has zero hits
pub const NO_RESULTS_SELECTOR: &str =
    "span[data-testid='no-results-with-suggestion'], [data-testid='no-results'], .noResultsMessage";

/// Record links inside a result list
const RECORD_LINK_SELECTOR: &str = "a[href*='eid=']";

/// Header carrying the "N references" count on the reference list
const REFERENCE_HEADER_SELECTOR: &str = ".documentHeader span#pageTitleHeader, span#pageTitleHeader";

/// Paging parameters shared by every result list
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    /// Results requested per page
    pub page_size: u32,
    /// Upper bound on pages read per query
    pub max_pages: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_pages: 10,
        }
    }
}

impl Paging {
    /// 1-based offset of the first result on `page` (0-based).
    pub fn offset(&self, page: u32) -> u32 {
        page * self.page_size + 1
    }
}

/// Which result list to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Secondary-document search for a cited title
    Secondary { title: String },
    /// Documents citing `eid`
    CitedBy { eid: String },
    /// Reference list of `eid`
    References { eid: String },
}

impl SearchQuery {
    /// Build the result-list URL for one page.
    pub fn url(&self, base: &Url, paging: &Paging, page: u32) -> Result<Url> {
        let (path, mut pairs): (&str, Vec<(&str, String)>) = match self {
            Self::Secondary { title } => (
                "results/results.uri",
                vec![
                    ("sort", "plf-f".to_string()),
                    ("src", "dm".to_string()),
                    ("s", format!("ALL(\"{}\")", normalize_query(title))),
                    ("origin", "searchbasic".to_string()),
                    ("sdt", "b".to_string()),
                ],
            ),
            Self::CitedBy { eid } => (
                "search/submit/citedby.uri",
                vec![
                    ("eid", eid.clone()),
                    ("src", "s".to_string()),
                    ("origin", "resultslist".to_string()),
                ],
            ),
            Self::References { eid } => {
                let id = scopus_id(eid).ok_or_else(|| {
                    ScopusError::Validation(format!("EID '{}' has no numeric id part", eid))
                })?;
                (
                    "results/references.uri",
                    vec![
                        ("src", "r".to_string()),
                        ("sot", "rec".to_string()),
                        ("s", format!("CITEID({})", id)),
                        ("citingId", eid.clone()),
                    ],
                )
            }
        };

        pairs.push(("offset", paging.offset(page).to_string()));
        pairs.push(("limit", paging.page_size.to_string()));

        let mut url = base
            .join(path)
            .map_err(|e| ScopusError::Config(format!("Invalid base URL: {}", e)))?;
        {
            let mut params = url.query_pairs_mut();
            for (key, value) in &pairs {
                params.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Secondary { title } => format!("secondary:{}", truncate(title, 40)),
            Self::CitedBy { eid } => format!("citedby:{}", eid),
            Self::References { eid } => format!("references:{}", eid),
        }
    }
}

/// Lowercase and collapse every run of non-alphanumeric characters into one space.
///
/// Quotes, colons and other punctuation would otherwise break the quoted
/// `ALL("...")` expression.
pub fn normalize_query(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let lower = s.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut in_gap = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            in_gap = false;
        } else if !in_gap {
            out.push(' ');
            in_gap = true;
        }
    }
    out
}

/// Numeric id of an EID: the third `-`-separated part (`2-s2.0-<id>`).
pub fn scopus_id(eid: &str) -> Option<&str> {
    eid.trim().split('-').nth(2).filter(|s| !s.is_empty())
}

/// What a rendered result list turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPage {
    /// Document rows, deduplicated by EID in page order
    Documents(Vec<DocumentRecord>),
    /// The explicit zero-hits marker
    NoResults,
    /// Neither rows nor the zero-hits marker (login wall, error page, layout change)
    Unrecognized,
}

/// Parse a rendered result list.
pub fn parse_results(html: &str) -> Result<ResultPage> {
    let document = Html::parse_document(html);

    let link_selector = selector(RECORD_LINK_SELECTOR)?;
    let no_results_selector = selector(NO_RESULTS_SELECTOR)?;

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for link in document.select(&link_selector) {
        let href = link.value().attr("href").unwrap_or("");
        if !is_record_link(href) {
            continue;
        }
        let Some(eid) = eid_from_href(href) else {
            continue;
        };
        let title = element_text(&link);
        if title.is_empty() {
            continue;
        }
        if seen.insert(eid.clone()) {
            records.push(DocumentRecord::new(eid, title));
        }
    }

    if !records.is_empty() {
        debug!(count = records.len(), "Parsed result rows");
        return Ok(ResultPage::Documents(records));
    }

    if document.select(&no_results_selector).next().is_some() {
        return Ok(ResultPage::NoResults);
    }

    Ok(ResultPage::Unrecognized)
}

/// Reference count from the reference-list header, if the header is present.
pub fn parse_reference_count(html: &str) -> Result<Option<u32>> {
    let document = Html::parse_document(html);
    let header_selector = selector(REFERENCE_HEADER_SELECTOR)?;
    let count_regex =
        Regex::new(r"(\d[\d,]*)\s+reference").map_err(|e| ScopusError::Parse(e.to_string()))?;

    let Some(header) = document.select(&header_selector).next() else {
        return Ok(None);
    };
    let text = element_text(&header).to_lowercase();
    debug!(header = %text, "Reference header");

    let count = count_regex
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
        .unwrap_or(0);
    Ok(Some(count))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScopusError::Parse(e.to_string()))
}

/// Record-page links only; cited-by and export links also carry `eid=`.
fn is_record_link(href: &str) -> bool {
    href.contains("record/display") || href.contains("/record/")
}

fn eid_from_href(href: &str) -> Option<String> {
    let absolute = if href.starts_with("http://") || href.starts_with("https://") {
        Url::parse(href).ok()?
    } else {
        Url::parse("https://www.scopus.com/").ok()?.join(href).ok()?
    };
    absolute
        .query_pairs()
        .find(|(k, _)| k == "eid")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
