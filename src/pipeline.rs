//! Stage runner: binds the stages to one working directory and routes each
//! stage's events to its companion log file.

use crate::citing::download_citing;
use crate::combine::write_miscitations;
use crate::config::Layout;
use crate::error::Result;
use crate::filter::{run_filter, FilterSummary};
use crate::harvest::Harvester;
use crate::logging::StageLog;
use crate::miscited::download_miscited;
use crate::references::download_references;
use crate::session::Session;
use crate::status::StageSummary;
use crate::titles::{TitleFetcher, TitleSummary};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Status rewrite interval of the rendered-page stages
pub const DEFAULT_CHUNK_SIZE: usize = 10;

pub struct Pipeline {
    layout: Layout,
    session: Arc<Session>,
    titles: TitleFetcher,
    harvester: Harvester,
    stage_log: StageLog,
    chunk_size: usize,
    threshold: f64,
}

impl Pipeline {
    pub fn new(layout: Layout, session: Arc<Session>, harvester: Harvester, stage_log: StageLog) -> Self {
        Self {
            titles: TitleFetcher::new(Arc::clone(&session)),
            layout,
            session,
            harvester,
            stage_log,
            chunk_size: DEFAULT_CHUNK_SIZE,
            threshold: crate::filter::DEFAULT_THRESHOLD,
        }
    }

    pub fn with_title_fetcher(mut self, titles: TitleFetcher) -> Self {
        self.titles = titles;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn enter(&self, log: &Path, stage: &str) -> Result<()> {
        self.stage_log.attach(log)?;
        info!(stage, workdir = %self.layout.root().display(), "Starting stage");
        Ok(())
    }

    /// Stage 1
    pub async fn titles(&self) -> Result<TitleSummary> {
        self.enter(&self.layout.titles_log(), "titles")?;
        self.session.ensure_logged_in().await?;
        self.titles.run(&self.layout).await
    }

    /// Stage 2
    pub async fn miscited(&self) -> Result<StageSummary> {
        self.enter(&self.layout.miscited_log(), "miscited")?;
        self.session.ensure_logged_in().await?;
        download_miscited(&self.layout, &self.harvester, self.chunk_size).await
    }

    /// Stage 3
    pub async fn citing(&self) -> Result<StageSummary> {
        self.enter(&self.layout.citing_log(), "citing")?;
        self.session.ensure_logged_in().await?;
        download_citing(&self.layout, &self.harvester, self.chunk_size).await
    }

    /// Stage 4
    pub fn combine(&self) -> Result<usize> {
        self.enter(&self.layout.combine_log(), "combine")?;
        write_miscitations(&self.layout)
    }

    pub fn filter(&self) -> Result<FilterSummary> {
        self.enter(&self.layout.filter_log(), "filter")?;
        run_filter(&self.layout, self.threshold)
    }

    /// Stage 5
    pub async fn references(&self) -> Result<StageSummary> {
        self.enter(&self.layout.references_log(), "references")?;
        self.session.ensure_logged_in().await?;
        download_references(&self.layout, &self.harvester, self.chunk_size).await
    }

    /// Stages 1 to 4 in order.
    pub async fn run(&self) -> Result<usize> {
        self.titles().await?;
        self.miscited().await?;
        self.citing().await?;
        let rows = self.combine()?;
        self.stage_log.detach();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{read_csv, MiscitationRow};
    use crate::testing::{
        login_app, results_html, spawn_server, static_harvester, test_session, StaticRenderer,
    };
    use axum::{
        extract::Path as UrlPath, http::StatusCode, response::IntoResponse, routing::get, Json,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn snapshot(root: &Path) -> Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                    let key = path.strip_prefix(root).unwrap_or(&path).display().to_string();
                    files.insert(key, std::fs::read_to_string(&path)?);
                }
            }
        }
        Ok(files)
    }

    #[tokio::test]
    async fn test_end_to_end_and_rerun() -> Result<()> {
        let app = login_app("alice", "secret").route(
            "/gateway/doc-details/documents/{eid}",
            get(|UrlPath(eid): UrlPath<String>| async move {
                if eid == "EID1" {
                    Json(serde_json::json!({"titles": ["Machine learning for soil science"]})).into_response()
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            }),
        );
        let base = spawn_server(app).await;
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        std::fs::write(layout.eid_csv(), "EID\nEID1\n")?;

        let renderer = Arc::new(
            StaticRenderer::new()
                .page(
                    &["ALL(\"machine learning for soil science\")"],
                    results_html(&[("M1", "Machine learning for soil science"), ("M2", "Machine-learning in soils")]),
                )
                .page(&["citedby.uri", "eid=M1&"], results_html(&[("X1", "Citing one"), ("X2", "Citing two")]))
                .page(&["citedby.uri", "eid=M2&"], results_html(&[("X3", "Citing three")])),
        );
        let session = test_session(&base, Some(("alice", "secret")), dir.path())?;
        let fetcher = TitleFetcher::new(Arc::clone(&session)).with_retry_delay(Duration::ZERO);
        let pipeline = Pipeline::new(
            layout.clone(),
            session,
            static_harvester(Arc::clone(&renderer)),
            StageLog::default(),
        )
        .with_title_fetcher(fetcher);

        assert_eq!(pipeline.run().await?, 3);

        assert_eq!(
            std::fs::read_to_string(layout.titles_csv())?,
            "EID,Title\nEID1,Machine learning for soil science\n"
        );
        assert!(layout.miscited_csv("EID1").exists());
        assert!(layout.citing_csv("EID1", "M1").exists());
        assert!(layout.citing_csv("EID1", "M2").exists());

        let rows: Vec<MiscitationRow> = read_csv(&layout.overall_csv())?;
        let paths: Vec<(&str, &str, &str)> = rows
            .iter()
            .map(|r| (r.cited_eid.as_str(), r.miscited_eid.as_str(), r.citing_eid.as_str()))
            .collect();
        assert_eq!(
            paths,
            vec![("EID1", "M1", "X1"), ("EID1", "M1", "X2"), ("EID1", "M2", "X3")]
        );
        assert!(rows.iter().all(|r| r.is_complete()));
        assert!(layout.miscited_log().exists());
        assert!(layout.combine_log().exists());

        // A completed directory is left exactly as it was.
        let before = snapshot(dir.path())?;
        let renders = renderer.requests().len();
        pipeline.run().await?;
        assert_eq!(snapshot(dir.path())?, before);
        assert_eq!(renderer.requests().len(), renders);
        Ok(())
    }
}
