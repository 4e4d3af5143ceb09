//! Page renderers for the result lists.
//!
//! Result lists are rendered either through the authenticated HTTP session
//! itself or by an externally attached headless browser (Browserless
//! `/content` API) that is handed the session cookies.

use crate::error::{Result, ScopusError};
use crate::session::Session;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Renders a page to HTML
pub trait PageRenderer: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Fetch `url` and return its rendered HTML.
    fn render<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String>>;
}

/// Renders with the session's own HTTP client
pub struct SessionRenderer {
    session: Arc<Session>,
}

impl SessionRenderer {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .session
            .client()
            .get(url.clone())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || self.session.is_login_page(response.url()) {
            return Err(ScopusError::Unauthenticated);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ScopusError::RateLimited(60));
        }
        if !status.is_success() {
            return Err(ScopusError::Api {
                code: status.as_u16(),
                message: format!("HTTP error: {}", status),
            });
        }

        Ok(response.text().await?)
    }

    async fn render_with_relogin(&self, url: &Url) -> Result<String> {
        match self.fetch(url).await {
            Err(ScopusError::Unauthenticated) => {
                warn!(url = %url, "Session rejected while rendering");
                if self.session.relogin().await? {
                    self.fetch(url).await
                } else {
                    Err(ScopusError::Unauthenticated)
                }
            }
            other => other,
        }
    }
}

impl PageRenderer for SessionRenderer {
    fn name(&self) -> &'static str {
        "session"
    }

    fn render<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.render_with_relogin(url))
    }
}

/// Cookie as the Browserless API expects it
#[derive(Debug, Serialize)]
struct BrowserCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    secure: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    cookies: Vec<BrowserCookie>,
    goto_options: GotoOptions,
}

/// Renders through an externally attached Browserless instance
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    endpoint: Url,
    session: Arc<Session>,
    navigation_timeout: Duration,
}

impl BrowserlessRenderer {
    /// `base_url` is the Browserless root (e.g. `http://localhost:3000`).
    pub fn new(base_url: &str, token: Option<&str>, session: Arc<Session>) -> Result<Self> {
        let mut endpoint = Url::parse(&format!("{}/content", base_url.trim_end_matches('/')))
            .map_err(|e| ScopusError::Config(format!("Invalid Browserless URL '{}': {}", base_url, e)))?;
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            endpoint.query_pairs_mut().append_pair("token", token);
        }

        let navigation_timeout = Duration::from_secs(60);
        let client = reqwest::Client::builder()
            .timeout(navigation_timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| ScopusError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(base_url, "Browserless renderer initialized");
        Ok(Self {
            client,
            endpoint,
            session,
            navigation_timeout,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let cookies = self
            .session
            .current_cookies()
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
            })
            .collect::<Vec<_>>();
        debug!(url = %url, cookies = cookies.len(), "Browserless content request");

        let body = ContentRequest {
            url: url.as_str(),
            cookies,
            goto_options: GotoOptions {
                wait_until: "networkidle2",
                timeout: self.navigation_timeout.as_millis() as u64,
            },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScopusError::Browser(format!(
                "Browserless returned {}: {}",
                status, message
            )));
        }

        let html = response.text().await?;
        if html.is_empty() {
            warn!(url = %url, "Browserless returned an empty document");
        }
        Ok(html)
    }
}

impl PageRenderer for BrowserlessRenderer {
    fn name(&self) -> &'static str {
        "browserless"
    }

    fn render<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.fetch(url))
    }
}
