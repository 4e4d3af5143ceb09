//! Authenticated database session.
//!
//! One HTTP client with a cookie jar is shared by every request of a run.
//! Logging in walks the institutional EZproxy form: fetch the login page,
//! submit the form carrying its hidden inputs plus the credentials, and
//! follow redirects until the proxied database host is reached.

use crate::config::ScopusConfig;
use crate::cookies::{parse_cookie_header, Cookie, CookieManager};
use crate::error::{OptionExt, Result, ScopusError};
use reqwest::cookie::{CookieStore, Jar};
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Shared authenticated session
pub struct Session {
    config: ScopusConfig,
    client: reqwest::Client,
    jar: Arc<Jar>,
    cookies: CookieManager,
    last_login: Mutex<Option<Instant>>,
}

impl Session {
    /// Build the HTTP client; no request is made yet.
    pub fn new(config: ScopusConfig, cookie_path: PathBuf) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|e| ScopusError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            jar,
            cookies: CookieManager::with_path(cookie_path),
            last_login: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ScopusConfig {
        &self.config
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Seed the jar with saved cookies for the database host. Returns how many were restored.
    pub fn restore_cookies(&self) -> usize {
        let host = self.config.cookie_domain();
        let mut restored = 0;
        for cookie in self
            .cookies
            .load()
            .iter()
            .filter(|c| domain_matches(&c.domain, &host))
        {
            self.jar.add_cookie_str(
                &format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path),
                &self.config.base_url,
            );
            restored += 1;
        }
        debug!(restored, host = %host, "Restored saved cookies");
        restored
    }

    /// Reuse saved cookies when there are any, otherwise log in.
    pub async fn ensure_logged_in(&self) -> Result<()> {
        let restored = self.restore_cookies();
        if restored > 0 {
            info!(cookies = restored, "Reusing saved session cookies");
            return Ok(());
        }
        info!("No saved session, logging in");
        self.login().await
    }

    /// Run the login flow and persist the resulting cookies.
    pub async fn login(&self) -> Result<()> {
        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            ScopusError::Config("SCOPUS_USERNAME or SCOPUS_PASSWORD not set".to_string())
        })?;

        info!(url = %self.config.login_url, "Navigating to the login page");
        let response = self
            .client
            .get(self.config.login_url.clone())
            .send()
            .await?;
        let page_url = response.url().clone();
        let html = response.text().await?;

        let form = LoginForm::parse(&html, &page_url, &self.config.username_field)?;
        let action = form.action.clone();
        let fields = form.fill(
            &self.config.username_field,
            &credentials.username,
            &self.config.password_field,
            &credentials.password,
        );

        info!(action = %action, "Submitting the login form");
        let response = self.client.post(action).form(&fields).send().await?;
        let landed = response.url().clone();

        if !landed.as_str().starts_with(&self.config.landing_prefix) {
            warn!(url = %landed, expected = %self.config.landing_prefix, "Login did not reach the database");
            return Err(ScopusError::Auth(format!(
                "login ended at {} instead of {}",
                landed, self.config.landing_prefix
            )));
        }
        info!(url = %landed, "Redirected to the database");

        if let Ok(mut last) = self.last_login.lock() {
            *last = Some(Instant::now());
        }

        let cookies = self.current_cookies();
        if cookies.is_empty() {
            warn!("No cookies captured; login may have failed");
        } else {
            self.cookies.save(&cookies)?;
        }
        Ok(())
    }

    /// Log in again unless a login happened within the cooldown.
    ///
    /// Returns `true` when a login was performed.
    pub async fn relogin(&self) -> Result<bool> {
        let recent = self
            .last_login
            .lock()
            .ok()
            .and_then(|last| *last)
            .map(|t| t.elapsed() < self.config.relogin_cooldown)
            .unwrap_or(false);

        if recent {
            debug!("Re-login skipped, last login is within the cooldown");
            return Ok(false);
        }

        warn!("Session rejected, logging in again");
        self.login().await?;
        Ok(true)
    }

    /// Cookies the jar would send to the database host.
    pub fn current_cookies(&self) -> Vec<Cookie> {
        let secure = self.config.base_url.scheme() == "https";
        self.jar
            .cookies(&self.config.base_url)
            .and_then(|header| header.to_str().ok().map(str::to_string))
            .map(|header| parse_cookie_header(&header, &self.config.cookie_domain()))
            .unwrap_or_default()
            .into_iter()
            .map(|mut c| {
                c.secure = secure;
                c
            })
            .collect()
    }

    /// True when a response ended on the login form instead of the database.
    pub fn is_login_page(&self, url: &Url) -> bool {
        let login = &self.config.login_url;
        if url.host_str() != login.host_str() {
            return false;
        }
        url.path() == login.path() || url.host_str() != self.config.base_url.host_str()
    }
}

/// Cookie `domain` (possibly with a leading dot) covers `host`.
fn domain_matches(domain: &str, host: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
}

/// The login form found on the login page
#[derive(Debug)]
struct LoginForm {
    action: Url,
    fields: Vec<(String, String)>,
}

impl LoginForm {
    /// Locate the form holding `username_field` and collect its inputs.
    fn parse(html: &str, page_url: &Url, username_field: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let form_selector =
            Selector::parse("form").map_err(|e| ScopusError::Parse(e.to_string()))?;
        let input_selector =
            Selector::parse("input[name]").map_err(|e| ScopusError::Parse(e.to_string()))?;
        let user_selector = Selector::parse(&format!("input[name=\"{}\"]", username_field))
            .map_err(|e| ScopusError::Parse(e.to_string()))?;

        let form = document
            .select(&form_selector)
            .find(|f| f.select(&user_selector).next().is_some())
            .ok_or_parse("login form not found on the login page")?;

        let action = match form
            .value()
            .attr("action")
            .map(str::trim)
            .filter(|a| !a.is_empty())
        {
            Some(action) => page_url
                .join(action)
                .map_err(|e| ScopusError::Parse(format!("Invalid form action '{}': {}", action, e)))?,
            None => page_url.clone(),
        };

        let mut fields = Vec::new();
        for input in form.select(&input_selector) {
            let element = input.value();
            let Some(name) = element.attr("name") else {
                continue;
            };
            let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
            let value = element.attr("value").unwrap_or("");
            let keep = match kind.as_str() {
                "checkbox" | "radio" => element.attr("checked").is_some(),
                "submit" => value.eq_ignore_ascii_case("login"),
                "button" | "image" | "reset" | "file" => false,
                _ => true,
            };
            if keep {
                fields.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Self { action, fields })
    }

    /// Form fields with the credentials filled in.
    fn fill(
        self,
        username_field: &str,
        username: &str,
        password_field: &str,
        password: &str,
    ) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .fields
            .into_iter()
            .filter(|(name, _)| name != username_field && name != password_field)
            .collect();
        fields.push((username_field.to_string(), username.to_string()));
        fields.push((password_field.to_string(), password.to_string()));
        fields
    }
}
