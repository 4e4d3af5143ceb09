//! Pipeline configuration: file layout of the working directory and the
//! connection settings for the database session.

use crate::error::{Result, ScopusError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Direct database base URL
pub const DEFAULT_BASE_URL: &str = "https://www.scopus.com/";

/// Base URL when reaching the database through the library EZproxy
pub const DEFAULT_PROXY_BASE_URL: &str = "https://www-scopus-com.ezproxy.cityu.edu.hk/";

/// EZproxy login entry point
pub const DEFAULT_LOGIN_URL: &str =
    "https://lbapp01.lib.cityu.edu.hk/ezlogin/index.aspx?url=https%3a%2f%2fwww.scopus.com";

/// Browser-like user agent sent with every request
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Public record-page URL used for every link column
pub const RECORD_URL: &str = "https://www.scopus.com/record/display.url";

/// Canonical record link for an EID.
pub fn record_link(eid: &str) -> String {
    format!("{}?eid={}&origin=resultslist", RECORD_URL, eid)
}

/// Every path the pipeline reads or writes, relative to one working directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn eid_csv(&self) -> PathBuf {
        self.root.join("eid.csv")
    }

    pub fn titles_csv(&self) -> PathBuf {
        self.root.join("eid_with_titles.csv")
    }

    pub fn titles_log(&self) -> PathBuf {
        self.root.join("eid_with_titles.log")
    }

    pub fn cookies_json(&self) -> PathBuf {
        self.root.join("cookies.json")
    }

    pub fn miscited_dir(&self) -> PathBuf {
        self.root.join("miscited_downloads")
    }

    /// `miscited_downloads/<CITED>.csv`
    pub fn miscited_csv(&self, cited_eid: &str) -> PathBuf {
        self.miscited_dir().join(format!("{}.csv", cited_eid))
    }

    pub fn miscited_status_csv(&self) -> PathBuf {
        self.miscited_dir().join("status.csv")
    }

    pub fn miscited_log(&self) -> PathBuf {
        self.miscited_dir().join("miscited_download.log")
    }

    pub fn citing_dir(&self) -> PathBuf {
        self.root.join("citing_downloads")
    }

    /// `citing_downloads/<CITED>/<MISCITED>.csv`
    pub fn citing_csv(&self, cited_eid: &str, miscited_eid: &str) -> PathBuf {
        self.citing_dir()
            .join(cited_eid)
            .join(format!("{}.csv", miscited_eid))
    }

    pub fn citing_status_csv(&self) -> PathBuf {
        self.citing_dir().join("status.csv")
    }

    pub fn citing_log(&self) -> PathBuf {
        self.citing_dir().join("citing_download.log")
    }

    pub fn references_dir(&self) -> PathBuf {
        self.root.join("references_of_citing_downloads")
    }

    /// `references_of_citing_downloads/<CITING>.csv`
    pub fn references_csv(&self, citing_eid: &str) -> PathBuf {
        self.references_dir().join(format!("{}.csv", citing_eid))
    }

    pub fn references_status_csv(&self) -> PathBuf {
        self.references_dir().join("status.csv")
    }

    pub fn references_log(&self) -> PathBuf {
        self.references_dir()
            .join("references_of_citing_download.log")
    }

    pub fn overall_references_csv(&self) -> PathBuf {
        self.root.join("overall_references_of_citing.csv")
    }

    pub fn by_eid_dir(&self) -> PathBuf {
        self.root.join("miscitations_by_eid")
    }

    /// `miscitations_by_eid/<CITED>/miscitations.csv`
    pub fn by_eid_csv(&self, cited_eid: &str) -> PathBuf {
        self.by_eid_dir().join(cited_eid).join("miscitations.csv")
    }

    pub fn overall_csv(&self) -> PathBuf {
        self.root.join("overall_miscitations.csv")
    }

    pub fn combine_log(&self) -> PathBuf {
        self.root.join("overall_miscitations.log")
    }

    pub fn overall_filtered_csv(&self) -> PathBuf {
        self.root.join("overall_filtered.csv")
    }

    pub fn overall_cleaned_csv(&self) -> PathBuf {
        self.root.join("overall_cleaned.csv")
    }

    pub fn filter_log(&self) -> PathBuf {
        self.root.join("overall_filtered.log")
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Login credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both values must be present and non-empty.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Self {
                username: u,
                password: p,
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings for the authenticated session.
#[derive(Debug, Clone)]
pub struct ScopusConfig {
    /// Base URL every endpoint is joined onto (always ends with `/`)
    pub base_url: Url,
    /// Login form entry point
    pub login_url: Url,
    /// Prefix of the URL the login flow must end on
    pub landing_prefix: String,
    /// Name of the username input in the login form
    pub username_field: String,
    /// Name of the password input in the login form
    pub password_field: String,
    pub credentials: Option<Credentials>,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Minimum time between two logins
    pub relogin_cooldown: Duration,
}

impl ScopusConfig {
    /// Build a config for the given base URL; the landing prefix defaults to the base.
    pub fn new(base_url: &str, login_url: &str) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let login_url = Url::parse(login_url)
            .map_err(|e| ScopusError::Config(format!("Invalid login URL '{}': {}", login_url, e)))?;

        Ok(Self {
            landing_prefix: base_url.as_str().to_string(),
            base_url,
            login_url,
            username_field: "cred_userid_inputtext".to_string(),
            password_field: "cred_password_inputtext".to_string(),
            credentials: None,
            user_agent: USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            relogin_cooldown: Duration::from_secs(60),
        })
    }

    /// Pick the proxy or direct base URL the way the `SCOPUS_VIA_PROXY` switch does.
    pub fn select_base(via_proxy: bool, direct: &str, proxied: &str) -> String {
        if via_proxy {
            proxied.to_string()
        } else {
            direct.to_string()
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Resolve a path relative to the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ScopusError::Config(format!("Invalid endpoint '{}': {}", path, e)))
    }

    /// Host cookies are stored and replayed for.
    pub fn cookie_domain(&self) -> String {
        self.base_url.host_str().unwrap_or_default().to_string()
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized)
        .map_err(|e| ScopusError::Config(format!("Invalid base URL '{}': {}", raw, e)))
}

/// Interpret an environment-style boolean (`1`, `true`, `yes`, `on`).
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
