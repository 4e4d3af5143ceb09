//! Cookie persistence for the authenticated database session.
//!
//! Cookies captured after a successful login are written to `cookies.json`
//! so later stages (and later runs) can reuse the session without logging in
//! again. The on-disk format is a Playwright-style JSON array.

use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cookie entry matching Playwright's cookie format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(rename = "httpOnly", default)]
    pub http_only: bool,
    /// Unix timestamp in seconds; `-1` or absent for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// Session cookie for `domain` with path `/`.
    pub fn session(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: default_path(),
            secure: false,
            http_only: false,
            expires: None,
        }
    }

    /// True when the cookie carries a positive expiry that lies in the past.
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(ts) if ts > 0.0 => ts < Utc::now().timestamp() as f64,
            _ => false,
        }
    }
}

/// Split a `Cookie:` request header value (`a=1; b=2`) into cookies for `domain`.
pub fn parse_cookie_header(header: &str, domain: &str) -> Vec<Cookie> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie::session(name, value.trim(), domain))
        })
        .collect()
}

/// Cookie manager for loading and saving cookies
pub struct CookieManager {
    path: PathBuf,
}

impl CookieManager {
    /// Create a new CookieManager backed by `path`
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the cookie file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load unexpired cookies from file
    ///
    /// Returns empty vec if file doesn't exist or is invalid
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!("Cookie file not found: {:?}", self.path);
            return Vec::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Vec<Cookie>>(&content) {
                Ok(cookies) => {
                    let total = cookies.len();
                    let live: Vec<Cookie> =
                        cookies.into_iter().filter(|c| !c.is_expired()).collect();
                    if live.len() < total {
                        debug!(expired = total - live.len(), "Dropped expired cookies");
                    }
                    info!("Loaded {} cookies from {:?}", live.len(), self.path);
                    live
                }
                Err(e) => {
                    warn!("Failed to parse cookies: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read cookie file: {}", e);
                Vec::new()
            }
        }
    }

    /// Load cookies as a HashMap for easy lookup
    pub fn load_as_map(&self) -> HashMap<String, String> {
        self.load()
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect()
    }

    /// Save cookies to file
    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!("Saved {} cookies to {:?}", cookies.len(), self.path);
        Ok(())
    }

    /// Clear stored cookies
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Cleared cookies at {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_empty() {
        let manager = CookieManager::with_path(PathBuf::from("/nonexistent/path"));
        assert!(manager.load().is_empty());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = CookieManager::with_path(dir.path().join("cookies.json"));

        let mut stale = Cookie::session("old", "x", ".scopus.com");
        stale.expires = Some(1_000.0);
        let cookies = vec![Cookie::session("SCSessionID", "abc", ".scopus.com"), stale];

        manager.save(&cookies)?;
        let loaded = manager.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "SCSessionID");
        assert_eq!(
            manager.load_as_map().get("SCSessionID").map(String::as_str),
            Some("abc")
        );

        manager.clear()?;
        assert!(!manager.path().exists());
        Ok(())
    }

    #[test]
    fn test_playwright_format() -> Result<()> {
        let raw = r#"[{"name":"ezproxy","value":"v","domain":".cityu.edu.hk","path":"/","expires":-1,"httpOnly":true,"secure":true,"sameSite":"Lax"}]"#;
        let cookies: Vec<Cookie> = serde_json::from_str(raw)?;
        assert!(cookies[0].http_only);
        assert!(!cookies[0].is_expired());
        assert!(cookies[0].secure);
        assert_eq!(cookies[0].domain, ".cityu.edu.hk");
        Ok(())
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("a=1; b = two ;=skip; c=", "host.example");
        let names: Vec<&str> = cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(cookies[1].value, "two");
        assert_eq!(cookies[2].value, "");
        assert!(cookies.iter().all(|c| c.domain == "host.example"));
    }
}
