//! Local stand-ins for the database used by the unit tests.

use crate::browser::PageRenderer;
use crate::config::{Credentials, ScopusConfig};
use crate::error::Result;
use crate::harvest::{Harvester, PoliteDelay};
use crate::search::Paging;
use crate::session::Session;
use axum::{
    extract::Form,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use url::Url;

/// Serve `app` on an ephemeral local port and return its base URL (with trailing `/`).
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{}/", addr)
}

fn login_form() -> Html<&'static str> {
    Html(
        r#"<html><body>
          <form method="post" action="/login">
            <input type="hidden" name="state" value="abc">
            <input type="text" name="cred_userid_inputtext">
            <input type="password" name="cred_password_inputtext">
            <input type="submit" name="go" value="Login">
          </form>
        </body></html>"#,
    )
}

/// Login form at `/login` that sets `session=granted` and redirects to `/home`
/// when the posted credentials match.
pub fn login_app(user: &'static str, pass: &'static str) -> Router {
    Router::new()
        .route(
            "/login",
            get(|| async { login_form() }).post(
                move |Form(fields): Form<HashMap<String, String>>| async move {
                    let ok = fields.get("cred_userid_inputtext").map(String::as_str) == Some(user)
                        && fields.get("cred_password_inputtext").map(String::as_str) == Some(pass)
                        && fields.get("state").map(String::as_str) == Some("abc");
                    if ok {
                        Response::builder()
                            .status(StatusCode::SEE_OTHER)
                            .header(header::SET_COOKIE, "session=granted; Path=/")
                            .header(header::LOCATION, "/home")
                            .body(axum::body::Body::empty())
                            .expect("redirect response")
                    } else {
                        login_form().into_response()
                    }
                },
            ),
        )
        .route("/home", get(|| async { "welcome" }))
}

/// Result-list HTML with one record link per `(eid, title)`.
pub fn results_html(rows: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body><table>");
    for (eid, title) in rows {
        html.push_str(&format!(
            r#"<tr><td><a href="/record/display.uri?eid={}&amp;origin=resultslist">{}</a></td></tr>"#,
            eid, title
        ));
    }
    html.push_str("</table></body></html>");
    html
}

/// Zero-hits result page.
pub fn no_results_html() -> String {
    r#"<html><body><span data-testid="no-results-with-suggestion">No documents found</span></body></html>"#
        .to_string()
}

/// In-memory renderer answering from canned pages.
///
/// A page is chosen by the first needle contained in the URL with its query
/// decoded (`path?k=v&k=v`). Unmatched URLs render an unrecognized page.
#[derive(Default)]
pub struct StaticRenderer {
    pages: Vec<(Vec<String>, String)>,
    requests: Mutex<Vec<String>>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for URLs containing every one of `needles`.
    pub fn page(mut self, needles: &[&str], html: impl Into<String>) -> Self {
        self.pages
            .push((needles.iter().map(|n| n.to_string()).collect(), html.into()));
        self
    }

    /// Decoded URLs requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn decoded(url: &Url) -> String {
    let query: Vec<String> = url
        .query_pairs()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}?{}", url.path(), query.join("&"))
}

impl PageRenderer for StaticRenderer {
    fn name(&self) -> &'static str {
        "static"
    }

    fn render<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String>> {
        let target = decoded(url);
        self.requests
            .lock()
            .expect("requests lock")
            .push(target.clone());
        let html = self
            .pages
            .iter()
            .find(|(needles, _)| needles.iter().all(|n| target.contains(n.as_str())))
            .map(|(_, html)| html.clone())
            .unwrap_or_else(|| "<html><body>Access denied</body></html>".to_string());
        Box::pin(async move { Ok(html) })
    }
}

/// Session against a local server built by [`login_app`], landing on `/home`.
pub fn test_session(base: &str, credentials: Option<(&str, &str)>, dir: &Path) -> Result<Arc<Session>> {
    let mut config = ScopusConfig::new(base, &format!("{}login", base))?;
    config.landing_prefix = format!("{}home", base);
    let config = config.with_credentials(
        credentials.and_then(|(u, p)| Credentials::from_parts(Some(u.to_string()), Some(p.to_string()))),
    );
    Ok(Arc::new(Session::new(config, dir.join("cookies.json"))?))
}

/// Harvester over `renderer` with default paging and no pauses.
pub fn static_harvester(renderer: Arc<StaticRenderer>) -> Harvester {
    let base = Url::parse("https://www.scopus.com/").expect("static base URL");
    Harvester::new(renderer, base, Paging::default(), PoliteDelay::none())
}
