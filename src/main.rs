//! scopus-miscite - Scopus miscitation dataset pipeline
//!
//! Builds the cited → miscited → citing dataset stage by stage inside one
//! working directory.
//!
//! ## Usage
//!
//! ```bash
//! scopus-miscite --workdir ./data run
//! scopus-miscite --workdir ./data references
//! scopus-miscite --workdir ./data filter --threshold 0.3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scopus_miscite::browser::{BrowserlessRenderer, PageRenderer, SessionRenderer};
use scopus_miscite::config::{
    parse_flag, Credentials, Layout, ScopusConfig, DEFAULT_BASE_URL, DEFAULT_LOGIN_URL, DEFAULT_PROXY_BASE_URL,
};
use scopus_miscite::cookies::CookieManager;
use scopus_miscite::harvest::{Harvester, PoliteDelay};
use scopus_miscite::logging::{init_tracing, StageLog};
use scopus_miscite::pipeline::{Pipeline, DEFAULT_CHUNK_SIZE};
use scopus_miscite::search::Paging;
use scopus_miscite::session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

// ============================================================================
// CLI Definition
// ============================================================================

/// Scopus miscitation dataset pipeline
#[derive(Parser)]
#[command(name = "scopus-miscite")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Working directory holding eid.csv and every stage output
    #[arg(short, long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log to stderr as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Authenticated HTTP session
    Session,
    /// External Browserless instance fed with the session cookies
    Browserless,
}

#[derive(clap::Args)]
struct ConnectionArgs {
    /// Login username
    #[arg(long, global = true, env = "SCOPUS_USERNAME")]
    username: Option<String>,

    /// Login password
    #[arg(long, global = true, env = "SCOPUS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Direct database base URL
    #[arg(long, global = true, env = "SCOPUS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Go through the library proxy (true/false)
    #[arg(long, global = true, env = "SCOPUS_VIA_PROXY", num_args = 0..=1, default_missing_value = "true")]
    via_proxy: Option<String>,

    /// Database base URL behind the library proxy
    #[arg(long, global = true, env = "SCOPUS_BASE_URL_VIA_PROXY", default_value = DEFAULT_PROXY_BASE_URL)]
    proxy_base_url: String,

    /// Login form entry point
    #[arg(long, global = true, env = "SCOPUS_LOGIN_URL", default_value = DEFAULT_LOGIN_URL)]
    login_url: String,

    /// Page rendering backend
    #[arg(long, global = true, env = "SCOPUS_BROWSER", value_enum, default_value = "session")]
    browser: Backend,

    /// Browserless root URL
    #[arg(long, global = true, env = "BROWSERLESS_URL", default_value = "http://localhost:3000")]
    browserless_url: String,

    /// Browserless API token
    #[arg(long, global = true, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    browserless_token: Option<String>,

    /// Results requested per result-list page
    #[arg(long, global = true, default_value = "200")]
    page_size: u32,

    /// Maximum pages read per result list
    #[arg(long, global = true, default_value = "10")]
    max_pages: u32,

    /// Base pause between page renders, in milliseconds
    #[arg(long, global = true, default_value = "1500")]
    delay_ms: u64,

    /// Random extra pause added to each render, in milliseconds
    #[arg(long, global = true, default_value = "1500")]
    jitter_ms: u64,

    /// Items processed between status.csv rewrites
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and save the session cookies
    Login,
    /// Stage 1: resolve titles for eid.csv
    Titles,
    /// Stage 2: secondary-document search per cited title
    Miscited,
    /// Stage 3: cited-by search per miscited document
    Citing,
    /// Stage 4: join the three tiers into overall_miscitations.csv
    Combine,
    /// Split the combined tables with the title-overlap rule
    Filter {
        /// Share of extra words tolerated before a row is flagged
        #[arg(long, default_value = "0.3")]
        threshold: f64,
    },
    /// Stage 5: reference lists of the citing documents
    References,
    /// Stages 1 to 4 in order
    Run,
    /// Manage cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Clear stored cookies
    Clear,
    /// Show cookie file path
    Path,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    // Variables from <workdir>/.env never override ones already set.
    if dotenvy::from_path(cli.workdir.join(".env")).is_ok() {
        cli = Cli::parse();
    }

    let stage_log = init_tracing(cli.debug, cli.log_json);

    std::fs::create_dir_all(&cli.workdir)
        .with_context(|| format!("Failed to create working directory {}", cli.workdir.display()))?;
    let layout = Layout::new(&cli.workdir);

    let result = dispatch(cli, layout, stage_log).await;
    if let Err(e) = &result {
        error!(error = %e, "Stopped");
    }
    result
}

async fn dispatch(cli: Cli, layout: Layout, stage_log: StageLog) -> Result<()> {
    match cli.command {
        Commands::Cookies { action } => handle_cookies(&layout, action),
        Commands::Login => {
            let session = build_session(&cli.connection, &layout)?;
            session.login().await.context("Login failed")?;
            println!("Logged in; cookies saved to {}", layout.cookies_json().display());
            Ok(())
        }
        command => {
            let pipeline = build_pipeline(&cli.connection, layout, stage_log)?;
            run_command(pipeline, command).await
        }
    }
}

async fn run_command(pipeline: Pipeline, command: Commands) -> Result<()> {
    match command {
        Commands::Titles => {
            let summary = pipeline.titles().await.context("Title stage failed")?;
            println!(
                "Titles: {} identifiers, {} fetched, {} already known, {} failed",
                summary.input, summary.fetched, summary.skipped, summary.failed
            );
        }
        Commands::Miscited => {
            let summary = pipeline.miscited().await.context("Miscited stage failed")?;
            println!("Miscited: {}", summary);
        }
        Commands::Citing => {
            let summary = pipeline.citing().await.context("Citing stage failed")?;
            println!("Citing: {}", summary);
        }
        Commands::Combine => {
            let rows = pipeline.combine().context("Combine stage failed")?;
            println!("Combined {} miscitation rows", rows);
        }
        Commands::Filter { threshold } => {
            let summary = pipeline
                .with_threshold(threshold)
                .filter()
                .context("Filter failed")?;
            println!(
                "Filter: {} per-EID tables, overall {} flagged / {} kept",
                summary.cited_tables, summary.filtered, summary.cleaned
            );
        }
        Commands::References => {
            let summary = pipeline.references().await.context("Reference stage failed")?;
            println!("References: {}", summary);
        }
        Commands::Run => {
            let rows = pipeline.run().await.context("Pipeline failed")?;
            println!("Pipeline complete: {} miscitation rows", rows);
        }
        Commands::Login | Commands::Cookies { .. } => {}
    }
    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

fn build_session(args: &ConnectionArgs, layout: &Layout) -> Result<Arc<Session>> {
    let via_proxy = args.via_proxy.as_deref().map(parse_flag).unwrap_or(false);
    let base = ScopusConfig::select_base(via_proxy, &args.base_url, &args.proxy_base_url);
    let config = ScopusConfig::new(&base, &args.login_url)
        .context("Invalid connection settings")?
        .with_credentials(Credentials::from_parts(
            args.username.clone(),
            args.password.clone(),
        ));
    info!(base_url = %config.base_url, via_proxy, "Database connection");

    let session = Session::new(config, layout.cookies_json()).context("Failed to create session")?;
    Ok(Arc::new(session))
}

fn build_pipeline(args: &ConnectionArgs, layout: Layout, stage_log: StageLog) -> Result<Pipeline> {
    let session = build_session(args, &layout)?;

    let renderer: Arc<dyn PageRenderer> = match args.browser {
        Backend::Session => Arc::new(SessionRenderer::new(Arc::clone(&session))),
        Backend::Browserless => Arc::new(
            BrowserlessRenderer::new(
                &args.browserless_url,
                args.browserless_token.as_deref(),
                Arc::clone(&session),
            )
            .context("Failed to set up Browserless")?,
        ),
    };
    info!(backend = renderer.name(), "Page renderer");

    let harvester = Harvester::new(
        renderer,
        session.config().base_url.clone(),
        Paging {
            page_size: args.page_size.max(1),
            max_pages: args.max_pages.max(1),
        },
        PoliteDelay {
            base: Duration::from_millis(args.delay_ms),
            jitter: Duration::from_millis(args.jitter_ms),
        },
    );

    Ok(Pipeline::new(layout, session, harvester, stage_log).with_chunk_size(args.chunk_size))
}

fn handle_cookies(layout: &Layout, action: CookieAction) -> Result<()> {
    let manager = CookieManager::with_path(layout.cookies_json());

    match action {
        CookieAction::Clear => {
            manager.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Path => {
            println!("Cookie file: {:?}", manager.path());
        }
    }

    Ok(())
}
