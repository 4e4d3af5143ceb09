//! Tracing setup: a console layer plus a file layer that follows the stage
//! currently running, so each stage keeps its own companion log file.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Log sink whose target file can be switched while the subscriber is live.
#[derive(Clone, Default)]
pub struct StageLog {
    file: Arc<Mutex<Option<File>>>,
}

impl StageLog {
    /// Append subsequent events to `path`, creating it and its directory if needed.
    pub fn attach(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut slot = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stage log lock poisoned"))?;
        *slot = Some(file);
        Ok(())
    }

    /// Stop writing to the current file.
    pub fn detach(&self) {
        if let Ok(mut slot) = self.file.lock() {
            *slot = None;
        }
    }
}

/// Writer handed out per event
pub struct StageWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for StageWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stage log lock poisoned"))?;
        match slot.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stage log lock poisoned"))?;
        match slot.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for StageLog {
    type Writer = StageWriter;

    fn make_writer(&'a self) -> Self::Writer {
        StageWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `debug`.
///
/// Returns the stage log handle the pipeline attaches companion files to.
pub fn init_tracing(debug: bool, json: bool) -> StageLog {
    let stage_log = StageLog::default();

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if json {
        fmt::layer()
            .json()
            .with_writer(io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(io::stderr)
            .boxed()
    };

    let file = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(stage_log.clone())
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    stage_log
}
