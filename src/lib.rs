//! # scopus-miscite
//!
//! Scopus miscitation dataset pipeline: cited → miscited → citing documents.
//!
//! ## Modules
//!
//! - [`titles`] - Stage 1, titles through the document-details JSON endpoint
//! - [`miscited`] - Stage 2, secondary-document search per cited title
//! - [`citing`] - Stage 3, cited-by search per miscited document
//! - [`combine`] - Stage 4, join of the three tiers
//! - [`references`] - Stage 5, reference lists of the citing documents
//! - [`filter`] - Title-overlap filter over the joined tables
//! - [`session`] - Authenticated session and login flow
//! - [`browser`] - Page renderers (HTTP session or Browserless)
//! - [`search`] - Result-list URLs and HTML parsing
//! - [`cookies`] - Cookie persistence
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scopus_miscite::{combine, config::Layout};
//!
//! fn main() -> anyhow::Result<()> {
//!     let rows = combine::write_miscitations(&Layout::new("./data"))?;
//!     println!("Combined {} rows", rows);
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod citing;
pub mod combine;
pub mod config;
pub mod cookies;
pub mod error;
pub mod filter;
pub mod harvest;
pub mod logging;
pub mod miscited;
pub mod pipeline;
pub mod records;
pub mod references;
pub mod search;
pub mod session;
pub mod status;
pub mod titles;

#[cfg(test)]
mod testing;

pub use error::{Result, ScopusError};
