//! Shared utilities for pdfharvest integration tests.
//!
//! - `TestHarness`: a migrated in-memory SQLite queue plus a local HTTP
//!   server serving fixture documents
//! - builders for document bodies, extractors and settings

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{Fixture, FixtureServer, TestHarness};
