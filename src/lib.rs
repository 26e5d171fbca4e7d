//! Confluence - per-student timeline synchronization for classroom studies
//!
//! Confluence merges three independently recorded streams into one timeline per
//! student: the learning system's action log, webcam affect predictions, and
//! human-coded classroom observations. The pipeline is deterministic:
//! table adaptation → observation linking → grouping → windowed sweep →
//! merged CSV + coverage report.
//!
//! ## Modules
//!
//! - **Adapters / Linker**: Read the raw tables into typed streams
//! - **Engine**: Forward-only cursor sweep attaching predictions and observations
//! - **Coverage**: Set-difference accounting of every input record

pub mod adapters;
pub mod config;
pub mod coverage;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod grouper;
pub mod linker;
pub mod normalizer;
pub mod pipeline;
pub mod probability;
pub mod table;
pub mod types;

pub use config::{SyncConfig, WindowConfig};
pub use coverage::{CoverageReport, CoverageReporter};
pub use error::SyncError;
pub use pipeline::{link_files, synchronize_files, SyncInputs, SyncProcessor};

/// Confluence version embedded in coverage reports
pub const CONFLUENCE_VERSION: &str = env!("CARGO_PKG_VERSION");
