//! Harvest Core Library
//!
//! This library persists media artifacts discovered by an external producer
//! (browser scraping, API pagination) to a destination directory: with
//! bounded concurrency, stall detection, retries, extension-independent
//! dedup, and atomic finalize with best-effort metadata embedding.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`dedup`] - Extension-independent "already downloaded" checks
//! - [`download`] - Single-transfer executor with a stall timer
//! - [`postprocess`] - Metadata embedding and atomic finalize
//! - [`retry`] - Failure classification and retry decisions
//! - [`scheduler`] - FIFO queue, worker budget, backpressure
//! - [`coordinator`] - Run lifecycle and statistics
//! - [`producer`] - Manifest-driven producer
//! - [`config`] - TOML-backed run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod postprocess;
pub mod producer;
pub mod retry;
pub mod scheduler;
pub mod task;

// Re-export commonly used types
pub use config::HarvestConfig;
pub use coordinator::{HarvestCoordinator, RunStats, RunSummary};
pub use error::HarvestError;
pub use producer::{ManifestProducer, ProducerReport};
pub use scheduler::{BackpressureSignal, QueueState, Scheduler, SubmitOutcome};
pub use task::{Task, TaskId, TaskKind, TaskMetadata, TaskStatus};
