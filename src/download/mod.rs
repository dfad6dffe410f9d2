//! Network transfer of a single artifact into a temp file.
//!
//! This module provides the [`DownloadExecutor`], which streams one response
//! body to disk under a stall timer, and the naming helpers that give
//! artifacts their extension-independent identity.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large videos)
//! - Stall detection instead of a total-time timeout
//! - Temp files distinct from the final artifact path
//! - Extension resolution from the name, Content-Type, URL, or kind
//! - Cancellation of in-flight requests
//!
//! # Example
//!
//! ```no_run
//! use harvest_core::download::{DownloadExecutor, DownloadResult, HttpClient};
//! use harvest_core::Task;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = DownloadExecutor::new(HttpClient::new()?, "./media");
//! let task = Task::new("https://cdn.example.com/p/123", "post_123");
//! match executor.execute(&task, &CancellationToken::new()).await {
//!     DownloadResult::Success(file) => println!("temp file: {}", file.temp_path.display()),
//!     DownloadResult::Failure { error, .. } => eprintln!("failed: {error}"),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod executor;
pub mod filename;

pub use client::{ClientBuildError, HttpClient, HttpClientOptions};
pub use error::DownloadError;
pub use executor::{DownloadExecutor, DownloadResult, DownloadedFile, temp_path_in};
