//! Constants for the download module (timeouts, buffer sizes).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum silence between received chunks (30 seconds).
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Write buffer capacity for streaming bodies to the temp file.
pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("harvester/", env!("CARGO_PKG_VERSION"));
