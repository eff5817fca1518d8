use std::io::Error as IoError;

use thiserror::Error;

/// Startup failures of the agent binary. Probe failures never surface
/// here; they are normalized into the execute response instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("server error: {0:#}")]
    Io(#[from] IoError),
    #[error("invalid listen address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}
