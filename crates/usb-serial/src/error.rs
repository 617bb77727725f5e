//! Crate error types.

use thiserror::Error;

use crate::transport::TransferError;

#[derive(Debug, Error)]
pub enum Error {
    /// A sync primitive was called on an async-mode port, or vice versa.
    /// Reported synchronously; never fatal to the port.
    #[error("operation not valid in this port mode")]
    WrongMode,

    #[error("port is closed")]
    PortClosed,

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
