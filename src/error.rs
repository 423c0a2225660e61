use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache file {} is locked by another writer", .0.display())]
    LockContended(PathBuf),
    #[error("listener failed: {0}")]
    Listener(#[source] anyhow::Error),
    #[error("backend failed: {0}")]
    Backend(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
