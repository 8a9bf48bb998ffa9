//! Bootstrap/configuration-level errors.
//!
//! Per-call POSIX failures do not go through this type — those are plain
//! `libc` errno (`i32`) values threaded through the backing adapter and
//! the core replication logic, surfaced to the kernel via `reply.error(..)`.
//! This enum only covers what can go wrong before or while standing the
//! whole thing up.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum AppError {
    InvalidSlaveCount(i64),
    CreateDir { path: PathBuf, source: std::io::Error },
    Mount { mount_point: PathBuf, source: std::io::Error },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidSlaveCount(n) => {
                write!(f, "--nbr-slaves must be >= 1, got {n}")
            }
            AppError::CreateDir { path, source } => {
                write!(f, "failed to create directory {}: {source}", path.display())
            }
            AppError::Mount { mount_point, source } => {
                write!(f, "failed to mount {}: {source}", mount_point.display())
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::InvalidSlaveCount(_) => None,
            AppError::CreateDir { source, .. } => Some(source),
            AppError::Mount { source, .. } => Some(source),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
