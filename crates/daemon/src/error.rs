//! Error types for the daemon

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Common(#[from] launchgate_common::Error),

    /// The run process could not be started
    #[error("Failed to spawn '{entrypoint}': {message}")]
    Spawn { entrypoint: String, message: String },

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
