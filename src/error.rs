//! Error types for provisioning, readiness detection and customer storage.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the container engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container engine unreachable: {0}")]
    Unavailable(String),

    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("{0}")]
    Other(String),
}

/// Outcome of a readiness wait that did not succeed.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {timeout:?} waiting for '{pattern}' to appear {required} times (seen {observed})")]
    Timeout {
        pattern: String,
        required: usize,
        observed: usize,
        timeout: Duration,
    },

    #[error("log stream ended after '{pattern}' appeared {observed} of {required} times")]
    StreamEnded {
        pattern: String,
        required: usize,
        observed: usize,
    },

    #[error("error reading log stream: {0}")]
    Stream(#[source] RuntimeError),
}

impl WaitError {
    /// Number of matching lines seen before the wait gave up.
    pub fn observed(&self) -> Option<usize> {
        match self {
            WaitError::Timeout { observed, .. } | WaitError::StreamEnded { observed, .. } => {
                Some(*observed)
            }
            WaitError::Stream(_) => None,
        }
    }
}

/// Errors raised while provisioning or tearing down a database instance.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to connect to container engine: {0}")]
    RuntimeUnavailable(#[source] RuntimeError),

    #[error("seed file {path:?} is not usable: {source}")]
    SeedFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("no free host port found after {attempts} attempts")]
    PortExhausted { attempts: usize },

    #[error("container engine rejected instance creation: {0}")]
    Create(#[source] RuntimeError),

    #[error("failed to start container {id}: {source}")]
    Start {
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("container {id} never became ready: {source}")]
    Readiness {
        id: String,
        #[source]
        source: WaitError,
    },

    #[error("failed to tear down container {id}: {source}")]
    Teardown {
        id: String,
        #[source]
        source: RuntimeError,
    },
}

impl ProvisionError {
    /// Whether a fresh provisioning attempt could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::PortExhausted { .. }
                | ProvisionError::Readiness {
                    source: WaitError::Timeout { .. },
                    ..
                }
        )
    }
}

/// Errors returned by [`crate::storage::CustomerRepository`].
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unable to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("no customer with email {email}")]
    NotFound { email: String },

    #[error("expected to delete exactly one customer with email {email}, affected {affected}")]
    UnexpectedRowCount { email: String, affected: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
pub type RepoResult<T> = Result<T, RepoError>;
