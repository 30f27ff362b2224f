//! Error types for the server manager and its collaborators

use composition_system::PipelineError;
use harbor_types::InvalidTransition;
use std::{io::Error as IoError, path::PathBuf, time::Duration};
use thiserror::Error;

/// Storage collaborator failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, IoError),

    #[error("Failed to serialize server {0}: {1}")]
    Serialization(String, serde_json::Error),

    #[error("Failed to deserialize {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("Storage call for server {0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Container collaborator failures
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("Inspecting container {0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("Container engine unavailable: {0}")]
    Unavailable(String),
}

/// Server manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("A server named {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid server name {0:?}: {1}")]
    InvalidName(String, &'static str),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Failed to persist server: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Failed to inspect server: {0}")]
    Inspection(#[from] InspectionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
