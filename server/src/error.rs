use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorBody, JobId, ValidationError};
use thiserror::Error;

use crate::runner::ExecError;
use crate::store::InvalidTransition;

/// Falla al acomodar los assets subidos en `buildDir`.
#[derive(Debug, Error)]
#[error("Failed to process uploaded files: {action} '{}': {source}", .path.display())]
pub struct StagingError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl StagingError {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{program} is not installed on the server")]
    ToolchainMissing { program: String },

    #[error("Could not locate generated package file (searched: {})", display_paths(.searched))]
    ArtifactNotFound { searched: Vec<PathBuf> },

    #[error("Build failed: `{step}` exited with {code}: {detail}")]
    CommandFailed {
        step: String,
        code: String,
        detail: String,
    },

    #[error("Build failed: {0}")]
    Exec(#[from] ExecError),

    #[error("Build failed: {action} '{}': {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error de una etapa del pipeline; su mensaje termina en `errorDetail`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("job {0} was removed while building")]
    JobVanished(JobId),

    #[error("Internal error: {0}")]
    Transition(#[from] InvalidTransition),
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Job not found")]
    NotFound,

    #[error("Job {0} is still building")]
    Busy(JobId),

    #[error("failed to remove '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("job id {0} already exists")]
    DuplicateId(JobId),
}

/// Error de la capa HTTP: cada variante sabe su status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("File too large (max {0} bytes)")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CleanupError> for ApiError {
    fn from(err: CleanupError) -> Self {
        match err {
            CleanupError::NotFound => ApiError::NotFound,
            CleanupError::Busy(_) => ApiError::Conflict(err.to_string()),
            CleanupError::Io { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<CreateError> for ApiError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::Validation(v) => ApiError::Validation(v),
            CreateError::DuplicateId(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
