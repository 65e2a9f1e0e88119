use crate::config::ValidationError;
use crate::store::StoreError;
use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for recipe upsert operations
pub type Result<T, E = UpsertError> = std::result::Result<T, E>;

/// Terminal outcomes of an upsert request other than success. None of these
/// are retried.
#[derive(Error, Debug)]
pub enum UpsertError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Origin not allowed")]
    ForbiddenOrigin,

    #[error("Missing or incorrect password")]
    Unauthorized,

    #[error("No usable recipes in request")]
    NoRecipes,

    #[error("Submitted recipe is not usable")]
    BadRecipe,

    #[error("Store is not configured: {0}")]
    Misconfigured(String),

    #[error("Failed to read the recipe document: {0}")]
    ReadFailed(StoreError),

    #[error("Failed to commit the recipe document: {0}")]
    WriteFailed(StoreError),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(#[from] hyper::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpsertError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpsertError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            UpsertError::ForbiddenOrigin => StatusCode::FORBIDDEN,
            UpsertError::Unauthorized => StatusCode::UNAUTHORIZED,
            UpsertError::NoRecipes | UpsertError::BadRecipe => StatusCode::BAD_REQUEST,
            UpsertError::Misconfigured(_)
            | UpsertError::ReadFailed(_)
            | UpsertError::WriteFailed(_)
            | UpsertError::InternalError(_)
            | UpsertError::RequestBodyError(_)
            | UpsertError::InvalidConfig(_)
            | UpsertError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code returned in the `error` field of the response.
    pub fn code(&self) -> &'static str {
        match self {
            UpsertError::MethodNotAllowed => "method-not-allowed",
            UpsertError::ForbiddenOrigin => "forbidden-origin",
            UpsertError::Unauthorized => "unauthorized",
            UpsertError::NoRecipes => "no-recipes",
            UpsertError::BadRecipe => "bad-recipe",
            UpsertError::Misconfigured(_) => "missing-github-config",
            UpsertError::ReadFailed(_) => "github-read-failed",
            UpsertError::WriteFailed(_) => "github-write-failed",
            UpsertError::InternalError(_)
            | UpsertError::RequestBodyError(_)
            | UpsertError::InvalidConfig(_)
            | UpsertError::Io(_) => "server-error",
        }
    }

    /// Upstream detail safe to show to the caller. Only store failures carry one.
    pub fn detail(&self) -> Option<String> {
        match self {
            UpsertError::ReadFailed(e) | UpsertError::WriteFailed(e) => Some(e.to_string()),
            _ => None,
        }
    }
}
