use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;
use crate::thread_path::ThreadPathError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("{0}")] BadRequest(String),
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Forbidden => ApiError::Forbidden,
            RepoError::Invalid(msg) => ApiError::BadRequest(msg),
            RepoError::Internal(msg) => {
                tracing::error!(error = %msg, "comment store failure");
                ApiError::Internal
            }
        }
    }
}

// Rejected or undecodable thread paths look like unknown ones.
impl From<ThreadPathError> for ApiError {
    fn from(_: ThreadPathError) -> Self {
        ApiError::NotFound
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
