use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::pipeline::{Field, SubmitError};
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("invalid {field}: {reason}")] InvalidInput { field: Field, reason: &'static str },
    #[error("{field} too large")] PayloadTooLarge { field: Field },
    #[error("too many submissions, try again later")] RateLimited { retry_after_secs: u64 },
    #[error("service temporarily unavailable")] Unavailable,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            other => {
                log::error!("store error: {other}");
                ApiError::Unavailable
            }
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Forbidden => ApiError::Forbidden,
            SubmitError::InvalidInput { field, reason } => ApiError::InvalidInput { field, reason },
            SubmitError::InputTooLarge { field, .. } => ApiError::PayloadTooLarge { field },
            // round up so clients never retry a moment too early
            SubmitError::RateLimited { retry_after } => ApiError::RateLimited {
                retry_after_secs: retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0),
            },
            SubmitError::StorageUnavailable => ApiError::Unavailable,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::InvalidInput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let field = match self {
            ApiError::InvalidInput { field, .. } | ApiError::PayloadTooLarge { field } => Some(*field),
            _ => None,
        };
        let mut res = HttpResponse::build(self.status_code());
        if let ApiError::RateLimited { retry_after_secs } = self {
            res.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
        }
        res.json(ApiErrorBody { error: self.to_string(), field })
    }
}
