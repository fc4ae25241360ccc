use actix_web::http::StatusCode;
use actix_web::{error::ResponseError, HttpResponse};
use std::fmt;
use std::error::Error as StdError;
use serde_json::json;
use log::{warn, error, debug};

// Custom error handling
#[derive(Debug)]
pub enum ApiError {
    DatabaseError(String),
    ValidationError(String),
    AuthError(String),
    ForbiddenError(String),
    NotFoundError(String),
    UpstreamError(String),
    InternalError(String),
}

impl ApiError {
    pub fn detail(&self) -> &str {
        match self {
            ApiError::DatabaseError(msg)
            | ApiError::ValidationError(msg)
            | ApiError::AuthError(msg)
            | ApiError::ForbiddenError(msg)
            | ApiError::NotFoundError(msg)
            | ApiError::UpstreamError(msg)
            | ApiError::InternalError(msg) => msg,
        }
    }
}

impl StdError for ApiError {}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            ApiError::ForbiddenError(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFoundError(msg) => write!(f, "Not found: {}", msg),
            ApiError::UpstreamError(msg) => write!(f, "Upstream failure: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => ApiError::NotFoundError("Record not found".to_string()),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::DatabaseError(msg) => error!("\x1B[1;31mDATABASE ERROR:\x1B[0m {}", msg),
            ApiError::ValidationError(msg) => warn!("\x1B[1;33mVALIDATION ERROR:\x1B[0m {}", msg),
            ApiError::AuthError(msg) => warn!("\x1B[1;33mAUTHENTICATION ERROR:\x1B[0m {}", msg),
            ApiError::ForbiddenError(msg) => warn!("\x1B[1;33mFORBIDDEN:\x1B[0m {}", msg),
            ApiError::NotFoundError(msg) => debug!("\x1B[1;36mNOT FOUND ERROR:\x1B[0m {}", msg),
            ApiError::UpstreamError(msg) => error!("\x1B[1;31mUPSTREAM ERROR:\x1B[0m {}", msg),
            ApiError::InternalError(msg) => error!("\x1B[1;31mINTERNAL SERVER ERROR:\x1B[0m {}", msg),
        }

        // Storage failures are not echoed back to clients
        let detail = match self {
            ApiError::DatabaseError(_) => "database_error",
            other => other.detail(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "detail": detail }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::ForbiddenError(_) => StatusCode::FORBIDDEN,
            ApiError::NotFoundError(_) => StatusCode::NOT_FOUND,
            ApiError::UpstreamError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
