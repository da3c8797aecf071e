//! HTTP mapping of [`Error`].
//!
//! Authorization failures share one body whatever the reason; collaborator
//! failures are logged and answered with a generic message.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::error::{Error, Result};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::InvalidOrExpired => (
                StatusCode::BAD_REQUEST,
                "Invalid or expired token".to_string(),
            ),
            Self::RevocationStore(err) => {
                error!("Revocation store failure: {err}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Authentication service unavailable".to_string(),
                )
            }
            Self::Search(err) => {
                error!("Search failure: {err}");
                (StatusCode::BAD_GATEWAY, "Search error".to_string())
            }
            Self::Storage(err) => {
                error!("Storage failure: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Internal(err) => {
                error!("Internal failure: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Unwrap a JSON body, turning a rejection into a validation error.
pub(crate) fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::Validation(rejection.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kv::KvError, storage::StoreError};

    #[test]
    fn status_codes() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::InvalidOrExpired, StatusCode::BAD_REQUEST),
            (
                Error::RevocationStore(KvError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::Storage(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
