use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use faceprint_core::{DecodeError, EmbedError};
use serde::Serialize;
use std::fmt::{self, Display};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            code,
            detail: detail.into(),
        }
    }

    pub fn bad_request(code: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.code,
            detail: self.detail,
        });
        (self.status, body).into_response()
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.code, self.detail, self.status)
    }
}

impl std::error::Error for ApiError {}

impl From<DecodeError> for ApiError {
    fn from(value: DecodeError) -> Self {
        let code = match value {
            DecodeError::EmptyInput => "EMPTY_INPUT",
            DecodeError::InvalidImage => "INVALID_IMAGE",
        };
        Self::bad_request(code, value.to_string())
    }
}

impl From<EmbedError> for ApiError {
    fn from(value: EmbedError) -> Self {
        match value {
            EmbedError::Decode(e) => e.into(),
            EmbedError::Pipeline(e) => {
                tracing::error!(error = %e, "embedding pipeline failed");
                Self::internal(e.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_codes() {
        let empty = ApiError::from(DecodeError::EmptyInput);
        assert_eq!(empty.status, StatusCode::BAD_REQUEST);
        assert_eq!(empty.code, "EMPTY_INPUT");
        assert_eq!(empty.detail, "empty file");

        let invalid = ApiError::from(EmbedError::Decode(DecodeError::InvalidImage));
        assert_eq!(invalid.code, "INVALID_IMAGE");
        assert_eq!(invalid.detail, "invalid image");
    }
}
