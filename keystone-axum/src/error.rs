//! # Errors (Feathers-style)
//!
//! Every failure leaves the server as the same JSON shape:
//!
//! ```json
//! { "name": "NotFound", "message": "...", "code": 404, "className": "not-found" }
//! ```
//!
//! Handlers return [`ApiAxumError`], which wraps an `anyhow::Error`. An
//! [`ApiError`] anywhere in the chain keeps its kind; anything else becomes a
//! `GeneralError`.

use std::fmt;

use anyhow::Error as AnyError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keystone_staging::StagingError;
use serde_json::{json, Value};

/// Feathers-ish error class names + status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,      // 400
    NotFound,        // 404
    Conflict,        // 409
    PayloadTooLarge, // 413
    Unprocessable,   // 422
    GeneralError,    // 500
    BadGateway,      // 502
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::Unprocessable => 422,
            ErrorKind::GeneralError => 500,
            ErrorKind::BadGateway => 502,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::BadGateway => "BadGateway",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PayloadTooLarge => "payload-too-large",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::BadGateway => "bad-gateway",
        }
    }
}

/// A structured API error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub errors: Option<Value>,
    pub source: Option<AnyError>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            errors: None,
            source: None,
        }
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Copy without the inner `source`, safe to hand to clients
    pub fn sanitize_for_client(&self) -> ApiError {
        ApiError {
            kind: self.kind,
            message: self.message.clone(),
            errors: self.errors.clone(),
            source: None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut base = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });

        if let Some(e) = &self.errors {
            base["errors"] = e.clone();
        }
        base
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<StagingError> for ApiError {
    fn from(err: StagingError) -> Self {
        let kind = match &err {
            StagingError::Validation { .. } => ErrorKind::Unprocessable,
            StagingError::NotFound { .. } => ErrorKind::NotFound,
            StagingError::Invalid { .. } => ErrorKind::BadRequest,
            StagingError::Cancelled => ErrorKind::Conflict,
            e if e.is_remote() => ErrorKind::BadGateway,
            _ => ErrorKind::GeneralError,
        };
        ApiError::new(kind, err.to_string()).with_source(AnyError::new(err))
    }
}

#[derive(Debug)]
pub struct ApiAxumError(pub AnyError);

impl From<AnyError> for ApiAxumError {
    fn from(e: AnyError) -> Self {
        Self(e)
    }
}

impl From<ApiError> for ApiAxumError {
    fn from(e: ApiError) -> Self {
        Self(e.into_anyhow())
    }
}

impl From<StagingError> for ApiAxumError {
    fn from(e: StagingError) -> Self {
        ApiError::from(e).into()
    }
}

impl IntoResponse for ApiAxumError {
    fn into_response(self) -> Response {
        // an ApiError keeps its kind even when wrapped in anyhow contexts
        let api = match self.0.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
            Some(api) => api.sanitize_for_client(),
            None => {
                tracing::error!(error = %self.0, "unhandled error");
                ApiError::general_error(self.0.to_string())
            }
        };
        let status = StatusCode::from_u16(api.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(api.to_json())).into_response()
    }
}

pub(crate) fn map_json_rejection(rejection: JsonRejection) -> ApiAxumError {
    ApiError::bad_request("Failed to parse the request body as JSON")
        .with_errors(json!({"_schema": [rejection.to_string()]}))
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_errors_map_to_http_kinds() {
        let cases = [
            (StagingError::validation("too many files"), 422),
            (StagingError::not_found("ses_1"), 404),
            (StagingError::invalid("bad url"), 400),
            (StagingError::transport("reset"), 502),
            (StagingError::Cancelled, 409),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).code(), code);
        }
    }

    #[test]
    fn json_shape_is_feathers_like() {
        let body = ApiError::unprocessable("Invalid")
            .with_errors(json!({"files": ["required"]}))
            .to_json();
        assert_eq!(body["name"], "Unprocessable");
        assert_eq!(body["code"], 422);
        assert_eq!(body["className"], "unprocessable");
        assert_eq!(body["errors"]["files"][0], "required");
    }
}
