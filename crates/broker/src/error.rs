// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-facing error kinds. Internal plumbing failures
/// (store I/O, decrypt failures) never reach this enum directly — they are
/// logged and folded into a degraded-but-consistent result at the handler
/// boundary instead (empty list, null record, no retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerError {
    NotOwner,
    NotAuthorized,
    RateLimit,
    ResourceExhausted,
    NotGranted,
    NotExited,
    TransportUnavailable,
}

impl BrokerError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotOwner => 403,
            Self::NotAuthorized => 403,
            Self::RateLimit => 429,
            Self::ResourceExhausted => 429,
            Self::NotGranted => 403,
            Self::NotExited => 409,
            Self::TransportUnavailable => 503,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotOwner => "NOT_OWNER",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::RateLimit => "RATE_LIMIT",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::NotGranted => "NOT_GRANTED",
            Self::NotExited => "NOT_EXITED",
            Self::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for BrokerError {}

impl axum::response::IntoResponse for BrokerError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = self.to_http_response(self.as_str());
        (status, body).into_response()
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
