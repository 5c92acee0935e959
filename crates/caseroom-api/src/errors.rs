// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Failure taxonomy of the service. Authentication and authorization are
/// distinct codes: callers must be able to tell "no identity" from
/// "identity present, role insufficient".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ApiErrorCode {
    AuthenticationMissing,
    AuthorizationDenied,
    ResourceNotFound,
    ValidationFailed,
    InvalidParameter,
    UpstreamFailure,
    NotReady,
    Internal,
}

impl ApiErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationMissing => "authentication_missing",
            Self::AuthorizationDenied => "authorization_denied",
            Self::ResourceNotFound => "resource_not_found",
            Self::ValidationFailed => "validation_failed",
            Self::InvalidParameter => "invalid_parameter",
            Self::UpstreamFailure => "upstream_failure",
            Self::NotReady => "not_ready",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub details: Value,
}

impl ApiError {
    #[must_use]
    pub fn new(code: ApiErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
        }
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(
            ApiErrorCode::AuthenticationMissing,
            "no valid session",
            json!({}),
        )
    }

    #[must_use]
    pub fn forbidden(required: &str) -> Self {
        Self::new(
            ApiErrorCode::AuthorizationDenied,
            "insufficient role",
            json!({"required": required}),
        )
    }

    #[must_use]
    pub fn not_found(kind: &str) -> Self {
        Self::new(
            ApiErrorCode::ResourceNotFound,
            format!("{kind} not found"),
            json!({"kind": kind}),
        )
    }

    #[must_use]
    pub fn validation_failed(reason: &str) -> Self {
        Self::new(
            ApiErrorCode::ValidationFailed,
            "validation failed",
            json!({"reason": reason}),
        )
    }

    #[must_use]
    pub fn invalid_param(name: &str, value: &str) -> Self {
        Self::new(
            ApiErrorCode::InvalidParameter,
            format!("invalid parameter: {name}"),
            json!({"parameter": name, "value": value}),
        )
    }

    /// Upstream and storage failures reach the client with a generic
    /// message only; the internal detail goes to the log, never the wire.
    #[must_use]
    pub fn upstream_failure() -> Self {
        Self::new(
            ApiErrorCode::UpstreamFailure,
            "upstream dependency failed",
            json!({}),
        )
    }

    #[must_use]
    pub fn internal() -> Self {
        Self::new(ApiErrorCode::Internal, "internal error", json!({}))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

const _: fn() = || {
    fn assert_traits<T: Serialize + for<'de> Deserialize<'de>>() {}
    assert_traits::<ApiErrorCode>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ApiErrorCode::AuthenticationMissing).expect("serialize"),
            "\"authentication_missing\""
        );
        assert_eq!(
            ApiErrorCode::AuthorizationDenied.as_str(),
            "authorization_denied"
        );
    }

    #[test]
    fn upstream_failure_carries_no_internal_detail() {
        let err = ApiError::upstream_failure();
        assert_eq!(err.details, json!({}));
        assert_eq!(err.message, "upstream dependency failed");
    }
}
