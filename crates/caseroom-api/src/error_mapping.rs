// SPDX-License-Identifier: Apache-2.0

use crate::errors::{ApiError, ApiErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiErrorMapping {
    pub status_code: u16,
}

/// The status contract: 401 no identity, 403 identity but insufficient
/// role, 404 missing resource, 400 malformed input, 503 not ready, 500
/// everything else. Partial batch failures never reach this function; they
/// return 200 with a per-row report.
#[must_use]
pub fn map_error(error: &ApiError) -> ApiErrorMapping {
    let status_code = match error.code {
        ApiErrorCode::AuthenticationMissing => 401,
        ApiErrorCode::AuthorizationDenied => 403,
        ApiErrorCode::ResourceNotFound => 404,
        ApiErrorCode::ValidationFailed | ApiErrorCode::InvalidParameter => 400,
        ApiErrorCode::NotReady => 503,
        ApiErrorCode::UpstreamFailure | ApiErrorCode::Internal => 500,
    };
    ApiErrorMapping { status_code }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_and_authorization_map_to_distinct_statuses() {
        assert_eq!(map_error(&ApiError::unauthorized()).status_code, 401);
        assert_eq!(map_error(&ApiError::forbidden("PROFESSOR")).status_code, 403);
    }

    #[test]
    fn remaining_codes_follow_the_contract() {
        assert_eq!(map_error(&ApiError::not_found("case")).status_code, 404);
        assert_eq!(
            map_error(&ApiError::validation_failed("empty email set")).status_code,
            400
        );
        assert_eq!(map_error(&ApiError::invalid_param("role", "x")).status_code, 400);
        assert_eq!(map_error(&ApiError::upstream_failure()).status_code, 500);
        assert_eq!(map_error(&ApiError::internal()).status_code, 500);
    }
}
