use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hostalloc_messages::{codes, ErrorCode};
use serde::Serialize;

use crate::dispatcher::HandleError;

/// RFC 7807 problem details body.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://hostalloc.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            retryable: false,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::SERVICE_UNAVAILABLE, code, message);
        err.problem.retryable = true;
        err
    }
}

impl From<ErrorCode> for ApiError {
    fn from(error: ErrorCode) -> Self {
        let status = match error.code.as_str() {
            codes::STRATEGY_NOT_FOUND | codes::MISSING_SCOPE => StatusCode::BAD_REQUEST,
            codes::NO_ELIGIBLE_HOST => StatusCode::CONFLICT,
            codes::STRATEGY_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
            codes::CAPACITY_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut err = Self::with_status(status, error.code, error.message);
        err.problem.retryable = matches!(
            status,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::SERVICE_UNAVAILABLE
        );
        err
    }
}

impl From<HandleError> for ApiError {
    fn from(error: HandleError) -> Self {
        Self::service_unavailable(codes::SERVICE_UNAVAILABLE, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        let cases = [
            (codes::STRATEGY_NOT_FOUND, StatusCode::BAD_REQUEST),
            (codes::MISSING_SCOPE, StatusCode::BAD_REQUEST),
            (codes::NO_ELIGIBLE_HOST, StatusCode::CONFLICT),
            (codes::STRATEGY_TIMEOUT, StatusCode::GATEWAY_TIMEOUT),
            (codes::CAPACITY_UNAVAILABLE, StatusCode::SERVICE_UNAVAILABLE),
            (codes::STRATEGY_ABANDONED, StatusCode::INTERNAL_SERVER_ERROR),
            ("gpu_exhausted", StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, status) in cases {
            let err = ApiError::from(ErrorCode::new(code, "boom"));
            assert_eq!(err.status, status, "{code}");
            assert_eq!(err.problem.code, code);
        }
    }

    #[test]
    fn test_problem_response_content_type() {
        let response = ApiError::bad_request(codes::MISSING_SCOPE, "no scope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
