use crate::models::ErrorResponse;
use axum::http::StatusCode;
use inference_providers::CompletionError as ProviderError;
use services::completions::CompletionError;

/// Map service errors to HTTP status codes
pub fn map_completion_error_to_status(error: &CompletionError) -> StatusCode {
    match error {
        CompletionError::InvalidModel(_) | CompletionError::InvalidParams(_) => {
            StatusCode::BAD_REQUEST
        }
        CompletionError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CompletionError::Provider(provider) => match provider {
            ProviderError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

fn error_code(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::SessionDisengaged => "session_disengaged",
        ProviderError::PolicyViolation(_) => "policy_violation",
        ProviderError::BannedContent(_) => "banned_content",
        ProviderError::HarmContent(_) => "harm_content",
        ProviderError::RateLimited => "rate_limit_exceeded",
        ProviderError::TransportError(_) => "transport_error",
        ProviderError::HttpStatus { .. } => "upstream_http_error",
        ProviderError::Timeout(_) => "timeout",
        ProviderError::InvalidResponse(_) => "invalid_response",
        ProviderError::CompletionError(_) => "completion_error",
    }
}

/// Error envelope for a failure raised by a backend mid-stream
pub fn provider_error_response(error: &ProviderError) -> ErrorResponse {
    ErrorResponse::new(error.to_string(), "provider_error".to_string()).with_code(error_code(error))
}

impl From<&CompletionError> for ErrorResponse {
    fn from(error: &CompletionError) -> Self {
        match error {
            CompletionError::InvalidModel(_) => ErrorResponse::with_param(
                error.to_string(),
                "invalid_request_error".to_string(),
                "model".to_string(),
            )
            .with_code("model_not_found"),
            CompletionError::InvalidParams(_) => {
                ErrorResponse::new(error.to_string(), "invalid_request_error".to_string())
            }
            CompletionError::Unavailable(_) => {
                ErrorResponse::new(error.to_string(), "service_unavailable".to_string())
                    .with_code("no_credentials")
            }
            CompletionError::Provider(provider) => provider_error_response(provider),
        }
    }
}
