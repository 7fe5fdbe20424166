use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use mt5_gateway_core::models::ErrorResponse;
use mt5_gateway_core::GatewayError;

/// Error returned by handlers, rendered as an `ErrorResponse` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = match &e {
            GatewayError::Handshake(_) | GatewayError::AuthenticationUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::RemoteCall { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            GatewayError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        warn!(status = status.as_u16(), error = %e, "Request failed");
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.status.as_u16(), self.message);
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt5_gateway_core::HandshakeError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GatewayError::AuthenticationUnavailable(HandshakeError::Rejected("3".into())), 502),
            (GatewayError::Handshake(HandshakeError::ChallengeFailed(500)), 502),
            (GatewayError::from_status(404, "missing"), 404),
            (GatewayError::from_status(99, "odd"), 502),
            (GatewayError::Transport("timed out".into()), 504),
            (GatewayError::InvalidResponse("html".into()), 502),
            (GatewayError::InvalidOperation("../admin".into()), 400),
            (GatewayError::ShutDown, 503),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status.as_u16(), expected);
        }
    }
}
