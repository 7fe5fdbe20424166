use thiserror::Error;

/// Ways the challenge-response handshake can fail.
///
/// Cloneable so that one failed attempt can be reported to every caller
/// that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Auth start failed with status {0}")]
    ChallengeFailed(u16),

    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    #[error("Auth answer failed with status {0}")]
    AnswerFailed(u16),

    #[error("Malformed answer: {0}")]
    MalformedAnswer(String),

    #[error("MT5 authentication failed: {0}")]
    Rejected(String),

    #[error("Server authentication validation failed")]
    ServerProofMismatch,

    #[error("Server did not return cli_rand_answer")]
    ServerProofMissing,

    #[error("Network error during handshake: {0}")]
    Transport(String),

    #[error("Session manager shut down during handshake")]
    Aborted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("MT5 authentication unavailable: {0}")]
    AuthenticationUnavailable(HandshakeError),

    #[error("MT5 API error {status}: {body}")]
    RemoteCall { status: u16, body: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid operation: {0:?}")]
    InvalidOperation(String),

    #[error("Session manager is shut down")]
    ShutDown,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl GatewayError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        GatewayError::RemoteCall {
            status,
            body: Self::truncate_body(body),
        }
    }

    /// Whether this is an upstream unauthorized/forbidden response
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, GatewayError::RemoteCall { status, .. } if is_auth_status(*status))
    }

    /// Reclassify a handshake failure as "could not authenticate" for
    /// callers that only asked for a connection.
    pub fn into_unavailable(self) -> Self {
        match self {
            GatewayError::Handshake(e) => GatewayError::AuthenticationUnavailable(e),
            other => other,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Transport(format!("request timed out: {}", e))
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// 401 and 403 both mean the upstream no longer accepts our session
pub(crate) fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}
