use std::time::Duration;

use axum::http::StatusCode;

use super::socket::SocketError;

pub(crate) const CLOSE_MISSING_TOKEN: u16 = 4001;
pub(crate) const CLOSE_AUTH_FAILED: u16 = 4003;
pub(crate) const CLOSE_SESSION_EXPIRED: u16 = 4004;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum BridgeError {
    #[error("client not connected")]
    NotConnected,
    #[error("client disconnected")]
    Disconnected,
    #[error("failed to send request: {0}")]
    SendFailure(String),
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("{0}")]
    RemoteFailure(String),
    #[error("missing token")]
    MissingToken,
    #[error("authentication failed: {0}")]
    AuthFailure(String),
}

impl BridgeError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Disconnected => "disconnected",
            Self::SendFailure(_) => "send_failed",
            Self::Timeout(_) => "timeout",
            Self::RemoteFailure(_) => "remote_failure",
            Self::MissingToken => "missing_token",
            Self::AuthFailure(_) => "authentication_failed",
        }
    }

    pub(crate) fn status(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::NOT_FOUND,
            Self::Disconnected => StatusCode::CONFLICT,
            Self::SendFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::RemoteFailure(_) => StatusCode::BAD_GATEWAY,
            Self::MissingToken | Self::AuthFailure(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub(crate) fn close_frame(&self) -> Option<(u16, &'static str)> {
        match self {
            Self::MissingToken => Some((CLOSE_MISSING_TOKEN, "missing token")),
            Self::AuthFailure(_) => Some((CLOSE_AUTH_FAILED, "authentication failed")),
            _ => None,
        }
    }
}

impl From<SocketError> for BridgeError {
    fn from(error: SocketError) -> Self {
        Self::SendFailure(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_carry_distinct_close_codes() {
        let missing = BridgeError::MissingToken.close_frame().expect("missing token close");
        let failed = BridgeError::AuthFailure("nope".to_string())
            .close_frame()
            .expect("auth failure close");
        assert_eq!(missing, (4001, "missing token"));
        assert_eq!(failed, (4003, "authentication failed"));
        assert!(BridgeError::Timeout(Duration::from_secs(1)).close_frame().is_none());
    }

    #[test]
    fn remote_failure_message_is_passed_through_verbatim() {
        let error = BridgeError::RemoteFailure("tab was closed".to_string());
        assert_eq!(error.to_string(), "tab was closed");
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn timeout_message_reports_duration() {
        let error = BridgeError::Timeout(Duration::from_millis(50));
        assert_eq!(error.to_string(), "request timed out after 50ms");
        assert_eq!(error.code(), "timeout");
    }
}
