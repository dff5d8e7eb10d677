//! Structured errors exchanged with the service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An error descriptor as the service sends it.
///
/// Attached to Error, Disconnected and Nack envelopes, and carried by the
/// connection states that a failure leads to. Never mutated once built.
///
/// ```text
/// { "code": 80003, "statusCode": 503, "message": "...", "cause": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Service error code (e.g. 80003). 0 when the service omits it.
    #[serde(default)]
    pub code: u32,

    /// HTTP-style status (e.g. 503). 0 when the service omits it.
    #[serde(default)]
    pub status_code: u16,

    /// Human-readable description.
    #[serde(default)]
    pub message: String,

    /// The error that led to this one, if the service reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorInfo>>,

    /// Link to documentation about this error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl ErrorInfo {
    /// Creates an error with no cause.
    pub fn new(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
            cause: None,
            href: None,
        }
    }

    /// Returns a copy of `self` with `cause` attached.
    pub fn with_cause(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The connection was closed on request.
    pub fn reason_closed() -> Self {
        Self::new(10000, 200, "Connection closed by client")
    }

    /// The connection dropped and will be retried.
    pub fn reason_disconnected() -> Self {
        Self::new(80003, 503, "Connection temporarily unavailable")
    }

    /// Retries have been failing for longer than the connection state TTL.
    pub fn reason_suspended() -> Self {
        Self::new(80002, 503, "Connection unavailable")
    }

    /// The connection failed and will not be retried.
    pub fn reason_failed() -> Self {
        Self::new(80000, 503, "Connection failed")
    }

    /// The service did not answer in time.
    pub fn reason_timeout() -> Self {
        Self::new(50003, 504, "Timed out")
    }

    /// An unexpected internal failure.
    pub fn reason_unknown() -> Self {
        Self::new(50000, 500, "Unknown error")
    }

    /// An operation was refused in the current connection state.
    pub fn reason_refused() -> Self {
        Self::new(80019, 500, "Operation refused in current connection state")
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}, status {})",
            self.message, self.code, self.status_code
        )
    }
}

impl std::error::Error for ErrorInfo {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_info_json_uses_camel_case() {
        let err = ErrorInfo::new(40140, 401, "Token expired");
        let json: serde_json::Value = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], 40140);
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["message"], "Token expired");
        assert!(json.get("cause").is_none(), "absent cause is omitted");
    }

    #[test]
    fn test_error_info_nested_cause_round_trip() {
        let err = ErrorInfo::reason_failed().with_cause(ErrorInfo::reason_timeout());
        let bytes = serde_json::to_vec(&err).unwrap();
        let decoded: ErrorInfo = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err, decoded);
        assert_eq!(decoded.cause.as_ref().unwrap().code, 50003);
    }

    #[test]
    fn test_error_info_source_is_cause() {
        let err = ErrorInfo::reason_failed().with_cause(ErrorInfo::reason_timeout());
        let source = err.source().expect("cause should be the source");
        assert!(source.to_string().contains("code 50003"));
        assert!(ErrorInfo::reason_closed().source().is_none());
    }

    #[test]
    fn test_error_info_display() {
        let err = ErrorInfo::reason_disconnected();
        assert_eq!(
            err.to_string(),
            "Connection temporarily unavailable (code 80003, status 503)"
        );
    }

    #[test]
    fn test_error_info_missing_message_defaults_empty() {
        let err: ErrorInfo =
            serde_json::from_str(r#"{"code": 50000, "statusCode": 500}"#).unwrap();
        assert_eq!(err.message, "");
    }

    #[test]
    fn test_error_info_missing_codes_default_to_zero() {
        let err: ErrorInfo =
            serde_json::from_str(r#"{"code": 40140, "message": "token expired"}"#).unwrap();
        assert_eq!(err.code, 40140);
        assert_eq!(err.status_code, 0);

        let bare: ErrorInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.code, 0);
    }
}
