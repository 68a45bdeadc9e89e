//! User-facing, dismissible error notices.

use crate::error::TransportError;
use medgo_core::MedgoError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub title: String,
    pub message: String,
}

impl ErrorNotice {
    fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Http(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                Self::new(
                    "Network error",
                    "Could not reach the backend. Check the service and your connection.",
                )
            }
            TransportError::Status { code, .. } if *code >= 500 => Self::new(
                format!("Server error ({})", code),
                "The server failed to handle the request. Try again later.",
            ),
            TransportError::Status { code: 429, .. } => Self::new(
                "Too many requests (429)",
                "Requests are arriving too fast. Wait a moment and try again.",
            ),
            TransportError::Status { code, .. } if *code >= 400 => Self::new(
                format!("Request failed ({})", code),
                "The request or the service state was rejected. Try sending again.",
            ),
            TransportError::NoBody => Self::new(
                "Bad response",
                "The server returned no event stream.",
            ),
            other => Self::new("Request failed", other.to_string()),
        }
    }

    /// The stream broke after it had started.
    pub fn from_stream(err: &MedgoError) -> Self {
        Self::new("Stream interrupted", err.to_string())
    }

    /// Error event sent by the backend inside the stream.
    pub fn from_backend(code: Option<&str>, message: &str) -> Self {
        let title = match code {
            Some(code) => format!("Backend error ({})", code),
            None => "Backend error".to_string(),
        };
        Self::new(title, message)
    }
}

impl std::fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ErrorNotice {
        ErrorNotice::from_transport(&TransportError::Status {
            code,
            body: String::new(),
        })
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(503).title, "Server error (503)");
        assert_eq!(status(429).title, "Too many requests (429)");
        assert_eq!(status(404).title, "Request failed (404)");
        assert_eq!(status(302).title, "Request failed");
    }

    #[test]
    fn test_no_body_and_decode() {
        assert_eq!(ErrorNotice::from_transport(&TransportError::NoBody).title, "Bad response");
        let decode = ErrorNotice::from_transport(&TransportError::Decode("bad json".to_string()));
        assert_eq!(decode.message, "Invalid response: bad json");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Port 9 (discard) is closed on test machines.
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        let notice = ErrorNotice::from_transport(&TransportError::Http(err));
        assert_eq!(notice.title, "Network error");
    }
}
