use medgo_core::PollError;
use thiserror::Error;

/// Failure talking to the backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("No response body")]
    NoBody,

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            TransportError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<TransportError> for PollError {
    fn from(e: TransportError) -> Self {
        match e.status() {
            Some(code) => PollError::with_status(e.to_string(), code),
            None => PollError::new(e.to_string()),
        }
    }
}
