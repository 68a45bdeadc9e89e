use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedgoError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("A reply is still streaming; wait for it to finish or stop it first")]
    StreamBusy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Snapshot belongs to session {snapshot}, active session is {active}")]
    InactiveSnapshot { snapshot: String, active: String },
}

pub type Result<T> = std::result::Result<T, MedgoError>;
