//! HTTP collaborators for the MedGo backend and the conversation driver
//! that wires them to the core pipeline.

pub mod backend;
pub mod chat;
pub mod conversation;
pub mod error;
pub mod notice;
pub mod replay;
pub mod suggest;
pub mod uploads;

pub use backend::BackendClient;
pub use chat::{ChatEventStream, ChatRequest};
pub use conversation::{ConversationDriver, SendOutcome};
pub use error::TransportError;
pub use notice::ErrorNotice;
pub use replay::ReplayQuery;
pub use suggest::NextActionSource;
