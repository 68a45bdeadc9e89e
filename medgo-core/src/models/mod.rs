pub mod message;
pub mod path_event;
pub mod session;
pub mod upload;

pub use message::{ChatMessage, MessageStatus, Role, UpstreamMessage};
pub use path_event::{Edge, PathEvent, PathReplay};
pub use session::{derive_title, SessionMetadata, SessionSnapshot, DEFAULT_SESSION_TITLE};
pub use upload::{UploadPage, UploadResource, UploadStatus};
