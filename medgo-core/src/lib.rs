pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod models;
pub mod path;
pub mod poller;
pub mod session;
pub mod sse;
pub mod transcript;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MedgoConfig;
pub use error::{MedgoError, Result};
pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use path::{build_dag, build_path_tree, aggregate_node_runs, NodeKind, NodeRun, PathDag, PathTreeNode};
pub use poller::{
    PollError, PollPhase, PollSchedule, PollState, ResourcePoller, StopReason, UploadQuery,
    UploadSource,
};
pub use session::{ReusableSessionCache, SessionStore};
pub use sse::{chat_events, ChatEvent, RouteInfo, SseCodec, SseFrame};
pub use transcript::{StreamTicket, TranscriptAssembler};
