mod controller;
mod controller_worker;
mod errors;
mod history;
mod source;
mod state;
mod types;
mod worker;

pub use controller::{SessionEventReceiver, SessionHandle, UploadController};
pub use errors::{Result, SessionError};
pub use history::{HistoryRecord, HistoryStore, JsonFileHistoryStore, MemoryHistoryStore};
pub use source::UploadSource;
pub use state::{AckOutcome, UploadSession};
pub use types::{
    ControllerConfig, DuplicatePolicy, ProgressCallback, ProgressSnapshot, SessionEvent,
    SessionFailure, SessionId, SessionState, UploadOptions, UploadStrategy,
};
