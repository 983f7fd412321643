pub mod config;
pub mod session;
pub mod tus;
pub mod utils;

pub use session::{
    ControllerConfig, ProgressSnapshot, SessionEvent, SessionHandle, SessionState, UploadController,
    UploadOptions, UploadSource,
};
pub use tus::{ErrorKind, Transport, TusClient};
