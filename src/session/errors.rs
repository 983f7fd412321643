use thiserror::Error;
use crate::tus::TusError;
use super::types::{SessionId, SessionState};

#[derive(Error, Debug)]
pub enum SessionError {
    /// 对当前状态不合法的控制调用，终止状态下的调用都会得到这个错误
    #[error("Cannot {action} session {session_id} in state {state}")]
    InvalidState {
        session_id: SessionId,
        state: SessionState,
        action: &'static str,
    },

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Source is empty")]
    EmptySource,

    #[error("Destination key is empty")]
    EmptyDestination,

    #[error("An upload to '{0}' is already active")]
    DuplicateDestination(String),

    #[error("Reported offset {offset} is beyond total {total}")]
    OffsetOutOfRange {
        offset: u64,
        total: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TusError),

    #[error("History store error: {0}")]
    History(String),

    #[error("Controller shut down")]
    ControllerShutdown,
}

impl SessionError {
    pub fn invalid_state(session_id: SessionId, state: SessionState, action: &'static str) -> Self {
        Self::InvalidState {
            session_id,
            state,
            action,
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
