use chrono::{DateTime, Utc};
use serde::Serialize;
use super::errors::{Result, SessionError};
use super::types::{SessionFailure, SessionId, SessionState, UploadStrategy};

/// 分块确认后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// 已上传字节数增加
    Progressed,
    /// 已上传完整个文件
    Completed,
    /// 偏移量没有前进，忽略
    Unchanged,
}

/// One file's upload lifecycle.
///
/// Pure state machine: it performs no IO and owns no tasks. The controller
/// worker is the only thing that mutates it; subscribers see clones.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub id: SessionId,
    pub file_name: String,
    pub destination_key: String,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub state: SessionState,
    pub strategy: UploadStrategy,
    pub last_error: Option<SessionFailure>,
    pub upload_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    pub fn new(
        id: SessionId,
        file_name: impl Into<String>,
        destination_key: impl Into<String>,
        total_bytes: u64,
        strategy: UploadStrategy,
    ) -> Result<Self> {
        let destination_key = destination_key.into();
        if destination_key.trim().is_empty() {
            return Err(SessionError::EmptyDestination);
        }
        if total_bytes == 0 {
            return Err(SessionError::EmptySource);
        }

        Ok(Self {
            id,
            file_name: file_name.into(),
            destination_key,
            total_bytes,
            bytes_transferred: 0,
            state: SessionState::Pending,
            strategy,
            last_error: None,
            upload_url: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        })
    }

    pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (from, to),
            (Pending, Uploading)
                | (Uploading, Paused)
                | (Paused, Uploading)
                | (Uploading, Completed)
                | (Uploading, Failed)
                | (Pending, Cancelled)
                | (Uploading, Cancelled)
                | (Paused, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn progress_percent(&self) -> f64 {
        (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
    }

    fn transition(&mut self, to: SessionState, action: &'static str) -> Result<SessionState> {
        let from = self.state;
        if !Self::is_valid_transition(from, to) {
            return Err(SessionError::invalid_state(self.id, from, action));
        }

        self.state = to;
        match to {
            SessionState::Uploading if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(from)
    }

    pub fn start(&mut self) -> Result<SessionState> {
        if self.state != SessionState::Pending {
            return Err(SessionError::invalid_state(self.id, self.state, "start"));
        }
        self.transition(SessionState::Uploading, "start")
    }

    pub fn pause(&mut self) -> Result<SessionState> {
        self.transition(SessionState::Paused, "pause")
    }

    pub fn resume(&mut self) -> Result<SessionState> {
        if self.state != SessionState::Paused {
            return Err(SessionError::invalid_state(self.id, self.state, "resume"));
        }
        self.transition(SessionState::Uploading, "resume")
    }

    pub fn cancel(&mut self) -> Result<SessionState> {
        self.transition(SessionState::Cancelled, "cancel")
    }

    pub fn fail(&mut self, failure: SessionFailure) -> Result<SessionState> {
        let from = self.transition(SessionState::Failed, "fail")?;
        self.last_error = Some(failure);
        Ok(from)
    }

    /// Record the offset acknowledged by the endpoint.
    pub fn record_ack(&mut self, offset: u64) -> Result<AckOutcome> {
        if self.state != SessionState::Uploading {
            return Err(SessionError::invalid_state(self.id, self.state, "acknowledge"));
        }
        if offset > self.total_bytes {
            return Err(SessionError::OffsetOutOfRange {
                offset,
                total: self.total_bytes,
            });
        }
        if offset <= self.bytes_transferred {
            return Ok(AckOutcome::Unchanged);
        }

        self.bytes_transferred = offset;
        if offset == self.total_bytes {
            self.transition(SessionState::Completed, "complete")?;
            return Ok(AckOutcome::Completed);
        }

        Ok(AckOutcome::Progressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tus::ErrorKind;

    const MB: u64 = 1024 * 1024;

    fn session(total: u64) -> UploadSession {
        UploadSession::new(SessionId::new(), "video.mp4", "family/video.mp4", total, UploadStrategy::Chunked)
            .unwrap()
    }

    fn failure() -> SessionFailure {
        SessionFailure {
            kind: ErrorKind::Network,
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_state_transition() {
        use SessionState::*;

        // valid
        assert!(UploadSession::is_valid_transition(Pending, Uploading));
        assert!(UploadSession::is_valid_transition(Uploading, Paused));
        assert!(UploadSession::is_valid_transition(Paused, Uploading));
        assert!(UploadSession::is_valid_transition(Uploading, Completed));
        assert!(UploadSession::is_valid_transition(Paused, Cancelled));

        // invalid
        assert!(!UploadSession::is_valid_transition(Completed, Uploading));
        assert!(!UploadSession::is_valid_transition(Failed, Uploading));
        assert!(!UploadSession::is_valid_transition(Pending, Paused));
        assert!(!UploadSession::is_valid_transition(Paused, Completed));
        assert!(!UploadSession::is_valid_transition(Cancelled, Cancelled));
    }

    #[test]
    fn test_rejects_empty_input() {
        let id = SessionId::new();
        assert!(matches!(
            UploadSession::new(id, "a.jpg", "a.jpg", 0, UploadStrategy::Single),
            Err(SessionError::EmptySource)
        ));
        assert!(matches!(
            UploadSession::new(id, "a.jpg", "  ", 10, UploadStrategy::Single),
            Err(SessionError::EmptyDestination)
        ));
    }

    #[test]
    fn test_ack_progress_is_monotonic() {
        let mut session = session(20 * MB);
        session.start().unwrap();

        assert_eq!(session.record_ack(6 * MB).unwrap(), AckOutcome::Progressed);
        assert_eq!(session.record_ack(4 * MB).unwrap(), AckOutcome::Unchanged);
        assert_eq!(session.bytes_transferred, 6 * MB);

        assert!(matches!(
            session.record_ack(21 * MB),
            Err(SessionError::OffsetOutOfRange { .. })
        ));
        assert_eq!(session.bytes_transferred, 6 * MB);

        assert_eq!(session.record_ack(20 * MB).unwrap(), AckOutcome::Completed);
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.bytes_transferred, session.total_bytes);
        assert!(session.finished_at.is_some());
    }

    #[test]
    fn test_pause_keeps_bytes() {
        let mut session = session(50 * MB);
        session.start().unwrap();
        session.record_ack(6 * MB).unwrap();

        session.pause().unwrap();
        assert!(session.record_ack(12 * MB).is_err());
        assert_eq!(session.bytes_transferred, 6 * MB);

        session.resume().unwrap();
        assert_eq!(session.state, SessionState::Uploading);
        assert_eq!(session.bytes_transferred, 6 * MB);
    }

    #[test]
    fn test_terminal_states_reject_control() {
        let mut completed = session(MB);
        completed.start().unwrap();
        completed.record_ack(MB).unwrap();

        let mut failed = session(MB);
        failed.start().unwrap();
        failed.fail(failure()).unwrap();

        let mut cancelled = session(MB);
        cancelled.cancel().unwrap();

        for session in [&mut completed, &mut failed, &mut cancelled] {
            let state = session.state;
            let bytes = session.bytes_transferred;

            assert!(matches!(session.pause(), Err(SessionError::InvalidState { .. })));
            assert!(matches!(session.resume(), Err(SessionError::InvalidState { .. })));
            assert!(matches!(session.cancel(), Err(SessionError::InvalidState { .. })));

            assert_eq!(session.state, state);
            assert_eq!(session.bytes_transferred, bytes);
        }

        assert_eq!(failed.last_error.as_ref().unwrap().kind, ErrorKind::Network);
    }

    #[test]
    fn test_resume_requires_paused() {
        let mut session = session(MB);
        assert!(session.resume().is_err());
        session.start().unwrap();
        assert!(session.resume().is_err());
        assert!(session.start().is_err());
    }
}
