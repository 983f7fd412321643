use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::tus::{DEFAULT_CHUNK_SIZE, ErrorKind, TusError};
use crate::utils::DEFAULT_RETRY_DELAYS;

/// 上传会话唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SessionState {
    /// 等待中（排队等待并发名额）
    Pending,
    /// 上传中
    Uploading,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed | SessionState::Cancelled)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// 上传策略，由文件大小与 `large_file_threshold` 决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadStrategy {
    /// 整个文件一次 PATCH
    Single,
    /// 按 chunk_size 分块 PATCH
    Chunked,
}

impl UploadStrategy {
    pub fn select(total_bytes: u64, large_file_threshold: u64) -> Self {
        if total_bytes > large_file_threshold {
            UploadStrategy::Chunked
        } else {
            UploadStrategy::Single
        }
    }
}

/// 目标路径已有活跃会话时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// 拒绝新的上传
    #[default]
    Reject,
    /// 取消旧会话（保留已上传部分），开始新的
    Supersede,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 分块大小
    pub chunk_size: usize,
    pub bucket: Option<String>,
    /// Bearer token
    pub token: Option<String>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// 覆盖同名对象
    pub upsert: bool,
    /// 额外的 Upload-Metadata
    pub metadata: BTreeMap<String, String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            bucket: None,
            token: None,
            content_type: None,
            cache_control: None,
            upsert: false,
            metadata: BTreeMap::new(),
        }
    }
}

/// 终止错误，失败后写入会话与快照
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TusError> for SessionFailure {
    fn from(err: &TusError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Immutable view of one session handed to subscribers and the UI.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub file_name: String,
    pub destination_key: String,
    pub file_size: u64,
    pub progress_percent: f64,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    /// 字节/秒
    pub upload_speed: f64,
    /// 剩余时间，None 表示还在计算
    pub eta: Option<Duration>,
    pub state: SessionState,
    pub is_uploading: bool,
    pub is_paused: bool,
    pub error: Option<SessionFailure>,
}

impl ProgressSnapshot {
    pub fn estimated_seconds_remaining(&self) -> Option<f64> {
        self.eta.map(|eta| eta.as_secs_f64())
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// 已上传字节数变化
    Progress(ProgressSnapshot),

    /// 状态变更
    StateChanged {
        session_id: SessionId,
        old_state: SessionState,
        new_state: SessionState,
    },

    /// 上传完成
    Completed {
        session_id: SessionId,
        upload_url: String,
    },

    /// 上传失败（重试耗尽或不可重试）
    Failed {
        session_id: SessionId,
        error: SessionFailure,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Progress(snapshot) => snapshot.session_id,
            SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::Completed { session_id, .. }
            | SessionEvent::Failed { session_id, .. } => *session_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// 最大并发上传数
    pub max_concurrent: usize,

    /// 超过该大小才分块上传
    pub large_file_threshold: u64,

    /// 传输层重试间隔，长度即重试次数
    pub retry_delays: Vec<Duration>,

    pub duplicate_policy: DuplicatePolicy,

    /// 历史记录保留条数
    pub history_limit: usize,

    /// 事件广播缓存
    pub event_capacity: usize,

    /// 速度的指数平滑系数，None 表示不平滑
    pub speed_smoothing: Option<f64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            large_file_threshold: DEFAULT_CHUNK_SIZE as u64,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            duplicate_policy: DuplicatePolicy::Reject,
            history_limit: 50,
            event_capacity: 256,
            speed_smoothing: None,
        }
    }
}

// 静态断言确保类型是 Send的
const _: () = {
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn assert_types() {
        assert_send::<SessionEvent>();
        assert_send::<ProgressSnapshot>();
        assert_send::<ProgressCallback>();
    }
};
