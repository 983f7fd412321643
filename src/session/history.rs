use std::collections::VecDeque;
use std::path::PathBuf;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use super::errors::{Result, SessionError};
use super::state::UploadSession;
use super::types::{SessionFailure, SessionId, SessionState};

/// 已结束会话的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub session_id: SessionId,
    pub file_name: String,
    pub destination_key: String,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub state: SessionState,
    pub error: Option<SessionFailure>,
    pub upload_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl From<&UploadSession> for HistoryRecord {
    fn from(session: &UploadSession) -> Self {
        Self {
            session_id: session.id,
            file_name: session.file_name.clone(),
            destination_key: session.destination_key.clone(),
            total_bytes: session.total_bytes,
            bytes_transferred: session.bytes_transferred,
            state: session.state,
            error: session.last_error.clone(),
            upload_url: session.upload_url.clone(),
            created_at: session.created_at,
            finished_at: session.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

/// 上传历史存储，由调用方注入控制器
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record at the newest end.
    async fn append(&self, record: HistoryRecord) -> Result<()>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<HistoryRecord>>;

    /// Drop the oldest records until at most `max_entries` remain, returning how many were dropped.
    async fn evict_oldest(&self, max_entries: usize) -> Result<usize>;
}

#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<()> {
        self.records.lock().await.push_back(record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<HistoryRecord>> {
        Ok(self.records.lock().await.iter().cloned().collect())
    }

    async fn evict_oldest(&self, max_entries: usize) -> Result<usize> {
        let mut records = self.records.lock().await;
        let excess = records.len().saturating_sub(max_entries);
        records.drain(..excess);
        Ok(excess)
    }
}

/// 以 JSON 文件保存历史，每次写入整份文件
pub struct JsonFileHistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<HistoryRecord>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let data = tokio::fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&data).map_err(|err| SessionError::History(err.to_string()))
    }

    async fn save(&self, records: &[HistoryRecord]) -> Result<()> {
        let data = serde_json::to_string_pretty(records)
            .map_err(|err| SessionError::History(err.to_string()))?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.push(record);
        self.save(&records).await
    }

    async fn list(&self) -> Result<Vec<HistoryRecord>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn evict_oldest(&self, max_entries: usize) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let excess = records.len().saturating_sub(max_entries);
        if excess > 0 {
            records.drain(..excess);
            self.save(&records).await?;
        }
        Ok(excess)
    }
}
