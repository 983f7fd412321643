#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, Semaphore};
use upload_session::session::{SessionEvent, SessionId};
use upload_session::tus::{CreateUpload, Result, Transport, TusError};

pub const MB: u64 = 1024 * 1024;

/// 记录下来的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { length: u64, metadata: String },
    Head { offset: u64 },
    Patch { offset: u64, len: usize },
    Delete { upload_url: String },
}

#[derive(Default)]
struct MockState {
    uploads: HashMap<String, Vec<u8>>,
    calls: Vec<Call>,
    /// 按顺序消费的 PATCH 失败状态码
    patch_failures: VecDeque<u16>,
    /// 每次 PATCH 都以该状态码失败
    fail_all_patches: Option<u16>,
    /// DELETE 以该状态码失败
    fail_delete: Option<u16>,
    next_id: u32,
}

/// 内存中的 tus 服务端
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    /// 设置后每个 PATCH 需要先拿到一个许可
    gate: Option<Arc<Semaphore>>,
    /// 设置后每个 POST 需要先拿到一个许可
    create_gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        (Arc::new(transport), gate)
    }

    pub fn create_gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            create_gate: Some(gate.clone()),
            ..Default::default()
        };
        (Arc::new(transport), gate)
    }

    pub fn fail_delete(&self, status: u16) {
        self.state.lock().unwrap().fail_delete = Some(status);
    }

    pub fn fail_next_patch(&self, status: u16) {
        self.state.lock().unwrap().patch_failures.push_back(status);
    }

    pub fn fail_all_patches(&self, status: u16) {
        self.state.lock().unwrap().fail_all_patches = Some(status);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn patch_offsets(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Patch { offset, .. } => Some(offset),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    pub fn uploaded(&self, upload_url: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().uploads.get(upload_url).cloned()
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_upload(&self, request: &CreateUpload) -> Result<String> {
        if let Some(gate) = &self.create_gate {
            gate.acquire().await.unwrap().forget();
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let upload_url = format!("http://localhost:1080/files/{}", state.next_id);

        state.calls.push(Call::Create {
            length: request.upload_length,
            metadata: request.metadata.to_header(),
        });
        state.uploads.insert(upload_url.clone(), Vec::new());

        Ok(upload_url)
    }

    async fn get_offset(&self, upload_url: &str, _auth: Option<&str>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let offset = match state.uploads.get(upload_url) {
            Some(data) => data.len() as u64,
            None => return Err(TusError::server_error(404, "upload not found")),
        };
        state.calls.push(Call::Head { offset });
        Ok(offset)
    }

    async fn upload_chunk(&self, upload_url: &str, offset: u64, data: Bytes, _auth: Option<&str>) -> Result<u64> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Patch { offset, len: data.len() });

        if let Some(status) = state.patch_failures.pop_front().or(state.fail_all_patches) {
            return Err(TusError::server_error(status, "scripted failure"));
        }

        let stored = match state.uploads.get_mut(upload_url) {
            Some(stored) => stored,
            None => return Err(TusError::server_error(404, "upload not found")),
        };
        if stored.len() as u64 != offset {
            return Err(TusError::server_error(409, "offset mismatch"));
        }
        stored.extend_from_slice(&data);

        Ok(stored.len() as u64)
    }

    async fn delete_upload(&self, upload_url: &str, _auth: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete { upload_url: upload_url.to_string() });
        if let Some(status) = state.fail_delete {
            return Err(TusError::server_error(status, "scripted failure"));
        }
        state.uploads.remove(upload_url);
        Ok(())
    }
}

pub fn pattern(len: u64) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

/// Wait for the first event of `session_id` matching `pred`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    session_id: SessionId,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.session_id() == session_id && pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(err) => panic!("event channel closed: {}", err),
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(300), wait)
        .await
        .expect("timed out waiting for event")
}

pub async fn wait_until(pred: impl Fn() -> bool) {
    let wait = async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    tokio::time::timeout(Duration::from_secs(300), wait)
        .await
        .expect("timed out waiting for condition")
}
