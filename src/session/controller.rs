use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::tus::Transport;
use super::controller_worker::ControllerWorker;
use super::errors::{Result, SessionError};
use super::history::{HistoryRecord, HistoryStore};
use super::source::UploadSource;
use super::state::UploadSession;
use super::types::{
    ControllerConfig, ProgressCallback, ProgressSnapshot, SessionEvent, SessionId, UploadOptions,
};

/// 控制器命令
pub(crate) enum ControllerCommand {
    /// 开始上传
    Start {
        source: UploadSource,
        destination_key: String,
        options: UploadOptions,
        observers: Vec<ProgressCallback>,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    /// 暂停
    Pause {
        session_id: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// 恢复
    Resume {
        session_id: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// 取消，可选删除已上传部分
    Cancel {
        session_id: SessionId,
        delete_partial: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// 注册进度回调
    Subscribe {
        session_id: SessionId,
        callback: ProgressCallback,
        reply: oneshot::Sender<Result<()>>,
    },
    /// 获取会话快照
    Snapshot {
        session_id: SessionId,
        reply: oneshot::Sender<Option<ProgressSnapshot>>,
    },
    /// 获取所有会话
    Sessions {
        reply: oneshot::Sender<Vec<UploadSession>>,
    },
    /// 清除所有已结束的会话
    Clean {
        reply: oneshot::Sender<usize>,
    },
    /// 中止所有上传并退出
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Entry point for upload sessions.
///
/// Cheap to clone; every clone talks to the same worker task, which owns all
/// session state. Control calls resolve once the worker has applied them.
#[derive(Clone)]
pub struct UploadController {
    command_tx: mpsc::Sender<ControllerCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    history: Arc<dyn HistoryStore>,
}

impl UploadController {
    pub fn new(
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryStore>,
        config: ControllerConfig,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let worker_handle = tokio::spawn(ControllerWorker::run(
            transport,
            history.clone(),
            config,
            command_rx,
            event_tx.clone(),
        ));

        let controller = Self {
            command_tx,
            event_tx,
            history,
        };

        (controller, worker_handle)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| SessionError::ControllerShutdown)?;

        // 等待响应
        reply_rx.await.map_err(|_| SessionError::ControllerShutdown)
    }

    /// Create a session for `source` and start streaming it to `destination_key`.
    pub async fn start(
        &self,
        source: UploadSource,
        destination_key: impl Into<String>,
        options: UploadOptions,
    ) -> Result<SessionHandle> {
        self.start_session(source, destination_key.into(), options, Vec::new()).await
    }

    /// Like [`start`](Self::start), with `callback` registered before the first chunk is sent.
    pub async fn start_with<F>(
        &self,
        source: UploadSource,
        destination_key: impl Into<String>,
        options: UploadOptions,
        callback: F,
    ) -> Result<SessionHandle>
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        let callback: ProgressCallback = Arc::new(callback);
        self.start_session(source, destination_key.into(), options, vec![callback]).await
    }

    async fn start_session(
        &self,
        source: UploadSource,
        destination_key: String,
        options: UploadOptions,
        observers: Vec<ProgressCallback>,
    ) -> Result<SessionHandle> {
        let session_id = self
            .request(|reply| ControllerCommand::Start {
                source,
                destination_key,
                options,
                observers,
                reply,
            })
            .await??;

        Ok(SessionHandle {
            session_id,
            controller: self.clone(),
        })
    }

    pub async fn pause(&self, handle: &SessionHandle) -> Result<()> {
        let session_id = handle.session_id;
        self.request(|reply| ControllerCommand::Pause { session_id, reply }).await?
    }

    pub async fn resume(&self, handle: &SessionHandle) -> Result<()> {
        let session_id = handle.session_id;
        self.request(|reply| ControllerCommand::Resume { session_id, reply }).await?
    }

    /// Abort the session; with `delete_partial` the endpoint is asked to drop the partial object.
    pub async fn cancel(&self, handle: &SessionHandle, delete_partial: bool) -> Result<()> {
        let session_id = handle.session_id;
        self.request(|reply| ControllerCommand::Cancel {
            session_id,
            delete_partial,
            reply,
        })
        .await?
    }

    /// Register a callback that receives a snapshot on every progress or state update.
    pub async fn subscribe<F>(&self, handle: &SessionHandle, callback: F) -> Result<()>
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        let session_id = handle.session_id;
        let callback: ProgressCallback = Arc::new(callback);
        self.request(|reply| ControllerCommand::Subscribe {
            session_id,
            callback,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self, handle: &SessionHandle) -> Result<ProgressSnapshot> {
        let session_id = handle.session_id;
        self.request(|reply| ControllerCommand::Snapshot { session_id, reply })
            .await?
            .ok_or(SessionError::NotFound(session_id))
    }

    pub async fn sessions(&self) -> Result<Vec<UploadSession>> {
        self.request(|reply| ControllerCommand::Sessions { reply }).await
    }

    /// Forget finished sessions, returning how many were dropped.
    pub async fn clean(&self) -> Result<usize> {
        self.request(|reply| ControllerCommand::Clean { reply }).await
    }

    pub async fn history(&self) -> Result<Vec<HistoryRecord>> {
        self.history.list().await
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Events of a single session only.
    pub fn subscribe_session(&self, handle: &SessionHandle) -> SessionEventReceiver {
        SessionEventReceiver {
            receiver: self.event_tx.subscribe(),
            session_id: handle.session_id,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControllerCommand::Shutdown { reply }).await
    }
}

/// Handle returned by [`UploadController::start`].
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    controller: UploadController,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session_id
    }

    pub async fn pause(&self) -> Result<()> {
        self.controller.pause(self).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.controller.resume(self).await
    }

    pub async fn cancel(&self, delete_partial: bool) -> Result<()> {
        self.controller.cancel(self, delete_partial).await
    }

    pub async fn subscribe<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        self.controller.subscribe(self, callback).await
    }

    pub async fn snapshot(&self) -> Result<ProgressSnapshot> {
        self.controller.snapshot(self).await
    }

    pub fn events(&self) -> SessionEventReceiver {
        self.controller.subscribe_session(self)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// 过滤的事件接收器
pub struct SessionEventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    session_id: SessionId,
}

impl SessionEventReceiver {
    pub async fn recv(&mut self) -> Result<SessionEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.session_id() == self.session_id {
                return Ok(event);
            }
        }
    }
}
