use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::tus::{CreateUpload, ErrorKind, Transport, TusError, UploadMetadata};
use crate::utils::{Estimate, RetryConfig, SpeedEstimator};
use super::controller::ControllerCommand;
use super::errors::{Result, SessionError};
use super::history::{HistoryRecord, HistoryStore};
use super::source::UploadSource;
use super::state::{AckOutcome, UploadSession};
use super::types::{
    ControllerConfig, DuplicatePolicy, ProgressCallback, ProgressSnapshot, SessionEvent,
    SessionFailure, SessionId, SessionState, UploadOptions, UploadStrategy,
};
use super::worker::{SessionWorker, UploadJob, WorkerMessage};

struct RunningUpload {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

struct SessionEntry {
    session: UploadSession,
    source: UploadSource,
    options: UploadOptions,
    estimator: SpeedEstimator,
    estimate: Option<Estimate>,
    observers: Vec<ProgressCallback>,
    /// 每次 start/resume 递增
    generation: u64,
    run: Option<RunningUpload>,
}

impl SessionEntry {
    fn snapshot(&self) -> ProgressSnapshot {
        let session = &self.session;
        ProgressSnapshot {
            session_id: session.id,
            file_name: session.file_name.clone(),
            destination_key: session.destination_key.clone(),
            file_size: session.total_bytes,
            progress_percent: session.progress_percent(),
            bytes_uploaded: session.bytes_transferred,
            bytes_total: session.total_bytes,
            upload_speed: self.estimate.map(|e| e.speed).unwrap_or(0.0),
            eta: self.estimate.and_then(|e| e.eta),
            state: session.state,
            is_uploading: session.state == SessionState::Uploading,
            is_paused: session.state == SessionState::Paused,
            error: session.last_error.clone(),
        }
    }

    fn notify(&self) -> ProgressSnapshot {
        let snapshot = self.snapshot();
        for observer in &self.observers {
            observer(&snapshot);
        }
        snapshot
    }
}

pub(crate) struct ControllerWorker {
    transport: Arc<dyn Transport>,
    history: Arc<dyn HistoryStore>,
    config: ControllerConfig,
    retry: Arc<RetryConfig>,
    sessions: HashMap<SessionId, SessionEntry>,
    pending: VecDeque<SessionId>,

    event_tx: broadcast::Sender<SessionEvent>,
    message_tx: mpsc::UnboundedSender<WorkerMessage>,
    message_rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl ControllerWorker {
    pub(crate) async fn run(
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryStore>,
        config: ControllerConfig,
        mut command_rx: mpsc::Receiver<ControllerCommand>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let retry = Arc::new(RetryConfig::from_delays(config.retry_delays.clone()));

        let mut worker = Self {
            transport,
            history,
            config,
            retry,
            sessions: HashMap::new(),
            pending: VecDeque::new(),
            event_tx,
            message_tx,
            message_rx,
        };

        // 主事件循环，等待命令或上传任务消息
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if worker.handle_command(command).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        worker.abort_all().await;
                        break;
                    }
                },
                Some(message) = worker.message_rx.recv() => {
                    worker.handle_message(message).await;
                }
            }

            worker.process_queue();
        }

        debug!("upload controller stopped");
    }

    async fn handle_command(&mut self, command: ControllerCommand) -> ControlFlow<()> {
        match command {
            ControllerCommand::Start { source, destination_key, options, observers, reply } => {
                let result = self.start(source, destination_key, options, observers).await;
                let _ = reply.send(result);
            }
            ControllerCommand::Pause { session_id, reply } => {
                let result = self.pause(session_id).await;
                let _ = reply.send(result);
            }
            ControllerCommand::Resume { session_id, reply } => {
                let result = self.resume(session_id);
                let _ = reply.send(result);
            }
            ControllerCommand::Cancel { session_id, delete_partial, reply } => {
                let result = self.cancel(session_id, delete_partial).await;
                let _ = reply.send(result);
            }
            ControllerCommand::Subscribe { session_id, callback, reply } => {
                let result = match self.sessions.get_mut(&session_id) {
                    Some(entry) => {
                        entry.observers.push(callback);
                        Ok(())
                    }
                    None => Err(SessionError::NotFound(session_id)),
                };
                let _ = reply.send(result);
            }
            ControllerCommand::Snapshot { session_id, reply } => {
                let snapshot = self.sessions.get(&session_id).map(SessionEntry::snapshot);
                let _ = reply.send(snapshot);
            }
            ControllerCommand::Sessions { reply } => {
                let sessions = self.sessions
                    .values()
                    .map(|entry| entry.session.clone())
                    .collect();
                let _ = reply.send(sessions);
            }
            ControllerCommand::Clean { reply } => {
                let before = self.sessions.len();
                self.sessions.retain(|_, entry| !entry.session.is_terminal());
                let _ = reply.send(before - self.sessions.len());
            }
            ControllerCommand::Shutdown { reply } => {
                self.abort_all().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    async fn start(
        &mut self,
        source: UploadSource,
        destination_key: String,
        options: UploadOptions,
        observers: Vec<ProgressCallback>,
    ) -> Result<SessionId> {
        if destination_key.trim().is_empty() {
            return Err(SessionError::EmptyDestination);
        }
        if options.chunk_size == 0 {
            return Err(SessionError::Transport(TusError::ParamError(
                "chunk_size must be greater than 0".to_string(),
            )));
        }

        let total_bytes = source.len().await?;
        // 单次上传的大小不能超过分块大小
        let threshold = self.config.large_file_threshold.min(options.chunk_size as u64);
        let strategy = UploadStrategy::select(total_bytes, threshold);
        let session_id = SessionId::new();
        let session = UploadSession::new(
            session_id,
            source.file_name(),
            destination_key,
            total_bytes,
            strategy,
        )?;

        // 新会话通过校验后才处理重复的目标
        if let Some(active) = self.active_for(&session.destination_key) {
            match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(SessionError::DuplicateDestination(session.destination_key));
                }
                DuplicatePolicy::Supersede => {
                    info!(session = %active, key = %session.destination_key, "superseding active upload");
                    self.cancel(active, false).await?;
                }
            }
        }

        info!(
            session = %session_id,
            key = %session.destination_key,
            total_bytes,
            ?strategy,
            "upload session created"
        );

        let mut estimator = SpeedEstimator::new();
        if let Some(alpha) = self.config.speed_smoothing {
            estimator = estimator.with_smoothing(alpha);
        }

        self.sessions.insert(session_id, SessionEntry {
            session,
            source,
            options,
            estimator,
            estimate: None,
            observers,
            generation: 0,
            run: None,
        });
        self.pending.push_back(session_id);
        self.process_queue();

        Ok(session_id)
    }

    fn active_for(&self, destination_key: &str) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|entry| !entry.session.is_terminal() && entry.session.destination_key == destination_key)
            .map(|entry| entry.session.id)
    }

    /// 暂停中的会话仍占用并发名额
    fn active_uploads(&self) -> usize {
        self.sessions
            .values()
            .filter(|entry| matches!(entry.session.state, SessionState::Uploading | SessionState::Paused))
            .count()
    }

    fn process_queue(&mut self) {
        while self.active_uploads() < self.config.max_concurrent.max(1) {
            let Some(session_id) = self.pending.pop_front() else {
                break;
            };

            let Some(entry) = self.sessions.get_mut(&session_id) else {
                continue;
            };

            if entry.session.start().is_err() {
                continue;
            }

            entry.estimator.reset();
            entry.estimator.update(0, entry.session.total_bytes, Instant::now());
            self.emit_state_change(session_id, SessionState::Pending, SessionState::Uploading);
            self.spawn_run(session_id);
        }
    }

    fn spawn_run(&mut self, session_id: SessionId) {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };

        entry.generation += 1;

        let session = &entry.session;
        let options = &entry.options;
        let chunk_size = match session.strategy {
            UploadStrategy::Single => usize::try_from(session.total_bytes).unwrap_or(usize::MAX),
            UploadStrategy::Chunked => options.chunk_size,
        };

        let mut metadata = UploadMetadata::new(session.destination_key.clone());
        metadata.bucket_name = options.bucket.clone();
        metadata.content_type = options.content_type.clone();
        metadata.cache_control = options.cache_control.clone();
        metadata.custom = options.metadata.clone();

        let job = UploadJob {
            session_id,
            generation: entry.generation,
            source: entry.source.clone(),
            total_bytes: session.total_bytes,
            chunk_size,
            upload_url: session.upload_url.clone(),
            create: CreateUpload {
                upload_length: session.total_bytes,
                metadata,
                auth: options.token.clone(),
                upsert: options.upsert,
            },
        };

        let cancellation_token = CancellationToken::new();
        let worker = SessionWorker {
            transport: self.transport.clone(),
            retry: self.retry.clone(),
            cancellation_token: cancellation_token.clone(),
            message_tx: self.message_tx.clone(),
        };

        let join_handle = tokio::spawn(worker.run(job));
        entry.run = Some(RunningUpload {
            cancellation_token,
            join_handle,
        });
    }

    /// Abort the running transfer and wait for it, then apply whatever it reported before stopping.
    async fn stop_run(&mut self, session_id: SessionId) {
        let run = self.sessions
            .get_mut(&session_id)
            .and_then(|entry| entry.run.take());

        if let Some(run) = run {
            run.cancellation_token.cancel();
            if let Err(err) = run.join_handle.await {
                warn!(session = %session_id, "upload task ended abnormally: {}", err);
            }
        }

        while let Ok(message) = self.message_rx.try_recv() {
            self.handle_message(message).await;
        }
    }

    async fn pause(&mut self, session_id: SessionId) -> Result<()> {
        let state = self.state_of(session_id)?;
        if state != SessionState::Uploading {
            return Err(SessionError::invalid_state(session_id, state, "pause"));
        }

        self.stop_run(session_id).await;

        let entry = self.entry_mut(session_id)?;
        let old_state = entry.session.pause()?;
        entry.estimate = None;
        entry.notify();

        info!(session = %session_id, bytes = entry.session.bytes_transferred, "upload paused");
        self.emit_state_change(session_id, old_state, SessionState::Paused);

        Ok(())
    }

    fn resume(&mut self, session_id: SessionId) -> Result<()> {
        let entry = self.entry_mut(session_id)?;
        let old_state = entry.session.resume()?;

        entry.estimator.reset();
        entry.estimator.update(entry.session.bytes_transferred, entry.session.total_bytes, Instant::now());
        entry.notify();

        info!(session = %session_id, offset = entry.session.bytes_transferred, "upload resumed");
        self.emit_state_change(session_id, old_state, SessionState::Uploading);
        self.spawn_run(session_id);

        Ok(())
    }

    async fn cancel(&mut self, session_id: SessionId, delete_partial: bool) -> Result<()> {
        let state = self.state_of(session_id)?;
        if state.is_terminal() {
            return Err(SessionError::invalid_state(session_id, state, "cancel"));
        }

        self.stop_run(session_id).await;

        let entry = self.entry_mut(session_id)?;
        if entry.session.is_terminal() {
            return Err(SessionError::invalid_state(session_id, entry.session.state, "cancel"));
        }

        let mut delete_error = None;
        if delete_partial {
            if let Some(upload_url) = entry.session.upload_url.clone() {
                let auth = entry.options.token.clone();
                match self.transport.delete_upload(&upload_url, auth.as_deref()).await {
                    Ok(()) => debug!(session = %session_id, "partial upload deleted"),
                    Err(err) => {
                        warn!(session = %session_id, "failed to delete partial upload: {}", err);
                        delete_error = Some(SessionFailure::from(&err));
                    }
                }
            }
        }

        // 删除失败不影响取消，但会留在快照和历史记录里
        let entry = self.entry_mut(session_id)?;
        let old_state = entry.session.cancel()?;
        if delete_error.is_some() {
            entry.session.last_error = delete_error;
        }
        entry.estimate = None;
        entry.notify();
        self.pending.retain(|id| *id != session_id);

        info!(session = %session_id, delete_partial, "upload cancelled");
        self.emit_state_change(session_id, old_state, SessionState::Cancelled);
        self.record_history(session_id).await;

        Ok(())
    }

    async fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Created { session_id, generation, upload_url } => {
                if let Some(entry) = self.current_entry(session_id, generation) {
                    entry.session.upload_url = Some(upload_url);
                }
            }
            WorkerMessage::Ack { session_id, generation, offset } => {
                self.handle_ack(session_id, generation, offset).await;
            }
            WorkerMessage::Finished { session_id, generation, result } => {
                self.handle_finished(session_id, generation, result).await;
            }
        }
    }

    /// 只接受当前这次运行、且仍在上传中的会话的消息
    fn current_entry(&mut self, session_id: SessionId, generation: u64) -> Option<&mut SessionEntry> {
        self.sessions
            .get_mut(&session_id)
            .filter(|entry| entry.generation == generation && entry.session.state == SessionState::Uploading)
    }

    async fn handle_ack(&mut self, session_id: SessionId, generation: u64, offset: u64) {
        let Some(entry) = self.current_entry(session_id, generation) else {
            debug!(session = %session_id, generation, offset, "dropping stale ack");
            return;
        };

        match entry.session.record_ack(offset) {
            Ok(AckOutcome::Unchanged) => {}
            Ok(outcome) => {
                let total = entry.session.total_bytes;
                if let Some(estimate) = entry.estimator.update(offset, total, Instant::now()) {
                    entry.estimate = Some(estimate);
                }
                if outcome == AckOutcome::Completed {
                    entry.estimate = Some(Estimate {
                        speed: entry.estimate.map(|e| e.speed).unwrap_or(0.0),
                        eta: Some(std::time::Duration::ZERO),
                    });
                    entry.run = None;
                }

                let snapshot = entry.notify();
                let upload_url = entry.session.upload_url.clone().unwrap_or_default();
                let _ = self.event_tx.send(SessionEvent::Progress(snapshot));

                if outcome == AckOutcome::Completed {
                    info!(session = %session_id, total, "upload completed");
                    self.emit_state_change(session_id, SessionState::Uploading, SessionState::Completed);
                    let _ = self.event_tx.send(SessionEvent::Completed { session_id, upload_url });
                    self.record_history(session_id).await;
                }
            }
            Err(err) => {
                let failure = SessionFailure {
                    kind: ErrorKind::Server,
                    message: err.to_string(),
                };
                self.fail(session_id, failure).await;
            }
        }
    }

    async fn handle_finished(&mut self, session_id: SessionId, generation: u64, result: crate::tus::Result<String>) {
        let Some(entry) = self.current_entry(session_id, generation) else {
            return;
        };
        entry.run = None;

        match result {
            Ok(upload_url) => {
                // 所有分块都已确认时，会话已经在 handle_ack 中完成
                let session = &entry.session;
                let failure = SessionFailure {
                    kind: ErrorKind::Server,
                    message: format!(
                        "upload {} finished at {} of {} bytes",
                        upload_url, session.bytes_transferred, session.total_bytes
                    ),
                };
                self.fail(session_id, failure).await;
            }
            Err(err) if err.kind() == ErrorKind::LocalAbort => {
                debug!(session = %session_id, "upload task aborted");
            }
            Err(err) => {
                self.fail(session_id, SessionFailure::from(&err)).await;
            }
        }
    }

    async fn fail(&mut self, session_id: SessionId, failure: SessionFailure) {
        let Ok(entry) = self.entry_mut(session_id) else {
            return;
        };

        if let Some(run) = entry.run.take() {
            run.cancellation_token.cancel();
        }

        let old_state = match entry.session.fail(failure.clone()) {
            Ok(old_state) => old_state,
            Err(err) => {
                warn!(session = %session_id, "cannot mark upload failed: {}", err);
                return;
            }
        };
        entry.estimate = None;
        entry.notify();

        error!(session = %session_id, kind = %failure.kind, "upload failed: {}", failure.message);
        self.emit_state_change(session_id, old_state, SessionState::Failed);
        let _ = self.event_tx.send(SessionEvent::Failed { session_id, error: failure });
        self.record_history(session_id).await;
    }

    async fn record_history(&self, session_id: SessionId) {
        let Some(entry) = self.sessions.get(&session_id) else {
            return;
        };

        let record = HistoryRecord::from(&entry.session);
        if let Err(err) = self.history.append(record).await {
            warn!(session = %session_id, "failed to append upload history: {}", err);
            return;
        }
        if let Err(err) = self.history.evict_oldest(self.config.history_limit).await {
            warn!("failed to evict upload history: {}", err);
        }
    }

    async fn abort_all(&mut self) {
        let running: Vec<SessionId> = self.sessions
            .iter()
            .filter(|(_, entry)| entry.run.is_some())
            .map(|(id, _)| *id)
            .collect();

        for session_id in running {
            self.stop_run(session_id).await;
        }
    }

    fn state_of(&self, session_id: SessionId) -> Result<SessionState> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.session.state)
            .ok_or(SessionError::NotFound(session_id))
    }

    fn entry_mut(&mut self, session_id: SessionId) -> Result<&mut SessionEntry> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))
    }

    fn emit_state_change(&self, session_id: SessionId, old_state: SessionState, new_state: SessionState) {
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            session_id,
            old_state,
            new_state,
        });
    }
}
