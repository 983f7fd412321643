use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use crate::tus::{CreateUpload, Result, Transport, TusError};
use crate::utils::{retry_until_cancelled, retry_with_config, RetryConfig};
use super::source::UploadSource;
use super::types::SessionId;

/// 上传任务发回控制器的消息，`generation` 用来丢弃已中止任务的迟到消息
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Created {
        session_id: SessionId,
        generation: u64,
        upload_url: String,
    },
    Ack {
        session_id: SessionId,
        generation: u64,
        offset: u64,
    },
    Finished {
        session_id: SessionId,
        generation: u64,
        result: Result<String>,
    },
}

/// 一次运行（start 或 resume）所需的全部参数
pub(crate) struct UploadJob {
    pub(crate) session_id: SessionId,
    pub(crate) generation: u64,
    pub(crate) source: UploadSource,
    pub(crate) total_bytes: u64,
    pub(crate) chunk_size: usize,
    /// 已有上传资源时走 HEAD 续传，否则先 POST 创建
    pub(crate) upload_url: Option<String>,
    pub(crate) create: CreateUpload,
}

pub(crate) struct SessionWorker {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry: Arc<RetryConfig>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) message_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl SessionWorker {
    pub(crate) async fn run(self, job: UploadJob) {
        let session_id = job.session_id;
        let generation = job.generation;

        let result = match &job.upload_url {
            Some(url) => Ok(url.clone()),
            None => self.create(&job).await,
        };

        // 执行
        let result = match result {
            Ok(upload_url) => tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => Err(TusError::Cancelled),
                result = self.drive(&job, upload_url) => result,
            },
            Err(err) => Err(err),
        };

        let _ = self.message_tx.send(WorkerMessage::Finished {
            session_id,
            generation,
            result,
        });
    }

    /// An in-flight POST is never aborted, so every created resource is
    /// reported to the controller. Cancellation only applies between attempts.
    async fn create(&self, job: &UploadJob) -> Result<String> {
        let transport = self.transport.as_ref();
        let create = &job.create;

        let url = retry_until_cancelled(&self.retry, &self.cancellation_token, move |_| {
            transport.create_upload(create)
        })
        .await?;

        info!(session = %job.session_id, upload_url = %url, "upload resource created");
        self.send(WorkerMessage::Created {
            session_id: job.session_id,
            generation: job.generation,
            upload_url: url.clone(),
        });
        Ok(url)
    }

    async fn drive(&self, job: &UploadJob, upload_url: String) -> Result<String> {
        let transport = self.transport.as_ref();
        let auth = job.create.auth.as_deref();

        let mut offset = if job.upload_url.is_some() {
            // 续传
            let url = upload_url.as_str();
            let offset = retry_with_config(&self.retry, move |_| transport.get_offset(url, auth)).await?;
            debug!(session = %job.session_id, offset, "resuming upload");
            offset
        } else {
            0
        };

        if offset > job.total_bytes {
            return Err(TusError::OffsetOutOfRange {
                offset,
                length: job.total_bytes,
            });
        }
        if offset > 0 {
            self.ack(job, offset);
        }

        let mut reader = job.source.open().await?;
        let url = upload_url.as_str();

        while offset < job.total_bytes {
            let len = (job.total_bytes - offset).min(job.chunk_size as u64) as usize;
            let data = reader.read_at(offset, len).await?;
            if data.is_empty() {
                return Err(TusError::IoError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source ended at {} of {} bytes", offset, job.total_bytes),
                )));
            }

            let current = offset;
            offset = retry_with_config(&self.retry, move |attempt| {
                let data = data.clone();
                async move {
                    if attempt > 0 {
                        // 重试前先同步服务端偏移量
                        let server_offset = transport.get_offset(url, auth).await?;
                        if server_offset != current {
                            return Ok(server_offset);
                        }
                    }

                    let next = transport.upload_chunk(url, current, data, auth).await?;
                    if next <= current {
                        return Err(TusError::OffsetNotAdvanced {
                            expected: current,
                            actual: next,
                        });
                    }
                    Ok(next)
                }
            })
            .await?;

            if offset > job.total_bytes {
                return Err(TusError::OffsetOutOfRange {
                    offset,
                    length: job.total_bytes,
                });
            }

            self.ack(job, offset);
        }

        Ok(upload_url)
    }

    fn ack(&self, job: &UploadJob, offset: u64) {
        self.send(WorkerMessage::Ack {
            session_id: job.session_id,
            generation: job.generation,
            offset,
        });
    }

    fn send(&self, message: WorkerMessage) {
        let _ = self.message_tx.send(message);
    }
}
