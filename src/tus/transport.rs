use async_trait::async_trait;
use bytes::Bytes;
use super::errors::Result;
use super::metadata::UploadMetadata;

/// 创建上传资源所需参数
#[derive(Debug, Clone)]
pub struct CreateUpload {
    pub upload_length: u64,
    pub metadata: UploadMetadata,
    /// Bearer token，由调用方在 start 之前准备好
    pub auth: Option<String>,
    /// 目标对象已存在时覆盖
    pub upsert: bool,
}

/// Resumable upload endpoint.
///
/// Implementations perform exactly one request per call; retrying is the
/// caller's job (see `utils::retry`). Aborting an in-flight call is done by
/// dropping its future.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an upload resource and return its absolute URL.
    async fn create_upload(&self, request: &CreateUpload) -> Result<String>;

    /// Offset the endpoint has acknowledged so far.
    async fn get_offset(&self, upload_url: &str, auth: Option<&str>) -> Result<u64>;

    /// Send one chunk starting at `offset`, returning the new offset.
    async fn upload_chunk(
        &self,
        upload_url: &str,
        offset: u64,
        data: Bytes,
        auth: Option<&str>,
    ) -> Result<u64>;

    /// Terminate the upload and discard the partial object.
    async fn delete_upload(&self, upload_url: &str, auth: Option<&str>) -> Result<()>;
}
