pub const TUS_RESUMABLE: &str = "1.0.0";

pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// 6MB，与存储端要求的分块大小一致
pub const DEFAULT_CHUNK_SIZE: usize = 6 * 1024 * 1024;

/// 单位秒
pub const DEFAULT_TIMEOUT: u64 = 60;
