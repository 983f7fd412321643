mod client;
mod constants;
mod errors;
mod metadata;
mod transport;

pub use client::{TusClient, TusClientConfig};
pub use constants::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT, OFFSET_OCTET_STREAM, TUS_RESUMABLE};
pub use errors::{classify_status, ErrorKind, Result, TusError};
pub use metadata::UploadMetadata;
pub use transport::{CreateUpload, Transport};
