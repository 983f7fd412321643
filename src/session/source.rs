use std::io::SeekFrom;
use std::path::PathBuf;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use crate::tus::{Result, TusError};

/// 待上传的数据，会话独占
#[derive(Debug, Clone)]
pub enum UploadSource {
    File(PathBuf),
    Memory {
        name: String,
        data: Bytes,
    },
}

impl UploadSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn memory(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            UploadSource::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            UploadSource::Memory { name, .. } => name.clone(),
        }
    }

    pub async fn len(&self) -> Result<u64> {
        match self {
            UploadSource::File(path) => {
                let metadata = tokio::fs::metadata(path).await?;
                if !metadata.is_file() {
                    return Err(TusError::ParamError(format!("Not a file: {}", path.display())));
                }
                Ok(metadata.len())
            }
            UploadSource::Memory { data, .. } => Ok(data.len() as u64),
        }
    }

    pub(crate) async fn open(&self) -> Result<SourceReader> {
        match self {
            UploadSource::File(path) => Ok(SourceReader::File(File::open(path).await?)),
            UploadSource::Memory { data, .. } => Ok(SourceReader::Memory(data.clone())),
        }
    }
}

pub(crate) enum SourceReader {
    File(File),
    Memory(Bytes),
}

impl SourceReader {
    /// Read up to `len` bytes starting at `offset`.
    pub(crate) async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        match self {
            SourceReader::File(file) => {
                file.seek(SeekFrom::Start(offset)).await?;

                let mut buffer = BytesMut::zeroed(len);
                let mut filled = 0;
                while filled < len {
                    let read = file.read(&mut buffer[filled..]).await?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                buffer.truncate(filled);

                Ok(buffer.freeze())
            }
            SourceReader::Memory(data) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data.slice(start..end))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_memory_reader() {
        let source = UploadSource::memory("a.bin", vec![1u8, 2, 3, 4, 5]);
        assert_eq!(source.len().await.unwrap(), 5);
        assert_eq!(source.file_name(), "a.bin");

        let mut reader = source.open().await.unwrap();
        assert_eq!(&reader.read_at(1, 3).await.unwrap()[..], &[2, 3, 4]);
        assert_eq!(&reader.read_at(3, 10).await.unwrap()[..], &[4, 5]);
        assert!(reader.read_at(9, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_reader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello memories").unwrap();

        let source = UploadSource::file(file.path());
        assert_eq!(source.len().await.unwrap(), 14);

        let mut reader = source.open().await.unwrap();
        assert_eq!(&reader.read_at(6, 8).await.unwrap()[..], b"memories");
        assert_eq!(&reader.read_at(0, 5).await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let source = UploadSource::file("/definitely/not/here.jpg");
        let err = source.len().await.unwrap_err();
        assert_eq!(err.kind(), crate::tus::ErrorKind::Local);
    }
}
