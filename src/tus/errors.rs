use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误分类，决定是否重试以及 UI 如何提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ErrorKind {
    /// 网络中断、超时、5xx 等瞬时错误，由传输层重试
    Network,
    /// Token 失效或无权限，不重试，需要重新认证后重新 start
    Auth,
    /// 服务端拒绝（配额、非法对象名等），不重试
    Server,
    /// 本地读取文件或参数错误
    Local,
    /// 用户主动暂停或取消
    LocalAbort,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Server => "server",
            ErrorKind::Local => "local",
            ErrorKind::LocalAbort => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TusError {
    #[error("HTTP Request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Invalid '{header_name}' header: {message}")]
    HeaderParseError {
        header_name: String,
        message: String,
    },

    #[error("Offset did not advance, expected more than {expected}, actual: {actual}")]
    OffsetNotAdvanced {
        expected: u64,
        actual: u64,
    },

    #[error("Offset {offset} is beyond upload length {length}")]
    OffsetOutOfRange {
        offset: u64,
        length: u64,
    },

    #[error("Param error: {0}")]
    ParamError(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TusError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn header_error(header_name: &str, message: impl Into<String>) -> Self {
        Self::HeaderParseError {
            header_name: header_name.to_string(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TusError::HttpError(err) => {
                if err.is_builder() {
                    ErrorKind::Local
                } else {
                    match err.status() {
                        Some(status) => classify_status(status.as_u16()),
                        None => ErrorKind::Network,
                    }
                }
            }
            TusError::ServerError { status_code, .. } => classify_status(*status_code),
            TusError::OffsetNotAdvanced { .. } => ErrorKind::Network,
            TusError::HeaderParseError { .. } | TusError::OffsetOutOfRange { .. } => ErrorKind::Server,
            TusError::Cancelled => ErrorKind::LocalAbort,
            TusError::IoError(_)
            | TusError::ParamError(_)
            | TusError::InvalidUrl(_)
            | TusError::InvalidHeaderValue(_)
            | TusError::InvalidHeaderName(_)
            | TusError::InternalError(_) => ErrorKind::Local,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// 状态码分类：408/409/423/429/5xx 视为瞬时错误
pub fn classify_status(status_code: u16) -> ErrorKind {
    match status_code {
        401 | 403 => ErrorKind::Auth,
        408 | 409 | 423 | 429 => ErrorKind::Network,
        500..=599 => ErrorKind::Network,
        _ => ErrorKind::Server,
    }
}

/// Error alias
pub type Result<T, E = TusError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(401), ErrorKind::Auth);
        assert_eq!(classify_status(403), ErrorKind::Auth);
        assert_eq!(classify_status(409), ErrorKind::Network);
        assert_eq!(classify_status(429), ErrorKind::Network);
        assert_eq!(classify_status(503), ErrorKind::Network);
        assert_eq!(classify_status(413), ErrorKind::Server);
        assert_eq!(classify_status(400), ErrorKind::Server);
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(TusError::server_error(500, "boom").kind(), ErrorKind::Network);
        assert_eq!(TusError::server_error(401, "expired").kind(), ErrorKind::Auth);
        assert_eq!(TusError::Cancelled.kind(), ErrorKind::LocalAbort);
        assert_eq!(
            TusError::OffsetOutOfRange { offset: 10, length: 5 }.kind(),
            ErrorKind::Server
        );

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(TusError::from(io).kind(), ErrorKind::Local);
        assert!(!TusError::server_error(401, "expired").is_retryable());
        assert!(TusError::server_error(502, "bad gateway").is_retryable());
    }
}
