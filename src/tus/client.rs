use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;
use super::constants::{DEFAULT_TIMEOUT, OFFSET_OCTET_STREAM, TUS_RESUMABLE};
use super::errors::{Result, TusError};
use super::transport::{CreateUpload, Transport};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TusClientConfig {
    pub endpoint: String,
    /// 单位秒
    pub timeout: u64,
    pub tcp_nodelay: bool,
    /// 每个请求都会带上的额外头部，例如 apikey
    pub headers: HashMap<String, String>,
}

impl Default for TusClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: DEFAULT_TIMEOUT,
            tcp_nodelay: true,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TusClient {
    client: Client,
    endpoint: String,
    headers: HeaderMap,
}

impl TusClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_config(TusClientConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        })
    }

    pub fn with_config(config: TusClientConfig) -> Result<Self> {
        Url::parse(&config.endpoint)?;

        let mut headers = HeaderMap::new();
        for (k, v) in &config.headers {
            headers.insert(HeaderName::from_str(k)?, HeaderValue::from_str(v)?);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .tcp_nodelay(config.tcp_nodelay)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            headers,
        })
    }

    fn create_headers(&self, auth: Option<&str>) -> Result<HeaderMap> {
        let mut headers = self.headers.clone();
        headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_RESUMABLE));

        if let Some(token) = auth {
            headers.insert("Authorization", HeaderValue::from_str(&bearer(token))?);
        }

        Ok(headers)
    }

    pub fn parse_offset_header(status: u16, headers: &HeaderMap) -> Result<u64> {
        match headers.get("Upload-Offset") {
            Some(value) => {
                let offset = value
                    .to_str()
                    .map_err(|err| TusError::header_error("Upload-Offset", err.to_string()))?
                    .parse::<u64>()
                    .map_err(|err| TusError::header_error("Upload-Offset", err.to_string()))?;

                Ok(offset)
            }
            None => Err(TusError::server_error(status, "No 'upload-offset' header in response")),
        }
    }

    /// Servers may answer with a relative `Location`, resolve it against the endpoint.
    pub fn resolve_location(endpoint: &str, location: &str) -> Result<String> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(location.to_string());
        }

        let base = Url::parse(endpoint)?;
        Ok(base.join(location)?.to_string())
    }
}

fn bearer(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

async fn error_body(response: reqwest::Response, fallback: &str) -> String {
    match response.text().await {
        Ok(body) if !body.trim().is_empty() => body,
        _ => fallback.to_string(),
    }
}

#[async_trait]
impl Transport for TusClient {
    async fn create_upload(&self, request: &CreateUpload) -> Result<String> {
        let mut headers = self.create_headers(request.auth.as_deref())?;
        headers.insert("Upload-Length", HeaderValue::from(request.upload_length));
        headers.insert("Upload-Metadata", HeaderValue::from_str(&request.metadata.to_header())?);

        if request.upsert {
            headers.insert("x-upsert", HeaderValue::from_static("true"));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let message = error_body(response, "Failed to create upload").await;
            return Err(TusError::server_error(status.as_u16(), message));
        }

        let location = match response.headers().get("location") {
            Some(loc) => loc
                .to_str()
                .map_err(|err| TusError::header_error("Location", err.to_string()))?
                .to_string(),
            None => {
                return Err(TusError::server_error(
                    status.as_u16(),
                    "Not 'location' header in response",
                ));
            }
        };

        let upload_url = TusClient::resolve_location(&self.endpoint, &location)?;
        debug!(upload_url = %upload_url, length = request.upload_length, "created upload");

        Ok(upload_url)
    }

    async fn get_offset(&self, upload_url: &str, auth: Option<&str>) -> Result<u64> {
        let headers = self.create_headers(auth)?;

        let response = self.client.head(upload_url).headers(headers).send().await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(TusError::server_error(status.as_u16(), "Failed to get upload offset"));
        }

        TusClient::parse_offset_header(status.as_u16(), response.headers())
    }

    async fn upload_chunk(
        &self,
        upload_url: &str,
        offset: u64,
        data: Bytes,
        auth: Option<&str>,
    ) -> Result<u64> {
        let length = data.len();
        let mut headers = self.create_headers(auth)?;
        headers.insert("Upload-Offset", HeaderValue::from(offset));
        headers.insert("Content-Type", HeaderValue::from_static(OFFSET_OCTET_STREAM));
        headers.insert("Content-Length", HeaderValue::from(length));

        let response = self
            .client
            .patch(upload_url)
            .headers(headers)
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT && status != StatusCode::OK {
            let message = error_body(response, "Failed to patch file").await;
            return Err(TusError::server_error(status.as_u16(), message));
        }

        let next_offset = TusClient::parse_offset_header(status.as_u16(), response.headers())?;
        debug!(upload_url, offset, next_offset, "chunk acknowledged");

        Ok(next_offset)
    }

    async fn delete_upload(&self, upload_url: &str, auth: Option<&str>) -> Result<()> {
        let headers = self.create_headers(auth)?;

        let response = self
            .client
            .delete(upload_url)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(TusError::server_error(status.as_u16(), "Failed to delete upload"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Upload-Offset", HeaderValue::from_static("6291456"));
        assert_eq!(TusClient::parse_offset_header(204, &headers).unwrap(), 6291456);

        headers.insert("Upload-Offset", HeaderValue::from_static("abc"));
        let err = TusClient::parse_offset_header(204, &headers).unwrap_err();
        assert!(matches!(err, TusError::HeaderParseError { .. }));

        let err = TusClient::parse_offset_header(204, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, TusError::ServerError { status_code: 204, .. }));
    }

    #[test]
    fn test_resolve_location() {
        let endpoint = "https://project.example.co/storage/v1/upload/resumable";

        assert_eq!(
            TusClient::resolve_location(endpoint, "https://cdn.example.co/files/abc").unwrap(),
            "https://cdn.example.co/files/abc"
        );
        assert_eq!(
            TusClient::resolve_location(endpoint, "/storage/v1/upload/resumable/abc").unwrap(),
            "https://project.example.co/storage/v1/upload/resumable/abc"
        );
    }

    #[test]
    fn test_bearer() {
        assert_eq!(bearer("abc"), "Bearer abc");
        assert_eq!(bearer("Bearer abc"), "Bearer abc");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(TusClient::new("not a url"), Err(TusError::InvalidUrl(_))));
    }

    #[test]
    fn test_headers() {
        let mut config = TusClientConfig {
            endpoint: "http://localhost:1080/files/".to_string(),
            ..Default::default()
        };
        config.headers.insert("apikey".to_string(), "anon".to_string());

        let client = TusClient::with_config(config).unwrap();
        let headers = client.create_headers(Some("token")).unwrap();

        assert_eq!(headers.get("Tus-Resumable").unwrap(), TUS_RESUMABLE);
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer token");
        assert_eq!(headers.get("apikey").unwrap(), "anon");
    }
}
