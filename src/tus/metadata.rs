use std::collections::BTreeMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// `Upload-Metadata` 头部内容，存储端靠它定位 bucket 与对象
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub bucket_name: Option<String>,
    pub object_name: String,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl UploadMetadata {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            ..Default::default()
        }
    }

    /// Encode as `key base64(value)` pairs joined by commas, per tus 1.0.
    pub fn to_header(&self) -> String {
        let mut parts = Vec::new();

        if let Some(bucket_name) = &self.bucket_name {
            parts.push(format!("bucketName {}", STANDARD.encode(bucket_name)));
        }

        parts.push(format!("objectName {}", STANDARD.encode(&self.object_name)));

        if let Some(content_type) = &self.content_type {
            parts.push(format!("contentType {}", STANDARD.encode(content_type)));
        }

        if let Some(cache_control) = &self.cache_control {
            parts.push(format!("cacheControl {}", STANDARD.encode(cache_control)));
        }

        for (key, value) in &self.custom {
            if value.is_empty() {
                parts.push(key.clone());
            } else {
                parts.push(format!("{} {}", key, STANDARD.encode(value)));
            }
        }

        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding() {
        let mut metadata = UploadMetadata::new("albums/2024/beach.mp4");
        metadata.bucket_name = Some("memories".to_string());
        metadata.content_type = Some("video/mp4".to_string());
        metadata.cache_control = Some("3600".to_string());
        metadata.custom.insert("is_confidential".to_string(), String::new());

        let header = metadata.to_header();
        let parts: Vec<&str> = header.split(',').collect();

        assert_eq!(parts[0], format!("bucketName {}", STANDARD.encode("memories")));
        assert_eq!(parts[1], format!("objectName {}", STANDARD.encode("albums/2024/beach.mp4")));
        assert_eq!(parts[2], format!("contentType {}", STANDARD.encode("video/mp4")));
        assert_eq!(parts[3], format!("cacheControl {}", STANDARD.encode("3600")));
        assert_eq!(parts[4], "is_confidential");
    }

    #[test]
    fn test_object_name_only() {
        let header = UploadMetadata::new("a.jpg").to_header();
        assert_eq!(header, format!("objectName {}", STANDARD.encode("a.jpg")));
    }
}
