//! Object storage client for chat attachments.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collab::{MediaFile, ObjectStorage};
use crate::config::ClientConfig;
use crate::error::StorageError;

/// Uploads into one bucket of the hosted backend's storage API.
#[derive(Clone)]
pub struct BucketStorage {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
    access_token: String,
}

impl BucketStorage {
    pub fn new(config: &ClientConfig, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            bucket: config.storage_bucket.clone(),
            api_key: config.anon_key.clone(),
            access_token: access_token.into(),
        }
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{path}", self.base_url, self.bucket)
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.base_url, self.bucket
        )
    }
}

/// Unique object key that keeps a readable, URL-safe file name.
pub fn object_path(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    let name = if cleaned.is_empty() { "file" } else { cleaned };
    format!("{}/{name}", Uuid::new_v4())
}

#[async_trait]
impl ObjectStorage for BucketStorage {
    async fn upload(&self, file: &MediaFile) -> Result<String, StorageError> {
        let path = object_path(&file.file_name);
        debug!(path = %path, size = file.size(), "Uploading attachment");

        let response = self
            .http
            .post(self.upload_url(&path))
            .bearer_auth(&self.access_token)
            .header("apikey", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, &file.content_type)
            .header("x-upsert", "false")
            .body(file.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(path = %path, "Attachment uploaded");
        Ok(self.public_url(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_is_url_safe() {
        let path = object_path("holiday photo (1).JPG");
        let (prefix, name) = path.split_once('/').unwrap();
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(name, "holiday_photo__1_.JPG");
    }

    #[test]
    fn test_object_path_never_empty() {
        assert!(object_path("..").ends_with("/file"));
    }

    #[test]
    fn test_urls_follow_bucket_layout() {
        let config = ClientConfig {
            backend_url: "https://demo.example.co".into(),
            storage_bucket: "chat-media".into(),
            ..ClientConfig::default()
        };
        let storage = BucketStorage::new(&config, "tok");
        assert_eq!(
            storage.upload_url("a/b.png"),
            "https://demo.example.co/storage/v1/object/chat-media/a/b.png"
        );
        assert_eq!(
            storage.public_url("a/b.png"),
            "https://demo.example.co/storage/v1/object/public/chat-media/a/b.png"
        );
    }
}
