//! Attachment uploads to a Supabase-style storage REST API.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::StorageError;
use crate::util::{dash_whitespace, error_message_from_body};

pub const DEFAULT_BUCKET: &str = "task-assets";

/// An uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub name: String,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    http: reqwest::Client,
    url: String,
    anon_key: String,
    bucket: String,
}

impl BlobStore {
    /// Fails with `NotConfigured` when the URL or key is missing or blank.
    pub fn new(
        url: Option<&str>,
        anon_key: Option<&str>,
        bucket: Option<&str>,
    ) -> Result<Self, StorageError> {
        let url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(StorageError::NotConfigured("SUPABASE_URL"))?;
        let anon_key = anon_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(StorageError::NotConfigured("SUPABASE_ANON_KEY"))?;
        let bucket = bucket
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BUCKET);
        Ok(Self {
            http: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            bucket: bucket.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Same store, different bucket.
    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.url, self.bucket, name
        )
    }

    /// Read `path` and upload it under a fresh timestamped name.
    pub async fn upload_file(&self, path: &Path) -> Result<StoredObject, StorageError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::NoFileName(path.to_path_buf()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StorageError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        self.upload_bytes(&file_name, bytes).await
    }

    pub async fn upload_bytes(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        let name = object_name(file_name, Utc::now().timestamp_millis());
        let content_type = mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string();
        let endpoint = format!("{}/storage/v1/object/{}/{}", self.url, self.bucket, name);
        debug!(bucket = %self.bucket, name = %name, content_type = %content_type, size = bytes.len(), "uploading object");

        let resp = self
            .http
            .post(&endpoint)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header("cache-control", "3600")
            .header("x-upsert", "false")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(StorageError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StorageError::Upload {
                bucket: self.bucket.clone(),
                status: status.as_u16(),
                message: error_message_from_body(&text)
                    .unwrap_or_else(|| status.to_string()),
            });
        }

        let public_url = self.public_url(&name);
        info!(url = %public_url, "uploaded object");
        Ok(StoredObject {
            bucket: self.bucket.clone(),
            name,
            public_url,
        })
    }
}

/// `<millis>_<name>` with whitespace runs turned into dashes.
pub fn object_name(file_name: &str, millis: i64) -> String {
    format!("{}_{}", millis, dash_whitespace(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_are_reported() {
        let err = BlobStore::new(None, Some("key"), None).unwrap_err();
        assert!(matches!(err, StorageError::NotConfigured("SUPABASE_URL")));

        let err = BlobStore::new(Some("https://x.supabase.co"), Some("  "), None).unwrap_err();
        assert!(matches!(err, StorageError::NotConfigured("SUPABASE_ANON_KEY")));
    }

    #[test]
    fn test_default_bucket_and_public_url() {
        let store = BlobStore::new(Some("https://x.supabase.co/"), Some("key"), None).unwrap();
        assert_eq!(store.bucket(), DEFAULT_BUCKET);
        assert_eq!(
            store.public_url("1_a.png"),
            "https://x.supabase.co/storage/v1/object/public/task-assets/1_a.png"
        );
        let store = store.with_bucket("avatars");
        assert_eq!(store.bucket(), "avatars");
    }

    #[test]
    fn test_object_name_dashes_whitespace() {
        assert_eq!(
            object_name("design  spec v2.pdf", 1700000000000),
            "1700000000000_design-spec-v2.pdf"
        );
    }

    #[tokio::test]
    async fn test_upload_file_reports_missing_file() {
        let store = BlobStore::new(Some("http://127.0.0.1:9"), Some("key"), None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = store
            .upload_file(&dir.path().join("missing.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Read { .. }));
    }
}
