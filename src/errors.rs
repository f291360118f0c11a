//! Typed error hierarchy for the opshub client.
//!
//! Three top-level enums cover the three external surfaces:
//! - `SyncError`: live connection, wire protocol and reconciliation failures
//! - `ApiError`: REST backend failures
//! - `StorageError`: blob storage upload failures

use thiserror::Error;

/// Errors from the live synchronization layer.
///
/// None of these reach rendering code: the connection driver logs them and
/// falls back to degraded (snapshot-only) mode.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid live endpoint '{0}': expected an http(s) or ws(s) URL")]
    InvalidEndpoint(String),

    #[error("Failed to open transport to {url}: {message}")]
    TransportOpen { url: String, message: String },

    #[error("Handshake with {url} timed out after {timeout_ms}ms")]
    HandshakeTimeout { url: String, timeout_ms: u64 },

    #[error("Transport closed before the handshake completed")]
    ClosedDuringHandshake,

    #[error("Server rejected the socket connection: {0}")]
    ConnectRejected(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Malformed payload for '{event}': {message}")]
    MalformedPayload { event: String, message: String },
}

/// Errors from the REST backend client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API base URL '{0}'")]
    InvalidUrl(String),

    #[error("Request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to encode request body for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// HTTP status for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Backend-provided message, falling back to the full error text.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors from the blob storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage is not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File path {0} has no file name")]
    NoFileName(std::path::PathBuf),

    #[error("Upload request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Upload to bucket '{bucket}' failed with {status}: {message}")]
    Upload {
        bucket: String,
        status: u16,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_handshake_timeout_carries_url() {
        let err = SyncError::HandshakeTimeout {
            url: "ws://localhost:5000".to_string(),
            timeout_ms: 20_000,
        };
        match &err {
            SyncError::HandshakeTimeout { url, timeout_ms } => {
                assert_eq!(url, "ws://localhost:5000");
                assert_eq!(*timeout_ms, 20_000);
            }
            _ => panic!("Expected HandshakeTimeout"),
        }
        assert!(err.to_string().contains("20000ms"));
    }

    #[test]
    fn api_error_status_is_matchable() {
        let err = ApiError::Status {
            path: "/tasks/t1".to_string(),
            status: 404,
            message: "Task not found".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.is_not_found());
        assert_eq!(err.user_message(), "Task not found");
        assert!(err.to_string().contains("/tasks/t1"));
    }

    #[test]
    fn api_error_invalid_url_has_no_status() {
        let err = ApiError::InvalidUrl("nope".to_string());
        assert_eq!(err.status(), None);
        assert!(!err.is_not_found());
        assert!(err.user_message().contains("nope"));
    }

    #[test]
    fn storage_error_not_configured_names_the_key() {
        let err = StorageError::NotConfigured("SUPABASE_ANON_KEY");
        assert!(err.to_string().contains("SUPABASE_ANON_KEY"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SyncError::ClosedDuringHandshake);
        assert_std_error(&ApiError::InvalidUrl("x".into()));
        assert_std_error(&StorageError::NotConfigured("SUPABASE_URL"));
    }
}
