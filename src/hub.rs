//! The application-level handle: one live connection manager, one signal
//! bus, one REST client and optionally one blob store.
//!
//! Built once at startup and passed around by reference. Views build their
//! live collections from it (see [`crate::feeds`]).

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, info};

use crate::api::{ApiClient, NewProject, NewTask, StaticToken};
use crate::config::HubConfig;
use crate::errors::{ApiError, StorageError};
use crate::live::{Connection, ConnectionManager, ConnectionOptions, Transport, WebSocketTransport};
use crate::models::{AttachmentKind, Identity, Project, Task, TaskAttachment};
use crate::storage::BlobStore;
use crate::sync::{Signal, SignalBus};
use crate::util::lock;

#[derive(Debug)]
pub struct Hub {
    manager: Arc<ConnectionManager>,
    signals: SignalBus,
    api: ApiClient,
    storage: Option<BlobStore>,
    identity: Mutex<Option<Identity>>,
}

impl Hub {
    pub fn new(
        api: ApiClient,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
        storage: Option<BlobStore>,
    ) -> Self {
        Self {
            manager: Arc::new(ConnectionManager::new(transport, options)),
            signals: SignalBus::new(),
            api,
            storage,
            identity: Mutex::new(None),
        }
    }

    /// Wire everything from resolved configuration. A missing storage setup
    /// only disables uploads.
    pub fn from_config(config: &HubConfig) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config.api_url(), Arc::new(StaticToken::new(config.token())))
            .context("Failed to create API client")?;
        let transport = WebSocketTransport::new(&config.socket_url())
            .context("Failed to create live transport")?;
        let storage = match BlobStore::new(
            config.storage_url().as_deref(),
            config.storage_key().as_deref(),
            Some(&config.storage_bucket()),
        ) {
            Ok(store) => Some(store),
            Err(e) => {
                debug!(error = %e, "attachment uploads disabled");
                None
            }
        };
        Ok(Self::new(
            api,
            Arc::new(transport),
            config.connection_options(),
            storage,
        ))
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn storage(&self) -> Option<&BlobStore> {
        self.storage.as_ref()
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.identity).clone()
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.manager.connection()
    }

    /// React to the identity provider. Signing in connects (or re-announces
    /// as the new user); signing out disconnects.
    pub fn set_identity(&self, identity: Option<Identity>) -> Option<Arc<Connection>> {
        *lock(&self.identity) = identity.clone();
        match identity {
            Some(identity) => {
                info!(user_id = %identity.user_id, "identity available, connecting");
                Some(self.manager.connect(&identity.user_id))
            }
            None => {
                info!("identity cleared, disconnecting");
                self.manager.disconnect();
                None
            }
        }
    }

    /// Create a project and tell this process's project views to re-fetch.
    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ApiError> {
        let created = self.api.create_project(project).await?;
        self.signals.publish(Signal::ProjectUpdate);
        Ok(created)
    }

    /// Create a task and tell this process's task views to re-fetch.
    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let created = self.api.create_task(task).await?;
        self.signals.publish(Signal::TaskUpdate);
        Ok(created)
    }

    /// Upload a file as a task attachment.
    pub async fn upload_attachment(&self, path: &Path) -> Result<TaskAttachment, StorageError> {
        let store = self
            .storage
            .as_ref()
            .ok_or(StorageError::NotConfigured("SUPABASE_URL"))?;
        let stored = store.upload_file(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(stored.name);
        Ok(TaskAttachment {
            name,
            url: stored.public_url,
            kind: AttachmentKind::Doc,
        })
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.manager.disconnect();
    }
}
