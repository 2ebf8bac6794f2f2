use std::sync::Arc;

use crate::auth::LastUsedRecorder;
use crate::auth::last_used::DEFAULT_CAPACITY;
use crate::config::Config;
use crate::credentials::Credentials;
use crate::storage::{InMemoryStore, Storage};

/// Shared state handed to every handler and middleware
///
/// Cheap to clone: everything behind it is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub credentials: Credentials,
    pub recorder: LastUsedRecorder,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builder pattern for constructing AppState
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Builder for AppState with fluent API
///
/// Unset parts default to an in-memory store, default hashing parameters
/// and default configuration.
#[must_use = "builder does nothing until you call build()"]
pub struct AppStateBuilder {
    storage: Option<Arc<dyn Storage>>,
    credentials: Option<Credentials>,
    config: Option<Config>,
    recorder_capacity: usize,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            credentials: None,
            config: None,
            recorder_capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Queue depth for pending last-used updates
    pub fn with_recorder_capacity(mut self, capacity: usize) -> Self {
        self.recorder_capacity = capacity.max(1);
        self
    }

    /// Assemble the state and start the last-used worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> AppState {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let recorder = LastUsedRecorder::spawn(storage.clone(), self.recorder_capacity);

        AppState {
            storage,
            credentials: self.credentials.unwrap_or_default(),
            recorder,
            config: Arc::new(self.config.unwrap_or_default()),
        }
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PasswordConfig;
    use crate::storage::OrganizationStore;

    #[tokio::test]
    async fn test_defaults_to_memory_store() {
        let state = AppState::builder()
            .with_credentials(Credentials::new(PasswordConfig::fast()))
            .build();

        state.storage.ping().await.unwrap();
        state.storage.create_organization("acme").await.unwrap();
        assert_eq!(state.config.server.port, 8080);

        state.recorder.shutdown().await;
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let state = AppState::builder().build();
        let clone = state.clone();

        state.storage.create_organization("shared").await.unwrap();
        assert!(clone.storage.get_organization_by_name("shared").await.is_ok());
    }
}
