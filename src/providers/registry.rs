//! CRUD over provider configurations.
//!
//! Records are one JSON file per provider under `<data>/ai_providers/`.
//! Secret I/O is delegated to the credential store; nothing secret ever
//! touches these files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::ProviderId;
use crate::credentials::CredentialStore;
use crate::providers::records::AIProvider;

/// Registry of configured providers.
pub struct ProviderRegistry {
    dir: PathBuf,
    credentials: Arc<CredentialStore>,
    cache: DashMap<ProviderId, AIProvider>,
    write_locks: DashMap<ProviderId, Arc<Mutex<()>>>,
}

impl ProviderRegistry {
    /// Open the registry under the data directory, loading existing records.
    ///
    /// # Errors
    /// Returns an error if the registry directory cannot be created or read.
    pub fn new(data_dir: &Path, credentials: Arc<CredentialStore>) -> ChatResult<Self> {
        let dir = data_dir.join("ai_providers");
        fs::create_dir_all(&dir)?;

        let cache = DashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(ChatError::from)
                .and_then(|raw| serde_json::from_str::<AIProvider>(&raw).map_err(ChatError::from))
            {
                Ok(provider) => {
                    cache.insert(provider.id.clone(), provider);
                }
                Err(err) => {
                    warn!("Skipping unreadable provider record {}: {err}", path.display());
                }
            }
        }

        info!("Loaded {} provider record(s)", cache.len());
        Ok(Self {
            dir,
            credentials,
            cache,
            write_locks: DashMap::new(),
        })
    }

    /// Register a provider, optionally filing its API key.
    ///
    /// # Errors
    /// Returns an error if the record is invalid or cannot be persisted.
    pub async fn create(
        &self,
        provider: AIProvider,
        api_key: Option<&str>,
    ) -> ChatResult<AIProvider> {
        validate_record(&provider)?;

        let lock = self.lock_for(&provider.id);
        let _guard = lock.lock().await;

        self.write_record(&provider)?;
        self.cache.insert(provider.id.clone(), provider.clone());

        if let Some(key) = api_key {
            self.credentials.set(&provider.name, key).await?;
        }

        info!("Registered provider {} ({})", provider.name, provider.id);
        Ok(provider)
    }

    /// Look up a provider by id.
    #[must_use]
    pub fn get(&self, provider_id: &ProviderId) -> Option<AIProvider> {
        self.cache.get(provider_id).map(|entry| entry.value().clone())
    }

    /// List providers in registration order (`created_at` ascending).
    #[must_use]
    pub fn list(&self, include_inactive: bool) -> Vec<AIProvider> {
        let mut providers: Vec<AIProvider> = self
            .cache
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|p| include_inactive || p.active)
            .collect();
        providers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        providers
    }

    /// First active provider in registration order, if any.
    #[must_use]
    pub fn default_provider(&self) -> Option<AIProvider> {
        self.list(false).into_iter().next()
    }

    /// Replace a provider record, bumping `updated_at`.
    ///
    /// # Errors
    /// Fails with `provider_not_found` if the id is unknown, or if the
    /// updated record is invalid or cannot be persisted.
    pub async fn update(&self, mut provider: AIProvider) -> ChatResult<AIProvider> {
        validate_record(&provider)?;

        let lock = self.lock_for(&provider.id);
        let _guard = lock.lock().await;

        if !self.cache.contains_key(&provider.id) {
            return Err(ChatError::ProviderNotFound(provider.id));
        }

        provider.updated_at = Utc::now();
        self.write_record(&provider)?;
        self.cache.insert(provider.id.clone(), provider.clone());
        debug!("Updated provider {}", provider.id);
        Ok(provider)
    }

    /// Replace the provider's API key in the credential store.
    ///
    /// # Errors
    /// Fails with `provider_not_found` if the id is unknown, or if the
    /// credential file cannot be written.
    pub async fn set_api_key(&self, provider_id: &ProviderId, api_key: &str) -> ChatResult<()> {
        let provider = self
            .get(provider_id)
            .ok_or_else(|| ChatError::ProviderNotFound(provider_id.clone()))?;
        self.credentials.set(&provider.name, api_key).await
    }

    /// Delete a provider record and purge its credential entry.
    ///
    /// Usage, health, and limiter state keyed by this id are owned by other
    /// components; [`crate::services::Services::delete_provider`] removes
    /// those in the same stroke.
    ///
    /// # Errors
    /// Fails with `provider_not_found` if the id is unknown.
    pub async fn delete(&self, provider_id: &ProviderId) -> ChatResult<()> {
        let lock = self.lock_for(provider_id);
        let _guard = lock.lock().await;

        let Some((_, provider)) = self.cache.remove(provider_id) else {
            return Err(ChatError::ProviderNotFound(provider_id.clone()));
        };

        let path = self.record_path(provider_id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.credentials.delete(&provider.name).await?;
        self.write_locks.remove(provider_id);
        info!("Deleted provider {} ({})", provider.name, provider_id);
        Ok(())
    }

    fn record_path(&self, provider_id: &ProviderId) -> PathBuf {
        self.dir.join(format!("{provider_id}.json"))
    }

    fn write_record(&self, provider: &AIProvider) -> ChatResult<()> {
        let raw = serde_json::to_string_pretty(provider)?;
        fs::write(self.record_path(&provider.id), raw)?;
        Ok(())
    }

    fn lock_for(&self, provider_id: &ProviderId) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(provider_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn validate_record(provider: &AIProvider) -> ChatResult<()> {
    if provider.name.trim().is_empty() {
        return Err(ChatError::InvalidArgument(
            "provider name must not be empty".to_string(),
        ));
    }
    if let Some(base_url) = &provider.base_url {
        Url::parse(base_url)
            .map_err(|err| ChatError::InvalidArgument(format!("invalid base_url: {err}")))?;
    }
    Ok(())
}
