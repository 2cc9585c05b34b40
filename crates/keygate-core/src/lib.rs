//! Keygate Core - gated download engine
//!
//! This crate provides the authorization flow for secret-key downloads:
//! resource lookup, download limits, one download per client, durable
//! counters, and the mutation surface used by admin tooling.

mod delivery;
mod engine;
mod error;
mod keys;

pub use delivery::*;
pub use engine::*;
pub use error::*;
pub use keys::*;

use chrono::Utc;
use keygate_types::{
    ConsumedClient, Decision, DownloadResource, Grant, LookupMode, ResourceOptions,
    ResourceStatus, Settings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Database file inside the data directory
pub const DB_FILE_NAME: &str = "keygate.db";

/// The main Keygate core instance
#[derive(Clone)]
pub struct KeygateCore {
    db: KeygateDatabase,
    settings: Arc<RwLock<Settings>>,
    authorizer: Arc<RwLock<Authorizer>>,
    locks: ResourceLocks,
}

impl KeygateCore {
    /// Create a new KeygateCore instance backed by `data_dir`
    pub async fn new(data_dir: PathBuf) -> Result<Self, KeygateError> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let db = KeygateDatabase::new(data_dir.join(DB_FILE_NAME)).await?;
        let settings = db.load_settings().await?;
        let locks = ResourceLocks::new();
        let authorizer = build_authorizer(&db, &settings, &locks);

        Ok(Self {
            db,
            settings: Arc::new(RwLock::new(settings)),
            authorizer: Arc::new(RwLock::new(authorizer)),
            locks,
        })
    }

    pub fn db(&self) -> &KeygateDatabase {
        &self.db
    }

    // ========================================================================
    // Download Flow
    // ========================================================================

    /// Authorize a download and record it on success
    pub async fn authorize(&self, key: &str, client_id: &str) -> Result<Decision, KeygateError> {
        let authorizer = self.authorizer.read().await.clone();
        authorizer.authorize(key, client_id).await
    }

    /// Open the file behind a grant for streaming
    pub async fn open_delivery(&self, grant: &Grant) -> Result<DeliveryFile, KeygateError> {
        open_delivery(grant).await
    }

    /// Public usage counters for the resource behind `key`
    pub async fn status_by_key(&self, key: &str) -> Result<Option<ResourceStatus>, KeygateError> {
        let authorizer = self.authorizer.read().await.clone();
        match authorizer.resolve(key).await? {
            Some(resource) => {
                let unique_clients = self.db.count_consumed_clients(resource.id).await?;
                Ok(Some(resource.status(unique_clients)))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Resource Operations
    // ========================================================================

    /// Create a new resource
    pub async fn create_resource(&self, options: ResourceOptions) -> Result<DownloadResource, KeygateError> {
        let secret_key = match options.secret_key {
            Some(key) => {
                validate_secret_key(&key)?;
                key
            }
            None => generate_secret_key(),
        };
        let download_limit = options.download_limit.unwrap_or(1);
        validate_limit(download_limit)?;
        if let Some(path) = options.file_path.as_deref() {
            validate_file_path(path).await?;
        }

        let now = Utc::now();
        let mut resource = DownloadResource {
            id: 0,
            title: normalize_title(options.title.as_deref().unwrap_or_default()),
            secret_key,
            download_limit,
            download_count: 0,
            active: options.active.unwrap_or(true),
            file_path: options.file_path,
            file_name: options.file_name.filter(|n| !n.is_empty()),
            created_at: now,
            updated_at: now,
        };
        resource.id = self.db.insert_resource(&resource).await?;

        info!(resource_id = resource.id, "Created resource \"{}\"", resource.title);
        Ok(resource)
    }

    /// Update a resource; `None` fields are left untouched
    pub async fn update_resource(
        &self,
        id: i64,
        options: ResourceOptions,
    ) -> Result<DownloadResource, KeygateError> {
        let mut resource = self.get_resource(id).await?;

        if let Some(title) = options.title.as_deref() {
            resource.title = normalize_title(title);
        }
        if let Some(key) = options.secret_key {
            validate_secret_key(&key)?;
            resource.secret_key = key;
        }
        if let Some(limit) = options.download_limit {
            validate_limit(limit)?;
            resource.download_limit = limit;
        }
        if let Some(path) = options.file_path {
            validate_file_path(&path).await?;
            resource.file_path = Some(path);
        }
        if let Some(name) = options.file_name {
            resource.file_name = Some(name).filter(|n| !n.is_empty());
        }
        if let Some(active) = options.active {
            resource.active = active;
        }

        self.save_resource(resource).await
    }

    /// Replace the secret key; the old URL stops working immediately
    pub async fn set_secret_key(&self, id: i64, key: &str) -> Result<DownloadResource, KeygateError> {
        self.update_resource(
            id,
            ResourceOptions {
                secret_key: Some(key.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Replace the secret key with a freshly generated one
    pub async fn rotate_secret_key(&self, id: i64) -> Result<DownloadResource, KeygateError> {
        let resource = self.set_secret_key(id, &generate_secret_key()).await?;
        info!(resource_id = id, "Rotated secret key");
        Ok(resource)
    }

    pub async fn set_limit(&self, id: i64, limit: u32) -> Result<DownloadResource, KeygateError> {
        self.update_resource(
            id,
            ResourceOptions {
                download_limit: Some(limit),
                ..Default::default()
            },
        )
        .await
    }

    /// Point the resource at a file, or detach it with `None`
    pub async fn set_file_ref(
        &self,
        id: i64,
        file_path: Option<PathBuf>,
    ) -> Result<DownloadResource, KeygateError> {
        let mut resource = self.get_resource(id).await?;
        if let Some(path) = file_path.as_deref() {
            validate_file_path(path).await?;
        }
        resource.file_path = file_path;
        self.save_resource(resource).await
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<DownloadResource, KeygateError> {
        self.update_resource(
            id,
            ResourceOptions {
                active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    /// Set the download counter back to 0
    pub async fn reset_counter(&self, id: i64) -> Result<(), KeygateError> {
        self.get_resource(id).await?;
        let _guard = self.locks.acquire(id).await;
        self.db.reset_count(id).await?;
        info!(resource_id = id, "Download counter has been reset to 0");
        Ok(())
    }

    /// Forget which clients already downloaded
    pub async fn reset_consumed_clients(&self, id: i64) -> Result<(), KeygateError> {
        self.get_resource(id).await?;
        let _guard = self.locks.acquire(id).await;
        self.db.clear_consumed_clients(id).await?;
        info!(resource_id = id, "Consumed client list has been cleared");
        Ok(())
    }

    /// Delete a resource with its counters
    pub async fn delete_resource(&self, id: i64) -> Result<(), KeygateError> {
        {
            let _guard = self.locks.acquire(id).await;
            if !self.db.delete_resource(id).await? {
                return Err(KeygateError::ResourceNotFound(id));
            }
        }
        self.locks.forget(id);
        info!(resource_id = id, "Deleted resource");
        Ok(())
    }

    pub async fn get_resource(&self, id: i64) -> Result<DownloadResource, KeygateError> {
        self.db
            .load_resource(id)
            .await?
            .ok_or(KeygateError::ResourceNotFound(id))
    }

    pub async fn list_resources(&self) -> Result<Vec<DownloadResource>, KeygateError> {
        self.db.load_all_resources().await
    }

    pub async fn resource_status(&self, id: i64) -> Result<ResourceStatus, KeygateError> {
        let resource = self.get_resource(id).await?;
        let unique_clients = self.db.count_consumed_clients(id).await?;
        Ok(resource.status(unique_clients))
    }

    pub async fn list_consumed_clients(&self, id: i64) -> Result<Vec<ConsumedClient>, KeygateError> {
        self.get_resource(id).await?;
        self.db.list_consumed_clients(id).await
    }

    /// Public download URL, based on `public_base_url` or the bind address
    pub async fn download_url(&self, resource: &DownloadResource) -> String {
        let settings = self.settings.read().await;
        let base = settings
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", settings.bind_address, settings.port));
        download_url(&base, &resource.secret_key)
    }

    async fn save_resource(&self, mut resource: DownloadResource) -> Result<DownloadResource, KeygateError> {
        resource.updated_at = Utc::now();
        self.db.update_resource(&resource).await?;
        // Reload so the returned counter is current
        self.get_resource(resource.id).await
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Get current settings
    pub async fn get_settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Update settings; lookup mode and client tracking apply to the next request
    pub async fn update_settings(&self, settings: Settings) -> Result<(), KeygateError> {
        self.db.save_settings(&settings).await?;
        self.apply_settings(settings).await;
        Ok(())
    }

    /// Re-read settings from the database
    ///
    /// Picks up changes saved by another process (the admin CLI) and
    /// rebuilds the authorizer when anything differs from the cached copy.
    pub async fn reload_settings(&self) -> Result<Settings, KeygateError> {
        let stored = self.db.load_settings().await?;
        if *self.settings.read().await != stored {
            info!("Settings changed in the database, reloading");
            self.apply_settings(stored.clone()).await;
        }
        Ok(stored)
    }

    async fn apply_settings(&self, settings: Settings) {
        *self.authorizer.write().await = build_authorizer(&self.db, &settings, &self.locks);
        *self.settings.write().await = settings;
    }
}

fn build_authorizer(db: &KeygateDatabase, settings: &Settings, locks: &ResourceLocks) -> Authorizer {
    let lookup: Arc<dyn ResourceLookup> = match settings.mode {
        LookupMode::Multi => Arc::new(StoreLookup::new(db.clone())),
        LookupMode::Single => Arc::new(SingleResourceLookup::new(
            db.clone(),
            settings.global_resource_id,
        )),
    };
    Authorizer::new(lookup, Arc::new(db.clone()), locks.clone())
        .with_client_tracking(settings.track_clients)
}

/// Trimmed title; blank titles fall back to "Download"
fn normalize_title(title: &str) -> String {
    match title.trim() {
        "" => "Download".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn validate_limit(limit: u32) -> Result<(), KeygateError> {
    if limit == 0 {
        return Err(KeygateError::InvalidInput(
            "download limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

async fn validate_file_path(path: &Path) -> Result<(), KeygateError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(KeygateError::FileMissing(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn blank_titles_fall_back() {
        assert_eq!(normalize_title("   "), "Download");
        assert_eq!(normalize_title(""), "Download");
        assert_eq!(normalize_title("  Annual Report "), "Annual Report");
    }

    #[tokio::test]
    async fn reset_of_unknown_resource_leaves_no_lock() {
        let dir = TempDir::new().unwrap();
        let core = KeygateCore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(matches!(
            core.reset_counter(999).await,
            Err(KeygateError::ResourceNotFound(999))
        ));
        assert!(matches!(
            core.reset_consumed_clients(999).await,
            Err(KeygateError::ResourceNotFound(999))
        ));
        assert!(core.locks.is_empty());
    }

    #[tokio::test]
    async fn update_applies_title_rule() {
        let dir = TempDir::new().unwrap();
        let core = KeygateCore::new(dir.path().to_path_buf()).await.unwrap();
        let created = core
            .create_resource(ResourceOptions {
                title: Some("  ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.title, "Download");

        let renamed = core
            .update_resource(
                created.id,
                ResourceOptions {
                    title: Some(" Handbook ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.title, "Handbook");

        let blanked = core
            .update_resource(
                created.id,
                ResourceOptions {
                    title: Some("\t".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(blanked.title, "Download");
    }
}
