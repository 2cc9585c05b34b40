//! Resolving a URL key to a resource
//!
//! The multi-resource deployment addresses every active resource by its own
//! key. The single-resource deployment is the same thing restricted to one
//! configured resource.

use crate::engine::persistence::KeygateDatabase;
use crate::error::KeygateError;
use async_trait::async_trait;
use keygate_types::DownloadResource;
use tracing::warn;

#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// The active resource whose secret key equals `key`, if any
    async fn find_by_key(&self, key: &str) -> Result<Option<DownloadResource>, KeygateError>;
}

/// Looks a key up among all active resources
#[derive(Clone, Debug)]
pub struct StoreLookup {
    db: KeygateDatabase,
}

impl StoreLookup {
    pub fn new(db: KeygateDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResourceLookup for StoreLookup {
    async fn find_by_key(&self, key: &str) -> Result<Option<DownloadResource>, KeygateError> {
        if key.is_empty() {
            return Ok(None);
        }

        let mut matches = self.db.find_active_by_key(key).await?;
        if matches.len() > 1 {
            warn!(
                ids = ?matches.iter().map(|r| r.id).collect::<Vec<_>>(),
                "Several active resources share one secret key, serving the lowest id"
            );
        }

        // Ordered by id, so the first match is the lowest
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }
}

/// Only ever resolves to one configured resource
#[derive(Clone, Debug)]
pub struct SingleResourceLookup {
    db: KeygateDatabase,
    resource_id: i64,
}

impl SingleResourceLookup {
    pub fn new(db: KeygateDatabase, resource_id: i64) -> Self {
        Self { db, resource_id }
    }
}

#[async_trait]
impl ResourceLookup for SingleResourceLookup {
    async fn find_by_key(&self, key: &str) -> Result<Option<DownloadResource>, KeygateError> {
        if key.is_empty() {
            return Ok(None);
        }

        Ok(self
            .db
            .load_resource(self.resource_id)
            .await?
            .filter(|r| r.active && r.secret_key == key))
    }
}
