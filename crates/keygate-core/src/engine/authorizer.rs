//! Download authorization
//!
//! Checks run in a fixed order: key, limit, consumed client, file. The
//! first failing check decides the denial. On success the consumption is
//! recorded before the caller gets to stream anything.

use crate::engine::counter_store::{ConsumeOutcome, CounterStore};
use crate::engine::locks::ResourceLocks;
use crate::engine::lookup::ResourceLookup;
use crate::error::KeygateError;
use keygate_types::{Decision, Denial, DenyReason, DownloadResource, Grant};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Decides whether a key/client pair may download, and records the download
#[derive(Clone)]
pub struct Authorizer {
    lookup: Arc<dyn ResourceLookup>,
    store: Arc<dyn CounterStore>,
    locks: ResourceLocks,
    track_clients: bool,
}

impl Authorizer {
    pub fn new(
        lookup: Arc<dyn ResourceLookup>,
        store: Arc<dyn CounterStore>,
        locks: ResourceLocks,
    ) -> Self {
        Self {
            lookup,
            store,
            locks,
            track_clients: true,
        }
    }

    /// Enable or disable the one-download-per-client rule
    pub fn with_client_tracking(mut self, enabled: bool) -> Self {
        self.track_clients = enabled;
        self
    }

    /// Resolve a key without authorizing anything
    pub async fn resolve(&self, key: &str) -> Result<Option<DownloadResource>, KeygateError> {
        self.lookup.find_by_key(key).await
    }

    /// Authorize a download of the resource behind `key` for `client_id`
    pub async fn authorize(&self, key: &str, client_id: &str) -> Result<Decision, KeygateError> {
        let Some(resource) = self.lookup.find_by_key(key).await? else {
            return Ok(self.deny(DenyReason::NotFound, client_id, None));
        };

        let _guard = self.locks.acquire(resource.id).await;

        // The lookup snapshot may predate a concurrent consumption
        let count = match self.store.get_count(resource.id).await {
            Ok(count) => count,
            Err(KeygateError::ResourceNotFound(_)) => {
                return Ok(self.deny(DenyReason::NotFound, client_id, None));
            }
            Err(e) => return Err(e),
        };

        if count >= resource.download_limit {
            return Ok(self.deny(DenyReason::LimitReached, client_id, Some(&resource)));
        }

        if self.track_clients && self.store.is_consumed(resource.id, client_id).await? {
            return Ok(self.deny(DenyReason::AlreadyConsumed, client_id, Some(&resource)));
        }

        if !file_available(resource.file_path.as_deref()).await {
            return Ok(self.deny(DenyReason::NoFile, client_id, Some(&resource)));
        }

        let tracked_client = self.track_clients.then_some(client_id);
        match self.store.try_consume(resource.id, tracked_client).await? {
            ConsumeOutcome::Recorded(download_count) => {
                info!(
                    resource_id = resource.id,
                    client = client_id,
                    "Download \"{}\" (#{}/{}) granted",
                    resource.title,
                    download_count,
                    resource.download_limit
                );
                let mut resource = resource;
                resource.download_count = download_count;
                Ok(Decision::Allow(Grant {
                    resource,
                    client_id: client_id.to_string(),
                    download_count,
                }))
            }
            ConsumeOutcome::LimitReached => {
                Ok(self.deny(DenyReason::LimitReached, client_id, Some(&resource)))
            }
            ConsumeOutcome::AlreadyConsumed => {
                Ok(self.deny(DenyReason::AlreadyConsumed, client_id, Some(&resource)))
            }
        }
    }

    fn deny(
        &self,
        reason: DenyReason,
        client_id: &str,
        resource: Option<&DownloadResource>,
    ) -> Decision {
        debug!(
            reason = %reason,
            client = client_id,
            resource_id = resource.map(|r| r.id),
            "Download denied"
        );
        Decision::Deny(Denial {
            reason,
            client_id: client_id.to_string(),
            resource_title: resource.map(|r| r.title.clone()),
            download_limit: resource.map(|r| r.download_limit),
        })
    }
}

async fn file_available(path: Option<&Path>) -> bool {
    match path {
        Some(path) => tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false),
        None => false,
    }
}
