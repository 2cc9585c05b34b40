//! Counter store contract
//!
//! Durable per-resource download counters and consumed-client sets.
//! Every mutating call must be safe under concurrent use from several
//! request handlers (and several processes sharing the same store).

use crate::error::KeygateError;
use async_trait::async_trait;
use std::collections::HashSet;

/// Result of an atomic check-and-record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Consumption recorded; carries the new count
    Recorded(u32),
    /// The count already equals the limit
    LimitReached,
    /// The client was already in the consumed set
    AlreadyConsumed,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get_count(&self, resource_id: i64) -> Result<u32, KeygateError>;

    /// Unconditional atomic increment, returns the new count
    async fn increment_count(&self, resource_id: i64) -> Result<u32, KeygateError>;

    async fn get_consumed_clients(&self, resource_id: i64) -> Result<HashSet<String>, KeygateError>;

    /// Idempotent: adding a present client is a no-op
    async fn add_consumed_client(&self, resource_id: i64, client_id: &str) -> Result<(), KeygateError>;

    async fn reset_count(&self, resource_id: i64) -> Result<(), KeygateError>;

    async fn clear_consumed_clients(&self, resource_id: i64) -> Result<(), KeygateError>;

    /// Increment the count only while it is below the limit and, when a
    /// client is given, add it to the consumed set, as one transaction.
    async fn try_consume(
        &self,
        resource_id: i64,
        client_id: Option<&str>,
    ) -> Result<ConsumeOutcome, KeygateError>;

    async fn is_consumed(&self, resource_id: i64, client_id: &str) -> Result<bool, KeygateError> {
        Ok(self.get_consumed_clients(resource_id).await?.contains(client_id))
    }
}
