//! Authorization Engine - the heart of Keygate
//!
//! This module implements the gated download flow:
//! - Key lookup (single or multi resource)
//! - Durable counters and consumed-client sets (SQLite)
//! - Per-resource locking with compare-and-increment at the store
//! - Ordered ALLOW/DENY decisions

mod authorizer;
mod counter_store;
mod locks;
mod lookup;
mod persistence;

pub use authorizer::*;
pub use counter_store::*;
pub use locks::*;
pub use lookup::*;
pub use persistence::*;
