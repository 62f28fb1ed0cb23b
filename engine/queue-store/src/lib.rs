//! # Queue Store
//!
//! This crate provides the durable queue store used as the buffering substrate
//! for the Pulse ingestion pipeline. Buffers never hold records in process
//! memory as their source of truth; they push onto named lists in the store
//! and rely on its atomic primitives (list push, rename-if-absent, TTL keys)
//! for cross-process coordination.
//!
//! ## Architecture
//!
//! - **QueueStore**: abstract trait over the atomic list/TTL primitives
//! - **RedisStore**: Redis-backed implementation on a shared connection manager
//! - **MemoryStore**: in-process implementation with identical semantics,
//!   used by tests and the integration driver

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::QueueStore;
