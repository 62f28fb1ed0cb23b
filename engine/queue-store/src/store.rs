//! The queue store trait

use crate::error::Result;
use async_trait::async_trait;

/// Atomic list and TTL primitives the ingestion buffers are built on.
///
/// List semantics follow Redis: `push_front` inserts at index 0, so the
/// oldest entry sits at the tail. Negative indices in `range`/`trim` count
/// from the tail (-1 is the last element). `rename_if_absent` is the
/// cross-process hand-off primitive: it atomically moves a list to a new key
/// only when the target does not exist, and reports whether the move happened.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Push a single value onto the head of a list.
    async fn push_front(&self, key: &str, value: &str) -> Result<()>;

    /// Push several values onto the head of a list in one pipelined round trip.
    /// Returns the number of values pushed.
    async fn push_front_many(&self, key: &str, values: &[String]) -> Result<usize>;

    /// Pop the value at the tail of a list (the oldest entry).
    async fn pop_back(&self, key: &str) -> Result<Option<String>>;

    /// Return the elements between `start` and `stop` inclusive, in list order.
    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Retain only the elements between `start` and `stop` inclusive.
    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Length of a list; zero for a missing key.
    async fn len(&self, key: &str) -> Result<usize>;

    /// Whether a key exists (list or plain value).
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a key. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically rename `src` to `dst` if `dst` does not exist.
    /// Returns `true` when the rename happened, `false` when `dst` was taken.
    /// A missing `src` is not an error and returns `false`.
    async fn rename_if_absent(&self, src: &str, dst: &str) -> Result<bool>;

    /// Set a plain value with a time-to-live in seconds.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Liveness check against the store.
    async fn ping(&self) -> Result<()>;
}
