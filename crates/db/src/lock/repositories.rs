use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use fieldsync_common::error::SyncerResult;

/// Handle to a held cluster lock; pass it back to `release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    pub holder: Uuid,
}

/// TTL-based mutual exclusion across engine processes, backed by shared
/// storage. A lock whose TTL has lapsed is free for the taking; `release`
/// only removes the row when the holder still matches.
#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Try to take the lock. `None` means another holder still has it.
    async fn obtain(&self, key: &str, ttl: Duration) -> SyncerResult<Option<LockGuard>>;

    async fn release(&self, guard: LockGuard) -> SyncerResult<()>;
}
