use async_trait::async_trait;
use log::warn;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{VmError, VmResult};

/// A named mutual exclusion lock, possibly shared between processes.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Name of the lock.
    fn name(&self) -> &str;

    /// Blocks until the lock is held or `ctx` is cancelled.
    async fn lock(&self, ctx: &CancellationToken) -> VmResult<()>;

    /// Releases the lock. Returns `false` if it was not held.
    async fn unlock(&self) -> VmResult<bool>;
}

/// A held [`DistributedLock`]. Call [`LockGuard::release`] once done; a
/// guard dropped while still holding the lock, after a panic or when its
/// future was abandoned, unlocks it on a background task.
pub struct LockGuard {
    lock: Option<Arc<dyn DistributedLock>>,
}

impl LockGuard {
    /// Blocks until `lock` is held or `ctx` is cancelled.
    pub async fn acquire(lock: &Arc<dyn DistributedLock>, ctx: &CancellationToken) -> VmResult<Self> {
        lock.lock(ctx).await?;
        Ok(Self {
            lock: Some(Arc::clone(lock)),
        })
    }

    /// Releases the lock.
    pub async fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            unlock_logged(lock.as_ref()).await;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { unlock_logged(lock.as_ref()).await });
            }
            Err(_) => warn!("{} dropped outside of a runtime, left held", lock.name()),
        }
    }
}

async fn unlock_logged(lock: &dyn DistributedLock) {
    match lock.unlock().await {
        Ok(true) => {}
        Ok(false) => warn!("{} was not held on release", lock.name()),
        Err(err) => warn!("failed to release {}: {err}", lock.name()),
    }
}

/// In-process lock with cancellable acquisition.
pub struct LocalLock {
    name: String,
    permits: Semaphore,
    held: AtomicBool,
}

impl LocalLock {
    /// Creates an unlocked lock.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permits: Semaphore::new(1),
            held: AtomicBool::new(false),
        }
    }

    fn error(&self, reason: impl Into<String>) -> VmError {
        VmError::Lock {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lock(&self, ctx: &CancellationToken) -> VmResult<()> {
        // A free lock is taken even under a cancelled token.
        let permit = tokio::select! {
            biased;
            permit = self.permits.acquire() => permit.map_err(|err| self.error(err.to_string()))?,
            _ = ctx.cancelled() => return Err(self.error("cancelled while acquiring")),
        };

        permit.forget();
        self.held.store(true, Ordering::Release);
        Ok(())
    }

    async fn unlock(&self) -> VmResult<bool> {
        if self.held.swap(false, Ordering::AcqRel) {
            self.permits.add_permits(1);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
