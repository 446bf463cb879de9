use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes work per (repository, branch): a repository sync and a build + start never
/// overlap with another one for the same branch.
#[derive(Clone, Default)]
pub struct DeploymentLocks {
    locks: Arc<Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, repository_id: &str, branch: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry((repository_id.to_string(), branch.to_string()))
                .or_default()
                .clone()
        };
        tracing::debug!(repository_id, branch, "Waiting for deployment lock");
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_branch_is_serialized() {
        let locks = DeploymentLocks::new();
        let guard = locks.acquire("acme/shop", "main").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.acquire("acme/shop", "main").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_branch_is_independent() {
        let locks = DeploymentLocks::new();
        let _main = locks.acquire("acme/shop", "main").await;
        let _dev = tokio::time::timeout(Duration::from_millis(100), locks.acquire("acme/shop", "dev"))
            .await
            .expect("dev branch must not wait on main");
    }
}
