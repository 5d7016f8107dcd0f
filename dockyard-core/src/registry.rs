//! Process-wide index of in-flight deployments.
//!
//! The registry enforces at-most-one-active task per Deployment Key by
//! cancelling predecessors. It is not sharded: contention is negligible
//! at expected event rates, and the mutations happen only on the event
//! loop, so a single `tokio::sync::Mutex` is enough.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::pipeline::DeploymentKey;

struct Entry {
    cancel_requested: CancellationToken,
    finished: CancellationToken,
}

/// Handle a claimant uses for the lifetime of its deployment task.
///
/// `cancel_requested` is watched by the task's own work (threaded into
/// the Subprocess Runner and the Publication Transaction); `finished`
/// must be signalled by the caller exactly once, on every exit path,
/// so a successor claiming the same key can observe completion without
/// polling.
#[derive(Debug, Clone)]
pub struct DeploymentHandle {
    pub cancel_requested: CancellationToken,
    finished: CancellationToken,
}

impl DeploymentHandle {
    /// Marks this task as done. Idempotent; call on every exit path
    /// (success, failure, or cancellation).
    pub fn mark_finished(&self) {
        self.finished.cancel();
    }
}

/// Deployment Key → current Deployment Task mapping.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<DeploymentKey, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { entries: Mutex::new(HashMap::new()) }
    }

    /// Installs the caller as the active task for `key`, then cancels and
    /// awaits the predecessor if one exists.
    ///
    /// The install happens *before* the predecessor is awaited: that
    /// ordering is what guarantees a three-way race A -> B -> C for the
    /// same key ends with C active and A, B both cancelled, with no
    /// window where B and C both wait on A.
    pub async fn claim(&self, key: DeploymentKey) -> DeploymentHandle {
        let predecessor = {
            let mut entries = self.entries.lock().await;
            let entry = Entry {
                cancel_requested: CancellationToken::new(),
                finished: CancellationToken::new(),
            };
            let handle_cancel = entry.cancel_requested.clone();
            let handle_finished = entry.finished.clone();
            let predecessor = entries.insert(key, entry);
            (
                DeploymentHandle { cancel_requested: handle_cancel, finished: handle_finished },
                predecessor,
            )
        };
        let (handle, predecessor) = predecessor;

        if let Some(predecessor) = predecessor {
            predecessor.cancel_requested.cancel();
            predecessor.finished.cancelled().await;
        }

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DeploymentKey;

    fn key() -> DeploymentKey {
        DeploymentKey::new("https://example.com/pub.git", "dev/master")
    }

    #[tokio::test]
    async fn first_claim_has_no_predecessor_to_wait_on() {
        let registry = Registry::new();
        let handle = registry.claim(key()).await;
        assert!(!handle.cancel_requested.is_cancelled());
        handle.mark_finished();
    }

    #[tokio::test]
    async fn second_claim_cancels_and_awaits_first() {
        let registry = Registry::new();
        let first = registry.claim(key()).await;

        let second_task = tokio::spawn({
            let registry = std::sync::Arc::new(registry);
            let registry = registry.clone();
            async move { registry.claim(key()).await }
        });

        tokio::task::yield_now().await;
        assert!(first.cancel_requested.is_cancelled());
        first.mark_finished();

        let second = second_task.await.unwrap();
        assert!(!second.cancel_requested.is_cancelled());
    }

    #[tokio::test]
    async fn three_way_race_leaves_only_the_last_active() {
        let registry = std::sync::Arc::new(Registry::new());

        let a = registry.claim(key()).await;

        let registry_b = registry.clone();
        let b_task = tokio::spawn(async move { registry_b.claim(key()).await });
        tokio::task::yield_now().await;
        assert!(a.cancel_requested.is_cancelled());

        // C arrives before B has observed A's completion.
        let registry_c = registry.clone();
        let c_task = tokio::spawn(async move { registry_c.claim(key()).await });
        tokio::task::yield_now().await;

        a.mark_finished();
        let b = b_task.await.unwrap();
        // B was installed as active, then immediately displaced by C: it
        // must have been asked to cancel before doing any work.
        assert!(b.cancel_requested.is_cancelled());
        b.mark_finished();

        let c = c_task.await.unwrap();
        assert!(!c.cancel_requested.is_cancelled());
    }
}
