use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct LiveHandle {
    tool: String,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryInner {
    live: Mutex<HashMap<u64, LiveHandle>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Set of child processes that are currently running, so an interrupt can
/// terminate all of them.
#[derive(Clone, Debug, Default)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

/// Live entry in the registry; removed again when dropped.
#[derive(Debug)]
pub struct Registration {
    id: u64,
    token: CancellationToken,
    registry: ProcessRegistry,
}

impl Registration {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<u64, LiveHandle>> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, tool: &str) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        self.live().insert(
            id,
            LiveHandle {
                tool: tool.to_string(),
                token: token.clone(),
            },
        );
        Registration {
            id,
            token,
            registry: self.clone(),
        }
    }

    fn deregister(&self, id: u64) {
        self.live().remove(&id);
    }

    /// Signals every live child to terminate. Processes registered afterwards
    /// start out cancelled.
    pub fn terminate_all(&self) -> usize {
        let live = self.live();
        for handle in live.values() {
            tracing::debug!(tool = %handle.tool, "terminating child process");
            handle.token.cancel();
        }
        self.inner.shutdown.cancel();
        live.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.live().values().map(|h| h.tool.clone()).collect();
        tools.sort();
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_removed_on_drop() {
        let registry = ProcessRegistry::new();
        let a = registry.register("ffuf");
        let b = registry.register("gobuster");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.running_tools(), vec!["ffuf", "gobuster"]);
        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn terminate_all_cancels_live_and_future_handles() {
        let registry = ProcessRegistry::new();
        let live = registry.register("katana");
        assert_eq!(registry.terminate_all(), 1);
        assert!(live.token().is_cancelled());
        let late = registry.register("hakrawler");
        assert!(late.token().is_cancelled());
        assert!(registry.is_shutting_down());
    }
}
