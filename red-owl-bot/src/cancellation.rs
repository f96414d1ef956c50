use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::watch;

/// Tracks long-running tasks by key so they can be cancelled from a command.
pub struct CancellationRegistry<K> {
    running: HashMap<K, watch::Sender<bool>>,
}

impl<K: Hash + Eq> CancellationRegistry<K> {
    pub fn new() -> Self {
        Self {
            running: HashMap::new(),
        }
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.running.contains_key(key)
    }

    /// Register a task and hand back the receiver it should watch.
    pub fn register(&mut self, key: K) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.running.insert(key, tx);
        rx
    }

    /// Signal cancellation. Returns whether a task was running.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.running.remove(key) {
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    pub fn deregister(&mut self, key: &K) {
        self.running.remove(key);
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    if *cancel_rx.borrow() {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = cancel_rx.changed() => match changed {
            Ok(()) => !*cancel_rx.borrow(),
            // Sender dropped: the task was deregistered, treat like a cancel
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_only_reports_running_tasks() {
        let mut registry = CancellationRegistry::new();
        let rx = registry.register(1u64);

        assert!(registry.is_running(&1));
        assert!(registry.cancel(&1));
        assert!(*rx.borrow());
        assert!(!registry.is_running(&1));
        assert!(!registry.cancel(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_runs_to_completion_without_cancel() {
        let mut registry = CancellationRegistry::new();
        let mut rx = registry.register("guild");

        assert!(sleep_or_cancel(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_early_on_cancel() {
        let mut registry = CancellationRegistry::new();
        let mut rx = registry.register("guild");
        registry.cancel(&"guild");

        assert!(!sleep_or_cancel(Duration::from_secs(3600), &mut rx).await);
    }
}
