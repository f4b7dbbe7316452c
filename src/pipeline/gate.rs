//! Thread ordering coordinator.
//!
//! Per-run registry of in-flight message tasks. A reply's task awaits
//! its parent's handle before touching the store, so a parent's event
//! invalidation/creation always lands first. Registration is synchronous
//! and happens in the sequential task-construction phase; resolution is
//! guaranteed on every exit path by a drop guard.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

/// Registry of one-shot completion handles, keyed by message identity.
/// Lives for a single pipeline run and is discarded afterwards.
#[derive(Default)]
pub struct ThreadGate {
    tasks: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

/// Resolves its task's handle when dropped.
///
/// Dropping the inner sender wakes all waiters even if no explicit
/// signal was sent, so a panicking task can never strand its children.
pub struct TaskGuard {
    tx: Option<watch::Sender<bool>>,
}

impl TaskGuard {
    /// Resolve the handle explicitly. Equivalent to dropping the guard.
    pub fn resolve(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(true);
        }
    }
}

impl ThreadGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task handle for `message_id`.
    ///
    /// Must be called before the task is spawned, so a concurrently
    /// constructed child is guaranteed to find the handle. If the id is
    /// already registered (duplicate identity within one run), the first
    /// handle wins and the returned guard resolves nothing.
    pub fn register(&self, message_id: &str) -> TaskGuard {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(message_id) {
            return TaskGuard { tx: None };
        }
        let (tx, rx) = watch::channel(false);
        tasks.insert(message_id.to_string(), rx);
        TaskGuard { tx: Some(tx) }
    }

    /// Suspend until the task registered under `message_id` reaches a
    /// terminal state. Returns immediately when no handle is registered
    /// (the message is not part of this run).
    pub async fn wait_for(&self, message_id: &str) {
        let rx = {
            let tasks = self.tasks.lock().unwrap();
            tasks.get(message_id).cloned()
        };
        if let Some(mut rx) = rx {
            // An Err means the sender was dropped, which also counts as
            // terminal.
            let _ = rx.wait_for(|resolved| *resolved).await;
        }
    }

    /// Whether a handle is registered for `message_id`.
    ///
    /// The driver consults this during the sequential construction
    /// phase: a task only waits on a parent registered before itself,
    /// which breaks self-references and in-run reply cycles.
    pub fn is_registered(&self, message_id: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_unregistered_returns_immediately() {
        let gate = ThreadGate::new();
        // Must not hang.
        gate.wait_for("<nobody@campus.edu>").await;
    }

    #[tokio::test]
    async fn waiter_blocks_until_guard_resolves() {
        let gate = Arc::new(ThreadGate::new());
        let guard = gate.register("<parent@campus.edu>");
        assert!(gate.is_registered("<parent@campus.edu>"));

        let parent_done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let gate = Arc::clone(&gate);
            let parent_done = Arc::clone(&parent_done);
            tokio::spawn(async move {
                gate.wait_for("<parent@campus.edu>").await;
                assert!(parent_done.load(Ordering::SeqCst));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        parent_done.store(true, Ordering::SeqCst);
        guard.resolve();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_guard_wakes_waiters() {
        let gate = Arc::new(ThreadGate::new());
        let guard = gate.register("<parent@campus.edu>");

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_for("<parent@campus.edu>").await })
        };

        // Simulate a task that exits by error without signalling.
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on guard drop")
            .unwrap();
    }

    #[tokio::test]
    async fn multiple_waiters_all_wake() {
        let gate = Arc::new(ThreadGate::new());
        let guard = gate.register("<parent@campus.edu>");

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.wait_for("<parent@campus.edu>").await })
            })
            .collect();

        guard.resolve();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("all waiters should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_first_handle() {
        let gate = Arc::new(ThreadGate::new());
        let first = gate.register("<dup@campus.edu>");
        let second = gate.register("<dup@campus.edu>");

        // Resolving the duplicate guard must not wake waiters.
        second.resolve();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_for("<dup@campus.edu>").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.resolve();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn wait_after_resolve_returns_immediately() {
        let gate = ThreadGate::new();
        let guard = gate.register("<parent@campus.edu>");
        guard.resolve();
        gate.wait_for("<parent@campus.edu>").await;
    }
}
