use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use shared::domain::ThreadId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-thread write serialization shared by every session of a process.
///
/// Waiters are admitted in FIFO order, so writes to one thread are applied in submission order.
#[derive(Default)]
pub struct MutationGate {
    locks: Mutex<HashMap<ThreadId, Arc<AsyncMutex<()>>>>,
}

impl MutationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, thread_id: ThreadId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|id, lock| *id == thread_id || Arc::strong_count(lock) > 1);
            locks.entry(thread_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn tracked_threads(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_thread_writers_run_one_at_a_time_in_order() {
        let gate = Arc::new(MutationGate::new());
        let thread_id = ThreadId::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = gate.acquire(thread_id).await;
        let mut handles = Vec::new();
        for n in 0..3 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire(thread_id).await;
                order.lock().expect("order").push(n);
            }));
            // Let each task queue up before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(order.lock().expect("order").is_empty());
        drop(first);

        for handle in handles {
            handle.await.expect("task");
        }
        assert_eq!(*order.lock().expect("order"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn different_threads_do_not_block_each_other() {
        let gate = MutationGate::new();
        let _a = gate.acquire(ThreadId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), gate.acquire(ThreadId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let gate = MutationGate::new();
        for _ in 0..5 {
            let _guard = gate.acquire(ThreadId::new()).await;
        }
        assert_eq!(gate.tracked_threads(), 1);
    }
}
