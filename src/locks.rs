use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per task id. Everything that rewrites a task's build
/// directory or deletes the task holds the task's guard until the task record
/// has been persisted.
#[derive(Default)]
pub struct TaskLocks {
    held: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, task_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut held = self.held.lock().await;
            // drop entries nobody is waiting on
            held.retain(|id, l| *id == task_id || Arc::strong_count(l) > 1);
            Arc::clone(held.entry(task_id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_task_is_serialized() {
        let locks = Arc::new(TaskLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let (locks, inside, max_seen) = (locks.clone(), inside.clone(), max_seen.clone());
            handles.push(tokio::spawn(async move {
                let _g = locks.acquire(id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_tasks_do_not_block_each_other() {
        let locks = TaskLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }
}
