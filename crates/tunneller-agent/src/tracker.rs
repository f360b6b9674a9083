//! Shared resource tracker
//!
//! Every per-request task is registered here at spawn so `close_all()` can
//! tear the whole agent down at once: aborting a task drops the sockets it
//! owns, which closes them and unblocks its copier peers. Tasks unregister
//! themselves on normal exit, so the registry only holds live work.
//!
//! A registration racing `close_all()` can be missed; the owning task still
//! closes its own resources on exit, so nothing leaks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Registry of cancellable background tasks
#[derive(Debug, Default)]
pub struct ResourceTracker {
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` as a tracked task. The task unregisters itself when it
    /// finishes; `close_all()` aborts it if it is still running.
    pub fn spawn_tracked(self: &Arc<Self>, fut: impl Future<Output = ()> + Send + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracker = Arc::clone(self);

        // Holding the lock across the spawn sequences the insert before the
        // task's own unregister can run
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            fut.await;
            tracker.unregister(id);
        });
        tasks.insert(id, handle);
        id
    }

    /// Drop a finished task's registration
    pub fn unregister(&self, id: u64) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.remove(&id);
    }

    /// Abort every tracked task and clear the registry
    pub fn close_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let count = tasks.len();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        debug!("resource tracker closed {count} tasks");
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_unregisters_itself_on_completion() {
        let tracker = Arc::new(ResourceTracker::new());
        tracker.spawn_tracked(async {});

        // Give the task a moment to run to completion
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_aborts_and_clears() {
        let tracker = Arc::new(ResourceTracker::new());
        for _ in 0..5 {
            tracker.spawn_tracked(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
        assert_eq!(tracker.len(), 5);

        tracker.close_all();
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_aborted_task_releases_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let tracker = Arc::new(ResourceTracker::new());
        tracker.spawn_tracked(async move {
            let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            // Park forever holding the socket
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(stream);
        });

        let (mut accepted, _) = listener.accept().await.unwrap();
        tracker.close_all();

        // Peer close surfaces as EOF
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::io::AsyncReadExt::read(&mut accepted, &mut buf),
        )
        .await
        .expect("read should unblock after abort")
        .unwrap();
        assert_eq!(n, 0);
    }
}
