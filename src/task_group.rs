//! Fan-out/fan-in over tokio tasks.
//!
//! Units return nothing; they write to shared accumulators or channels and
//! report their own failures. Groups nest freely, which gives the
//! organization → page → entity tree used by the collectors.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::error;

#[derive(Default)]
pub struct TaskGroup {
    tasks: JoinSet<()>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule one unit of work. It starts running immediately.
    pub fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(unit);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every unit spawned since creation or the previous call. A unit
    /// that panicked is logged and does not disturb its siblings.
    pub async fn wait_all(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Collection task panicked: {e}");
                } else {
                    error!("Collection task did not complete: {e}");
                }
            }
        }
    }
}
