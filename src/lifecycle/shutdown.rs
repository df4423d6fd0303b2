//! Teardown of the guard.
//!
//! One broadcast stops the listener and every background task (tier reloads,
//! quota window sweeps). After the listener drains, [`Shutdown::finish`]
//! waits for those tasks and disposes the circuit breakers so their final
//! counters are logged.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::resilience::BreakerRegistry;

/// How long a background task gets to exit before it is aborted.
const TASK_GRACE: Duration = Duration::from_secs(5);

/// Shutdown signal plus the background tasks that must stop with it.
///
/// Clones share the same signal and task list.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Arc::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Hand over a task that exits on the shutdown broadcast.
    pub fn track(&self, name: &'static str, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .expect("shutdown task list poisoned")
            .push((name, task));
    }

    /// Signal shutdown, wait for tracked tasks, then dispose `breakers`.
    pub async fn finish(&self, breakers: &BreakerRegistry) {
        self.trigger();

        let tasks = std::mem::take(&mut *self.tasks.lock().expect("shutdown task list poisoned"));
        for (name, mut task) in tasks {
            match time::timeout(TASK_GRACE, &mut task).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Background task failed"),
                Err(_) => {
                    tracing::warn!(task = name, "Background task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        breakers.shutdown();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
