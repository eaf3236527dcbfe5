//! A group of background tasks that stop together.
//!
//! Tasks are spawned on the tokio runtime and handed a [`StopSignal`]. Once
//! [`TaskGroup::stop`] has been called the group refuses new tasks, every
//! signal fires, and [`TaskGroup::wait`] resolves after the last task exits.
//! Any number of callers may wait at once; all of them block until the group
//! is both stopped and empty.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Receiving side of a group's stop broadcast.
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the group has been told to stop.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration`; returns `false` if stopped first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stopped() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

struct Inner {
    token: CancellationToken,
    tracker: TaskTracker,
    // Held while spawning and while closing, so no task slips in after stop.
    spawn_lock: Mutex<()>,
}

/// Registry of cancellable background tasks.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<Inner>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("stopped", &self.is_stopped())
            .field("running", &self.len())
            .finish()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                spawn_lock: Mutex::new(()),
            }),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            token: self.inner.token.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Number of tasks that have not exited yet.
    pub fn len(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tracker.is_empty()
    }

    /// Spawn a task built from this group's stop signal.
    ///
    /// # Errors
    ///
    /// Returns `TaskGroupStopped` once [`stop`](Self::stop) has been called.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F) -> Result<()>
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _guard = self.inner.spawn_lock.lock();
        if self.inner.tracker.is_closed() {
            return Err(Error::TaskGroupStopped);
        }
        let name = name.into();
        debug!(task = %name, "spawning task");
        let fut = task(self.stop_signal());
        self.inner.tracker.spawn(async move {
            fut.await;
            debug!(task = %name, "task exited");
        });
        Ok(())
    }

    /// Signal every task to stop. Calling it again does nothing.
    pub fn stop(&self) {
        let _guard = self.inner.spawn_lock.lock();
        self.inner.tracker.close();
        self.inner.token.cancel();
    }

    /// Wait until the group has been stopped and every task has exited.
    pub async fn wait(&self) {
        self.inner.tracker.wait().await;
    }

    pub async fn stop_and_wait(&self) {
        self.stop();
        self.wait().await;
    }
}

/// Run `body` every `period` until `stop` fires. The first run happens after
/// one full period.
pub async fn run_periodic<F, Fut>(stop: StopSignal, period: Duration, mut body: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while stop.sleep(period).await {
        body().await;
    }
}
