//! Timers with cancel-on-drop handles, and the one blocking escape hatch.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A scheduled callback. Dropping the handle cancels it.
#[derive(Debug)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Cancel the callback if it has not run yet.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Let the callback run even after this handle is dropped.
    pub fn detach(mut self) {
        self.task.take();
    }

    /// True once the callback ran or the timer was cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `f` at `deadline` on the current runtime.
pub fn schedule_at<F>(deadline: Instant, f: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        f();
    });
    TimerHandle { task: Some(task) }
}

/// Run `f` after `delay` on the current runtime.
pub fn schedule_after<F>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    schedule_at(Instant::now() + delay, f)
}

/// Waits for a single future from synchronous code.
///
/// Reserved for call sites that cannot become async, such as asking whether
/// anything is still running right before a window closes.
///
/// Not reentrant: the waited future must not itself call [`SyncWait::wait`].
/// When called from inside the runtime the runtime must be multi-threaded;
/// on a current-thread runtime this panics.
#[derive(Debug, Clone)]
pub struct SyncWait {
    handle: Handle,
}

impl SyncWait {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Capture the runtime the caller is running on.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn wait<F: Future>(&self, future: F) -> F::Output {
        if Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| self.handle.block_on(future))
        } else {
            self.handle.block_on(future)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = schedule_after(Duration::from_secs(5), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = schedule_after(Duration::from_secs(1), move || {
            flag.store(true, Ordering::SeqCst);
        });
        drop(timer);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_timer_still_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        schedule_after(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .detach();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_wait_inside_runtime() {
        let wait = SyncWait::current();
        let value = wait.wait(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_sync_wait_outside_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let wait = SyncWait::new(runtime.handle().clone());
        assert_eq!(wait.wait(async { 7 }), 7);
    }
}
