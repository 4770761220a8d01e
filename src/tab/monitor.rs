//! Adaptive foreground-process polling.
//!
//! Each tab has one poller. It polls at a *ready time* instead of a fixed
//! interval: the delay starts at [`DELAY_MIN`], doubles after every poll
//! that fails or sees nothing new (up to [`DELAY_MAX`]) and drops back to
//! the minimum as soon as a poll reports a change. Delays of a second or
//! more are rounded to whole seconds from a shared epoch so that many tabs
//! wake up together.
//!
//! Keys that usually start or end a foreground program (Enter, Ctrl+D)
//! pull the next poll in to [`DELAY_INTERACTIVE`].

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;

pub const DELAY_INTERACTIVE: Duration = Duration::from_millis(100);
pub const DELAY_MIN: Duration = Duration::from_millis(500);
pub const DELAY_MAX: Duration = Duration::from_secs(10);

const ALIGN_THRESHOLD: Duration = Duration::from_secs(1);

/// Something that can be asked for its foreground process.
pub trait ForegroundSource: Send + Sync + 'static {
    /// Refresh the foreground state. `Ok(true)` when anything changed.
    fn poll_foreground(&self) -> impl Future<Output = Result<bool>> + Send;
}

/// A key as far as the poller cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    KpEnter,
    IsoEnter,
    Char(char),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub ctrl: bool,
}

impl KeyPress {
    pub fn new(key: Key) -> Self {
        Self { key, ctrl: false }
    }

    pub fn with_ctrl(key: Key) -> Self {
        Self { key, ctrl: true }
    }

    /// Keys that often mean the foreground program is about to change.
    pub fn hints_transition(&self) -> bool {
        match self.key {
            Key::Enter | Key::KpEnter | Key::IsoEnter => true,
            Key::Char(c) => self.ctrl && c.eq_ignore_ascii_case(&'d'),
            Key::Other => false,
        }
    }
}

/// Current polling delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { delay: DELAY_MIN }
    }
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn reset(&mut self) {
        self.delay = DELAY_MIN;
    }

    pub fn back_off(&mut self) {
        self.delay = (self.delay * 2).clamp(DELAY_MIN, DELAY_MAX);
    }

    pub fn interactive(&mut self) {
        self.delay = DELAY_INTERACTIVE;
    }

    /// When the next poll is due if the delay starts counting at `now`.
    pub fn ready_at(&self, now: Instant, epoch: Instant) -> Instant {
        if self.delay < ALIGN_THRESHOLD {
            return now + self.delay;
        }
        let since = now.saturating_duration_since(epoch);
        epoch + Duration::from_secs(since.as_secs()) + self.delay
    }
}

struct PollState {
    backoff: Backoff,
    ready: Instant,
}

struct Shared {
    epoch: Instant,
    state: Mutex<PollState>,
    rearm: Notify,
}

impl Shared {
    fn rearm_with(&self, f: impl FnOnce(&mut Backoff)) {
        {
            let mut state = self.state.lock();
            f(&mut state.backoff);
            state.ready = state.backoff.ready_at(Instant::now(), self.epoch);
        }
        self.rearm.notify_one();
    }
}

/// Polling loop for one tab. Dropping it stops the loop.
pub struct ForegroundPoller {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl ForegroundPoller {
    /// Start polling `source` until it is dropped.
    pub fn start<S: ForegroundSource>(source: Weak<S>, epoch: Instant) -> Self {
        let backoff = Backoff::default();
        let shared = Arc::new(Shared {
            epoch,
            state: Mutex::new(PollState {
                backoff,
                ready: backoff.ready_at(Instant::now(), epoch),
            }),
            rearm: Notify::new(),
        });
        let task = tokio::spawn(run(source, Arc::clone(&shared)));
        Self { shared, task }
    }

    pub fn delay(&self) -> Duration {
        self.shared.state.lock().backoff.delay()
    }

    /// Terminal output arrived: poll soon if we had backed off.
    pub fn contents_changed(&self) {
        if self.delay() > DELAY_MIN {
            self.shared.rearm_with(Backoff::reset);
        }
    }

    pub fn key_pressed(&self, key: KeyPress) {
        if key.hints_transition() {
            self.shared.rearm_with(Backoff::interactive);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ForegroundPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<S: ForegroundSource>(source: Weak<S>, shared: Arc<Shared>) {
    loop {
        let ready = shared.state.lock().ready;
        tokio::select! {
            _ = tokio::time::sleep_until(ready) => {}
            _ = shared.rearm.notified() => continue,
        }

        let Some(target) = source.upgrade() else {
            log::debug!("Foreground poller stopping, tab is gone");
            return;
        };
        let outcome = target.poll_foreground().await;
        drop(target);

        let mut state = shared.state.lock();
        match outcome {
            Ok(true) => state.backoff.reset(),
            Ok(false) => state.backoff.back_off(),
            Err(e) => {
                log::trace!("Foreground poll failed: {e}");
                state.backoff.back_off();
            }
        }
        state.ready = state.backoff.ready_at(Instant::now(), shared.epoch);
    }
}
