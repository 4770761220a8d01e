//! Recently closed tabs, kept briefly so a close can be undone.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::scheduler::{self, TimerHandle};

/// How long a parked entry survives by default.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(5);

struct Parked<T> {
    serial: u64,
    item: T,
    timer: TimerHandle,
}

struct Lot<T> {
    entries: VecDeque<Parked<T>>,
    next_serial: u64,
}

/// FIFO of items that expire on their own.
///
/// Each entry carries its own timer; popping an entry cancels its timer and
/// an expired entry is simply dropped.
pub struct ParkingLot<T: Send + 'static> {
    lot: Arc<Mutex<Lot<T>>>,
    expiry: Duration,
}

impl<T: Send + 'static> Default for ParkingLot<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl<T: Send + 'static> ParkingLot<T> {
    pub fn new(expiry: Duration) -> Self {
        Self {
            lot: Arc::new(Mutex::new(Lot {
                entries: VecDeque::new(),
                next_serial: 1,
            })),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Park `item` at the tail. Must be called inside a tokio runtime.
    pub fn push(&self, item: T) {
        let mut lot = self.lot.lock();
        let serial = lot.next_serial;
        lot.next_serial += 1;

        let weak: Weak<Mutex<Lot<T>>> = Arc::downgrade(&self.lot);
        let timer = scheduler::schedule_after(self.expiry, move || expire(&weak, serial));
        lot.entries.push_back(Parked {
            serial,
            item,
            timer,
        });
    }

    /// Take the oldest entry, if any.
    pub fn pop(&self) -> Option<T> {
        let parked = self.lot.lock().entries.pop_front()?;
        let Parked { item, mut timer, .. } = parked;
        timer.cancel();
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.lot.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, cancelling the timers first.
    pub fn clear(&self) {
        let drained: Vec<Parked<T>> = self.lot.lock().entries.drain(..).collect();
        for mut parked in drained {
            parked.timer.cancel();
        }
    }
}

impl<T: Send + 'static> Drop for ParkingLot<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn expire<T>(lot: &Weak<Mutex<Lot<T>>>, serial: u64) {
    let Some(lot) = lot.upgrade() else {
        return;
    };
    let removed = {
        let mut lot = lot.lock();
        lot.entries
            .iter()
            .position(|p| p.serial == serial)
            .and_then(|idx| lot.entries.remove(idx))
    };
    if removed.is_some() {
        log::debug!("Parked entry {serial} expired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pop_within_expiry_returns_item() {
        let lot = ParkingLot::new(DEFAULT_EXPIRY);
        lot.push("first");
        lot.push("second");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(lot.pop(), Some("first"));
        assert_eq!(lot.pop(), Some("second"));
        assert_eq!(lot.pop(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_popped_entry_does_not_expire_later() {
        let lot = ParkingLot::new(Duration::from_secs(5));
        lot.push(1);
        assert_eq!(lot.pop(), Some(1));
        lot.push(2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(lot.len(), 1);
        assert_eq!(lot.pop(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let lot = ParkingLot::new(Duration::from_secs(5));
        lot.push("closed tab");
        tokio::time::sleep(Duration::from_secs(2)).await;
        lot.push("later tab");

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(lot.len(), 1);
        assert_eq!(lot.pop(), Some("later tab"));

        lot.push("again");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(lot.is_empty());
        assert_eq!(lot.pop(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_everything() {
        let lot = ParkingLot::new(DEFAULT_EXPIRY);
        let item = Arc::new(());
        lot.push(Arc::clone(&item));
        lot.push(Arc::clone(&item));
        assert_eq!(Arc::strong_count(&item), 3);

        lot.clear();
        assert!(lot.is_empty());
        assert_eq!(Arc::strong_count(&item), 1);
    }
}
