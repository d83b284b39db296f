use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Periodic work the manager schedules for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerEvent {
    /// The 10-second choke reciprocation pass.
    Reciprocation,
    /// The 30-second optimistic-unchoke rotation.
    OptimisticUnchoke,
}

/// Schedules events at relative second offsets.
///
/// `periodic` drives [`step`](EventTimer::step) every tick; events
/// re-arm themselves when handled, so cadence is measured from the
/// previous firing.
#[derive(Debug, Default)]
pub struct EventTimer {
    queue: BinaryHeap<Reverse<(Instant, TimerEvent)>>,
}

impl EventTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` to fire `secs` seconds after `now`.
    pub fn push_in(&mut self, now: Instant, secs: u64, event: TimerEvent) {
        self.queue
            .push(Reverse((now + Duration::from_secs(secs), event)));
    }

    /// Pops every event due at `now`, in firing order.
    pub fn step(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut due = Vec::new();
        while let Some(&Reverse((at, event))) = self.queue.peek() {
            if at > now {
                break;
            }
            self.queue.pop();
            due.push(event);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
