//! Cancelable Scheduled Timers
//!
//! Tick-driven timer queue. Time only advances when the owner calls
//! [`TimerQueue::advance`] from its simulation step, so timers stay in lockstep
//! with the authoritative loop and never run on background tasks.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// Handle for a scheduled timer.
///
/// Ids are never reused within a queue, so a handle held past cancellation
/// can never alias a newer timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone)]
struct PendingTimer<K> {
    remaining_secs: f64,
    payload: K,
}

/// Queue of pending one-shot timers carrying a payload of type `K`.
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    next_id: u64,
    pending: BTreeMap<TimerId, PendingTimer<K>>,
}

impl<K> TimerQueue<K> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: BTreeMap::new(),
        }
    }

    /// Schedule `payload` to fire after `delay_secs` of simulated time.
    ///
    /// Non-finite or negative delays are treated as zero (fires on the next advance).
    pub fn schedule(&mut self, delay_secs: f64, payload: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let remaining_secs = if delay_secs.is_finite() { delay_secs.max(0.0) } else { 0.0 };
        self.pending.insert(id, PendingTimer { remaining_secs, payload });
        id
    }

    /// Cancel a pending timer. Returns false if it already fired or was canceled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    /// Check if a timer is still pending.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Advance simulated time by `dt_secs` and return fired timers in id order.
    pub fn advance(&mut self, dt_secs: f64) -> Vec<(TimerId, K)> {
        if !dt_secs.is_finite() || dt_secs < 0.0 {
            return Vec::new();
        }

        let mut due = Vec::new();
        for (id, timer) in self.pending.iter_mut() {
            timer.remaining_secs -= dt_secs;
            if timer.remaining_secs <= 0.0 {
                due.push(*id);
            }
        }

        due.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|t| (id, t.payload)))
            .collect()
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_after_delay() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(1.0, "load");

        assert!(queue.advance(0.5).is_empty());
        assert!(queue.is_pending(id));

        let fired = queue.advance(0.5);
        assert_eq!(fired, vec![(id, "load")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_canceled_timer_never_fires() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(0.25, ());

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.advance(10.0).is_empty());
    }

    #[test]
    fn test_fire_order_is_by_id() {
        let mut queue = TimerQueue::new();
        let a = queue.schedule(0.3, 'a');
        let b = queue.schedule(0.1, 'b');

        let fired = queue.advance(1.0);
        assert_eq!(fired, vec![(a, 'a'), (b, 'b')]);
    }

    #[test]
    fn test_ids_not_reused_after_cancel_all() {
        let mut queue = TimerQueue::new();
        let first = queue.schedule(1.0, ());
        queue.cancel_all();
        let second = queue.schedule(1.0, ());

        assert_ne!(first, second);
        assert!(!queue.is_pending(first));
        assert!(queue.is_pending(second));
    }

    #[test]
    fn test_invalid_advance_is_ignored() {
        let mut queue = TimerQueue::new();
        queue.schedule(0.0, ());

        assert!(queue.advance(f64::NAN).is_empty());
        assert!(queue.advance(-1.0).is_empty());
        assert_eq!(queue.advance(0.0).len(), 1);
    }
}
