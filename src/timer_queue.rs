// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;
use std::time::Instant;

use priority_queue::double_priority_queue::DoublePriorityQueue;

/// Sessions are identified by their local call id.
type CallId = u16;

/// Deadlines of many sessions, at most one per session, ordered by which
/// one expires first.
pub struct TimerQueue {
    timers: DoublePriorityQueue<CallId, Instant>,
}

impl TimerQueue {
    /// Create a new TimerQueue.
    pub fn new() -> Self {
        Self {
            timers: DoublePriorityQueue::new(),
        }
    }

    /// Creates an empty timer queue with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timers: DoublePriorityQueue::with_capacity(capacity),
        }
    }

    /// Return the number of sessions with a deadline.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Return if the timer queue is empty.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Set the deadline of a session, replacing the previous one.
    pub fn add(&mut self, cid: CallId, expires_at: Instant) {
        _ = self.timers.push(cid, expires_at);
    }

    /// Forget the deadline of a session.
    pub fn del(&mut self, cid: &CallId) {
        _ = self.timers.remove(cid);
    }

    /// Return the amount of time remaining for the earliest deadline.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.timers
            .peek_min()
            .map(|(_, expires_at)| expires_at.saturating_duration_since(now))
    }

    /// Remove and return the session with the earliest expired deadline.
    pub fn next_expire(&mut self, now: Instant) -> Option<CallId> {
        match self.timers.peek_min() {
            Some((_, expires_at)) if *expires_at <= now => {
                self.timers.pop_min().map(|(cid, _)| cid)
            }
            _ => None,
        }
    }

    /// Clear all the deadlines.
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add() {
        let mut tq = TimerQueue::with_capacity(10);
        assert!(tq.is_empty());

        let now = Instant::now();
        tq.add(0x1234, now + Duration::from_millis(25));
        assert_eq!(tq.len(), 1);

        tq.add(0x4321, now + Duration::from_millis(3001));
        assert_eq!(tq.len(), 2);

        // A session keeps a single deadline.
        tq.add(0x4321, now + Duration::from_millis(201));
        assert_eq!(tq.len(), 2);
        assert_eq!(tq.time_remaining(now), Some(Duration::from_millis(25)));
        tq.del(&0x1234);
        assert_eq!(tq.time_remaining(now), Some(Duration::from_millis(201)));
    }

    #[test]
    fn del() {
        let mut tq = TimerQueue::default();

        let now = Instant::now();
        tq.add(1, now + Duration::from_millis(25));
        assert_eq!(tq.len(), 1);

        tq.del(&2);
        assert_eq!(tq.len(), 1);

        tq.del(&1);
        assert!(tq.is_empty());
        assert_eq!(tq.time_remaining(now), None);
    }

    #[test]
    fn expired() {
        let mut tq = TimerQueue::default();

        let now = Instant::now();
        tq.add(1, now + Duration::from_millis(25));
        tq.add(2, now + Duration::from_millis(200));
        tq.add(3, now + Duration::from_millis(3001));
        assert!(tq.next_expire(now).is_none());
        assert_eq!(tq.len(), 3);

        let t = now + Duration::from_millis(25);
        assert_eq!(tq.next_expire(t), Some(1));
        assert_eq!(tq.next_expire(t), None);
        assert_eq!(tq.len(), 2);

        tq.del(&3);
        tq.add(4, now + Duration::from_millis(1000));
        tq.add(5, now + Duration::from_millis(1000));
        tq.add(6, now + Duration::from_millis(1500));
        let t = now + Duration::from_millis(1000);
        assert_eq!(tq.next_expire(t), Some(2));
        let mut same = vec![tq.next_expire(t), tq.next_expire(t)];
        same.sort();
        assert_eq!(same, vec![Some(4), Some(5)]);
        assert_eq!(tq.len(), 1);

        tq.clear();
        assert!(tq.is_empty());
    }

    #[test]
    fn time_remaining() {
        let mut tq = TimerQueue::default();

        let now = Instant::now();
        assert_eq!(tq.time_remaining(now), None);

        tq.add(1, now + Duration::from_millis(25));
        tq.add(2, now + Duration::from_millis(200));
        assert_eq!(tq.time_remaining(now), Some(Duration::from_millis(25)));

        // An overdue deadline leaves no time.
        let later = now + Duration::from_secs(1);
        assert_eq!(tq.time_remaining(later), Some(Duration::ZERO));
    }
}
