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

use std::time::Instant;

use strum::EnumCount;
use strum_macros::EnumCount;
use strum_macros::EnumIter;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, EnumIter, EnumCount)]
pub(crate) enum Timer {
    /// When the oldest unacknowledged packet is overdue and the transmit
    /// window should shrink
    RecvAck,

    /// When a delayed acknowledgment must be sent on its own because no
    /// outgoing data packet picked it up
    SendAck,
}

/// Associated timeout values with each `Timer`
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    expires: [Option<Instant>; Timer::COUNT],
}

impl TimerTable {
    /// Set expiration time for the given timer
    pub fn set(&mut self, timer: Timer, time: Instant) {
        self.expires[timer as usize] = Some(time);
    }

    /// Get expiration time for the given timer
    pub fn get(&self, timer: Timer) -> Option<Instant> {
        self.expires[timer as usize]
    }

    /// Cancel the given timer
    pub fn stop(&mut self, timer: Timer) {
        self.expires[timer as usize] = None;
    }

    /// Cancel all timers
    pub fn stop_all(&mut self) {
        self.expires = [None; Timer::COUNT];
    }

    /// Check whether the given timer is armed
    pub fn is_pending(&self, timer: Timer) -> bool {
        self.expires[timer as usize].is_some()
    }

    /// Get the minimum expiration time of all timers
    pub fn next_timeout(&self) -> Option<Instant> {
        self.expires.iter().filter_map(|&x| x).min()
    }

    /// Check whether the given timer is expired
    pub fn is_expired(&self, timer: Timer, after: Instant) -> bool {
        self.expires[timer as usize].map_or(false, |x| x <= after)
    }
}
