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

use std::cmp;
use std::time::Duration;

use crate::PPTP_MAX_ACK_DELAY;
use crate::PPTP_MAX_TIMEOUT;
use crate::PPTP_MIN_ACK_DELAY;
use crate::PPTP_MIN_RTT;
use crate::PPTP_MIN_TIMEOUT;
use crate::PPTP_TIME_SCALE;

/// Adaptive acknowledgment timeout for a tunnel.
/// See RFC 2637 Section 4.4
///
/// All values are in PPTP time units, `PPTP_TIME_SCALE` units per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckTimeout {
    /// Adaptive timeout, how long to wait for an ack before declaring the
    /// oldest outstanding packet overdue.
    ato: i32,

    /// Smoothed round trip time.
    rtt: i32,

    /// Smoothed mean deviation of the round trip time.
    dev: i32,
}

impl AckTimeout {
    /// Create an estimator seeded from the peer's packet processing delay,
    /// given in tenths of a second. A delay of zero counts as one.
    pub fn new(peer_ppd: u16) -> Self {
        let ppd = cmp::max(peer_ppd, 1) as i32;
        Self {
            ato: PPTP_MAX_TIMEOUT,
            rtt: cmp::max(PPTP_TIME_SCALE / 10 * ppd, PPTP_MIN_RTT),
            dev: 0,
        }
    }

    /// Return the adaptive timeout.
    pub fn ato(&self) -> i32 {
        self.ato
    }

    /// Return the smoothed round trip time.
    pub fn rtt(&self) -> i32 {
        self.rtt
    }

    /// Return the smoothed deviation.
    pub fn dev(&self) -> i32 {
        self.dev
    }

    /// Return how long an acknowledgment may be held back waiting for
    /// outgoing data to piggyback on.
    pub fn ack_delay(&self) -> i32 {
        (self.rtt >> 2).clamp(PPTP_MIN_ACK_DELAY, PPTP_MAX_ACK_DELAY)
    }

    /// Update the estimator with a round trip time sample.
    ///
    /// `rtt` is not floored at `PPTP_MIN_RTT` here; the floor only applies
    /// when the estimator is created.
    pub fn update(&mut self, sample: i32) {
        let diff = sample as i64 - self.rtt as i64;
        self.rtt = (self.rtt as i64 + (diff >> 3)) as i32;
        self.dev = (self.dev as i64 + ((diff.abs() - self.dev as i64) >> 2)) as i32;
        self.update_ato();
    }

    /// Back off after the oldest outstanding packet was not acknowledged in
    /// time.
    pub fn on_timeout(&mut self) {
        let backoff = cmp::min(self.rtt.saturating_mul(2), PPTP_MAX_TIMEOUT);
        self.rtt = cmp::max(self.rtt, backoff);
        self.update_ato();
    }

    fn update_ato(&mut self) {
        let ato = self.rtt as i64 + ((self.dev as i64) << 2);
        self.ato = ato.clamp(PPTP_MIN_TIMEOUT as i64, PPTP_MAX_TIMEOUT as i64) as i32;
    }
}

/// Convert PPTP time units to a duration.
pub fn to_duration(units: i32) -> Duration {
    Duration::from_millis(cmp::max(units, 0) as u64 * 1000 / PPTP_TIME_SCALE as u64)
}

/// Convert a duration to PPTP time units, saturating at `i32::MAX`.
pub fn from_duration(d: Duration) -> i32 {
    cmp::min(d.as_millis() * PPTP_TIME_SCALE as u128 / 1000, i32::MAX as u128) as i32
}
