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

use crate::PPTP_XMIT_WIN;

/// Signed distance from `b` to `a` in 32 bit sequence space.
///
/// Positive when `a` is ahead of `b`, correct across wraparound as long as
/// the two numbers are less than 2^31 apart.
#[inline]
pub fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Send times of the packets in the transmit window.
///
/// Slot `i` holds the send time of sequence number `recv_ack + 1 + i`, so the
/// oldest unacknowledged packet is always in slot 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XmitTimes {
    times: [Option<Instant>; PPTP_XMIT_WIN],
}

impl XmitTimes {
    /// Record the send time of the packet at `index` within the window.
    pub fn record(&mut self, index: usize, time: Instant) {
        assert!(index < PPTP_XMIT_WIN, "send time index {} out of window", index);
        self.times[index] = Some(time);
    }

    /// Return the send time of the packet at `index` within the window.
    pub fn get(&self, index: usize) -> Option<Instant> {
        self.times.get(index).copied().flatten()
    }

    /// Return the send time of the oldest unacknowledged packet.
    pub fn oldest(&self) -> Option<Instant> {
        self.times[0]
    }

    /// Drop the first `n` slots, moving the remaining ones to the front.
    pub fn advance(&mut self, n: usize) {
        let n = std::cmp::min(n, PPTP_XMIT_WIN);
        self.times.copy_within(n.., 0);
        for slot in &mut self.times[PPTP_XMIT_WIN - n..] {
            *slot = None;
        }
    }

    /// Forget all send times.
    pub fn clear(&mut self) {
        self.times = [None; PPTP_XMIT_WIN];
    }
}
