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
use std::time::Instant;

use super::rtt;
use super::rtt::AckTimeout;
use crate::window::seq_diff;
use crate::window::XmitTimes;
use crate::Error;
use crate::Result;
use crate::TunnelConfig;
use crate::PPTP_XMIT_WIN;

/// What to put into the header of an outgoing frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendDecision {
    /// Send the frame with the given optional sequence and acknowledgment
    /// numbers.
    Send { seq: Option<u32>, ack: Option<u32> },

    /// The transmit window is full; the frame must not be sent.
    WindowFull,
}

/// Result of processing an acknowledgment number from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledgment advanced the window. `outstanding` tells whether
    /// packets remain unacknowledged.
    Acked { outstanding: bool },

    /// The acknowledgment was already seen, nothing changed.
    Stale,
}

/// Result of processing a sequence number from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqDecision {
    /// The frame is new and its payload should be delivered.
    Accept,

    /// The frame repeats the last accepted sequence number.
    Duplicate,

    /// The frame is older than the last accepted sequence number.
    OutOfOrder,
}

/// Sequence and acknowledgment bookkeeping for one tunnel, together with
/// the transmit window and the adaptive ack timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckWindowTracker {
    /// Whether sequence numbers are flow controlled.
    windowing: bool,

    /// Whether every outgoing frame carries an acknowledgment.
    always_ack: bool,

    /// Highest sequence number received from the peer.
    recv_seq: u32,

    /// Highest sequence number the peer has acknowledged.
    recv_ack: u32,

    /// Highest sequence number sent.
    xmit_seq: u32,

    /// Highest sequence number acknowledged to the peer.
    xmit_ack: u32,

    /// Number of packets allowed to be outstanding.
    xmit_window: u16,

    /// Acknowledgment number at which the window may grow next.
    win_ack: u32,

    /// Send times of outstanding packets.
    xmit_times: XmitTimes,

    /// Adaptive timeout state.
    timeout: AckTimeout,
}

impl AckWindowTracker {
    pub fn new(conf: &TunnelConfig) -> Self {
        let xmit_window = conf.recv_window.clamp(1, PPTP_XMIT_WIN as u16);
        Self {
            windowing: conf.enable_windowing,
            always_ack: conf.enable_always_ack,
            recv_seq: u32::MAX,
            recv_ack: 0,
            xmit_seq: 0,
            xmit_ack: u32::MAX,
            xmit_window,
            win_ack: xmit_window as u32,
            xmit_times: XmitTimes::default(),
            timeout: AckTimeout::new(conf.peer_ppd),
        }
    }

    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }

    pub fn recv_ack(&self) -> u32 {
        self.recv_ack
    }

    pub fn xmit_seq(&self) -> u32 {
        self.xmit_seq
    }

    pub fn xmit_ack(&self) -> u32 {
        self.xmit_ack
    }

    pub fn xmit_window(&self) -> u16 {
        self.xmit_window
    }

    pub fn win_ack(&self) -> u32 {
        self.win_ack
    }

    pub fn timeout(&self) -> &AckTimeout {
        &self.timeout
    }

    /// Number of packets sent but not acknowledged yet.
    pub fn outstanding(&self) -> u32 {
        self.xmit_seq.wrapping_sub(self.recv_ack)
    }

    /// Whether a data packet would be refused by the transmit window.
    pub fn window_full(&self) -> bool {
        self.windowing && self.outstanding() >= self.xmit_window as u32
    }

    /// Whether received data has not been acknowledged to the peer yet.
    pub fn ack_pending(&self) -> bool {
        self.xmit_ack != self.recv_seq
    }

    /// Return when the oldest outstanding packet is overdue, if any packet
    /// is being timed.
    pub fn recv_ack_deadline(&self) -> Option<Instant> {
        if !self.windowing || self.recv_ack == self.xmit_seq {
            return None;
        }
        self.xmit_times
            .oldest()
            .map(|sent| sent + rtt::to_duration(self.timeout.ato()))
    }

    /// Return how long an acknowledgment may be delayed.
    pub fn ack_delay(&self) -> i32 {
        self.timeout.ack_delay()
    }

    /// Assign sequence and acknowledgment numbers to an outgoing frame.
    ///
    /// A frame with payload always gets the next sequence number. With
    /// windowing enabled it is refused when the window is full, and its send
    /// time is recorded for round trip sampling.
    pub fn on_send(&mut self, has_payload: bool, now: Instant) -> SendDecision {
        let mut seq = None;
        if has_payload {
            if self.window_full() {
                return SendDecision::WindowFull;
            }
            if self.windowing {
                self.xmit_times.record(self.outstanding() as usize, now);
            }
            self.xmit_seq = self.xmit_seq.wrapping_add(1);
            seq = Some(self.xmit_seq);
        }

        let mut ack = None;
        if self.always_ack || self.ack_pending() {
            ack = Some(self.recv_seq);
            self.xmit_ack = self.recv_seq;
        }

        SendDecision::Send { seq, ack }
    }

    /// Process an acknowledgment number received from the peer.
    ///
    /// Returns `Error::FutureAck` for an ack of a packet never sent. Neither
    /// a future nor a stale ack changes any state.
    pub fn on_recv_ack(&mut self, ack: u32, now: Instant) -> Result<AckOutcome> {
        if seq_diff(ack, self.xmit_seq) > 0 {
            return Err(Error::FutureAck);
        }
        if seq_diff(ack, self.recv_ack) <= 0 {
            return Ok(AckOutcome::Stale);
        }

        if self.windowing {
            let index = ack.wrapping_sub(self.recv_ack).wrapping_sub(1) as usize;
            debug_assert!(index < PPTP_XMIT_WIN);

            if let Some(sent) = self.xmit_times.get(index) {
                let sample = rtt::from_duration(now.saturating_duration_since(sent));
                self.timeout.update(sample);
            }
            self.xmit_times.advance(index + 1);

            // A whole window was acknowledged, open it up by one packet.
            if seq_diff(ack, self.win_ack) >= 0 && (self.xmit_window as usize) < PPTP_XMIT_WIN {
                self.xmit_window += 1;
                self.win_ack = ack.wrapping_add(self.xmit_window as u32);
            }
        }

        self.recv_ack = ack;
        Ok(AckOutcome::Acked {
            outstanding: self.recv_ack != self.xmit_seq,
        })
    }

    /// Handle expiry of the oldest outstanding packet's deadline.
    ///
    /// GRE never retransmits: the outstanding packets are written off as
    /// acknowledged, the timeout backs off and the window is halved.
    pub fn on_recv_timeout(&mut self) {
        self.timeout.on_timeout();

        self.recv_ack = self.xmit_seq;
        self.xmit_times.clear();

        self.xmit_window = cmp::max((self.xmit_window + 1) / 2, 1);
        self.win_ack = self.recv_ack.wrapping_add(self.xmit_window as u32);
    }

    /// Process a sequence number received from the peer.
    pub fn on_recv_seq(&mut self, seq: u32) -> SeqDecision {
        if seq_diff(seq, self.recv_seq) <= 0 {
            if seq == self.recv_seq {
                return SeqDecision::Duplicate;
            }
            return SeqDecision::OutOfOrder;
        }

        self.recv_seq = seq;
        SeqDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PPTP_MAX_TIMEOUT;
    use crate::PPTP_MIN_TIMEOUT;
    use rand::Rng;
    use std::time::Duration;

    fn new_test_config(recv_window: u16) -> TunnelConfig {
        TunnelConfig {
            enabled: true,
            local_call_id: 1,
            peer_call_id: 2,
            peer_ppd: 1,
            recv_window,
            enable_windowing: true,
            enable_always_ack: false,
            enable_delayed_ack: true,
        }
    }

    fn send_data(t: &mut AckWindowTracker, now: Instant) -> Option<u32> {
        match t.on_send(true, now) {
            SendDecision::Send { seq, .. } => seq,
            SendDecision::WindowFull => None,
        }
    }

    #[test]
    fn initial_state() {
        let t = AckWindowTracker::new(&new_test_config(64));
        assert_eq!(t.xmit_window(), PPTP_XMIT_WIN as u16);
        assert_eq!(t.xmit_seq(), 0);
        assert_eq!(t.recv_ack(), 0);
        assert_eq!(t.recv_seq(), u32::MAX);
        assert!(!t.ack_pending());
        assert_eq!(t.recv_ack_deadline(), None);

        let t = AckWindowTracker::new(&new_test_config(0));
        assert_eq!(t.xmit_window(), 1);
    }

    #[test]
    fn window_full_then_ack() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(4));

        for i in 1..=4 {
            assert_eq!(send_data(&mut t, now), Some(i));
        }
        assert_eq!(t.on_send(true, now), SendDecision::WindowFull);
        assert_eq!(t.xmit_seq(), 4);

        let outcome = t.on_recv_ack(2, now + Duration::from_millis(50));
        assert_eq!(outcome, Ok(AckOutcome::Acked { outstanding: true }));
        assert_eq!(t.recv_ack(), 2);
        assert_eq!(seq_diff(t.xmit_seq(), t.recv_ack()), 2);
        assert_eq!(t.xmit_window(), 4);

        assert_eq!(send_data(&mut t, now), Some(5));
    }

    #[test]
    fn lone_ack_needs_no_window() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(1));
        assert_eq!(send_data(&mut t, now), Some(1));
        assert_eq!(t.on_send(true, now), SendDecision::WindowFull);

        assert_eq!(t.on_recv_seq(7), SeqDecision::Accept);
        assert!(t.ack_pending());
        assert_eq!(
            t.on_send(false, now),
            SendDecision::Send {
                seq: None,
                ack: Some(7)
            }
        );
        assert!(!t.ack_pending());

        // Nothing to acknowledge any more.
        assert_eq!(
            t.on_send(false, now),
            SendDecision::Send {
                seq: None,
                ack: None
            }
        );
    }

    #[test]
    fn always_ack() {
        let now = Instant::now();
        let mut conf = new_test_config(4);
        conf.enable_always_ack = true;
        let mut t = AckWindowTracker::new(&conf);

        assert_eq!(
            t.on_send(true, now),
            SendDecision::Send {
                seq: Some(1),
                ack: Some(u32::MAX)
            }
        );
        assert_eq!(
            t.on_send(true, now),
            SendDecision::Send {
                seq: Some(2),
                ack: Some(u32::MAX)
            }
        );
    }

    #[test]
    fn no_windowing() {
        let now = Instant::now();
        let mut conf = new_test_config(1);
        conf.enable_windowing = false;
        let mut t = AckWindowTracker::new(&conf);

        for i in 1..=100 {
            assert_eq!(send_data(&mut t, now), Some(i));
        }
        assert!(!t.window_full());
        assert_eq!(t.recv_ack_deadline(), None);

        // Acks still advance, without touching the estimator.
        let before = *t.timeout();
        assert_eq!(
            t.on_recv_ack(100, now + Duration::from_secs(1)),
            Ok(AckOutcome::Acked { outstanding: false })
        );
        assert_eq!(t.recv_ack(), 100);
        assert_eq!(*t.timeout(), before);
    }

    #[test]
    fn future_and_stale_acks() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(8));
        send_data(&mut t, now);
        send_data(&mut t, now);
        assert_eq!(t.on_recv_ack(2, now), Ok(AckOutcome::Acked { outstanding: false }));

        let before = t.clone();
        assert_eq!(t.on_recv_ack(3, now), Err(Error::FutureAck));
        assert_eq!(t, before);

        assert_eq!(t.on_recv_ack(2, now), Ok(AckOutcome::Stale));
        assert_eq!(t.on_recv_ack(1, now), Ok(AckOutcome::Stale));
        assert_eq!(t.on_recv_ack(1, now), Ok(AckOutcome::Stale));
        assert_eq!(t, before);
    }

    #[test]
    fn rtt_sample_from_send_time() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(8));
        send_data(&mut t, now);
        send_data(&mut t, now + Duration::from_millis(100));

        // The sample is taken from the acknowledged packet, seq 2.
        t.on_recv_ack(2, now + Duration::from_millis(300)).unwrap();
        assert_eq!(t.timeout().rtt(), 112);
        assert_eq!(t.timeout().ato(), 212);
        assert_eq!(t.recv_ack_deadline(), None);
    }

    #[test]
    fn recv_ack_deadline() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(8));
        send_data(&mut t, now);
        send_data(&mut t, now + Duration::from_millis(10));
        assert_eq!(
            t.recv_ack_deadline(),
            Some(now + Duration::from_millis(PPTP_MAX_TIMEOUT as u64))
        );

        // The oldest outstanding packet is now seq 2.
        t.on_recv_ack(1, now + Duration::from_millis(200)).unwrap();
        let ato = t.timeout().ato() as u64;
        assert_eq!(
            t.recv_ack_deadline(),
            Some(now + Duration::from_millis(10 + ato))
        );
    }

    #[test]
    fn window_grows_after_full_window_acked() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(2));
        assert_eq!(t.win_ack(), 2);

        send_data(&mut t, now);
        t.on_recv_ack(1, now).unwrap();
        assert_eq!(t.xmit_window(), 2);

        send_data(&mut t, now);
        t.on_recv_ack(2, now).unwrap();
        assert_eq!(t.xmit_window(), 3);
        assert_eq!(t.win_ack(), 5);
    }

    #[test]
    fn window_never_exceeds_max() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(16));
        for _ in 0..1000 {
            let seq = send_data(&mut t, now).unwrap();
            t.on_recv_ack(seq, now).unwrap();
        }
        assert_eq!(t.xmit_window() as usize, PPTP_XMIT_WIN);
    }

    #[test]
    fn timeout_shrinks_window() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(8));
        for _ in 0..5 {
            send_data(&mut t, now);
        }
        let rtt = t.timeout().rtt();

        t.on_recv_timeout();
        assert_eq!(t.recv_ack(), t.xmit_seq());
        assert_eq!(t.xmit_window(), 4);
        assert_eq!(t.win_ack(), 5 + 4);
        assert_eq!(t.timeout().rtt(), rtt * 2);
        assert_eq!(t.recv_ack_deadline(), None);

        for expected in [2, 1, 1] {
            t.on_recv_timeout();
            assert_eq!(t.xmit_window(), expected);
        }
    }

    #[test]
    fn recv_seq_order() {
        let mut t = AckWindowTracker::new(&new_test_config(8));
        assert_eq!(t.on_recv_seq(0), SeqDecision::Accept);
        assert_eq!(t.on_recv_seq(1), SeqDecision::Accept);
        assert_eq!(t.on_recv_seq(3), SeqDecision::Accept);
        assert_eq!(t.on_recv_seq(3), SeqDecision::Duplicate);
        assert_eq!(t.on_recv_seq(2), SeqDecision::OutOfOrder);
        assert_eq!(t.recv_seq(), 3);
    }

    #[test]
    fn recv_seq_wraparound() {
        let mut t = AckWindowTracker::new(&new_test_config(8));
        assert_eq!(t.on_recv_seq(u32::MAX - 1), SeqDecision::OutOfOrder);
        assert_eq!(t.on_recv_seq(5), SeqDecision::Accept);
        assert_eq!(t.on_recv_seq(u32::MAX - 1), SeqDecision::OutOfOrder);
        assert_eq!(t.recv_seq(), 5);
    }

    #[test]
    fn sequence_wraparound() {
        let now = Instant::now();
        let mut t = AckWindowTracker::new(&new_test_config(4));
        t.xmit_seq = u32::MAX - 1;
        t.recv_ack = u32::MAX - 1;
        t.win_ack = u32::MAX;

        assert_eq!(send_data(&mut t, now), Some(u32::MAX));
        assert_eq!(send_data(&mut t, now), Some(0));
        assert_eq!(send_data(&mut t, now), Some(1));
        assert_eq!(t.outstanding(), 3);

        assert_eq!(t.on_recv_ack(0, now), Ok(AckOutcome::Acked { outstanding: true }));
        assert_eq!(t.outstanding(), 1);
        assert_eq!(t.xmit_window(), 5);
    }

    #[test]
    fn random_window_invariant() {
        let mut rng = rand::thread_rng();
        let start = Instant::now();

        for recv_window in [1_u16, 3, 8, 16, 64] {
            let mut t = AckWindowTracker::new(&new_test_config(recv_window));
            for step in 0..2000_u64 {
                let now = start + Duration::from_millis(step);
                match rng.gen_range(0..10) {
                    0..=4 => {
                        t.on_send(true, now);
                    }
                    5..=7 => {
                        let ack = t.recv_ack().wrapping_add(rng.gen_range(0..=t.outstanding() + 1));
                        let before = t.clone();
                        match t.on_recv_ack(ack, now) {
                            Ok(AckOutcome::Acked { .. }) => assert_eq!(t.recv_ack(), ack),
                            Ok(AckOutcome::Stale) | Err(Error::FutureAck) => {
                                assert_eq!(t, before)
                            }
                            Err(e) => panic!("unexpected error {:?}", e),
                        }
                    }
                    8 => {
                        t.on_send(false, now);
                    }
                    _ => t.on_recv_timeout(),
                }

                assert!(seq_diff(t.xmit_seq(), t.recv_ack()) >= 0);
                assert!(seq_diff(t.xmit_seq(), t.recv_ack()) <= t.xmit_window() as i32);
                assert!(t.xmit_window() >= 1);
                assert!(t.xmit_window() as usize <= PPTP_XMIT_WIN);
                assert!(t.timeout().ato() >= PPTP_MIN_TIMEOUT);
                assert!(t.timeout().ato() <= PPTP_MAX_TIMEOUT);
            }
        }
    }
}
