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
use std::mem;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use log::*;
use strum::IntoEnumIterator;

use self::ack::AckOutcome;
use self::ack::AckWindowTracker;
use self::ack::SendDecision;
use self::ack::SeqDecision;
use self::timer::Timer;
use self::timer::TimerTable;
use crate::gre;
use crate::gre::GreHeader;
use crate::gre::PPTP_MAX_PAYLOAD;
use crate::stat_add;
use crate::Error;
use crate::LowerLayer;
use crate::Result;
use crate::Stats;
use crate::TunnelConfig;
use crate::TIMER_GRANULARITY;

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not configured, or configured as disabled, or closed.
    Idle,

    /// Configured and enabled. Frames are accepted and emitted.
    Active,
}

/// One end of a PPTP tunnel.
///
/// The session owns all sequence, window and timer state of the tunnel. It
/// performs no I/O of its own except handing encoded frames to the lower
/// layer. The caller drives it with received frames and with the deadlines
/// reported by [`Session::timeout`], and must serialize all calls for one
/// session.
pub struct Session {
    /// Current configuration.
    conf: TunnelConfig,

    /// Lifecycle state.
    state: SessionState,

    /// Sequence and acknowledgment bookkeeping.
    tracker: AckWindowTracker,

    /// Receive ack and send ack timers.
    timers: TimerTable,

    /// Statistics about the session.
    stats: Stats,

    /// Where encoded frames go.
    lower: Arc<dyn LowerLayer>,

    /// Unique trace id for debug logging.
    trace_id: String,
}

impl Session {
    /// Create an idle session sending frames through `lower`.
    pub fn new(lower: Arc<dyn LowerLayer>) -> Self {
        let conf = TunnelConfig::default();
        Session {
            conf,
            state: SessionState::Idle,
            tracker: AckWindowTracker::new(&conf),
            timers: TimerTable::default(),
            stats: Stats::default(),
            lower,
            trace_id: Self::make_trace_id(conf.local_call_id),
        }
    }

    /// Create a session and apply the given configuration.
    pub fn with_config(conf: TunnelConfig, lower: Arc<dyn LowerLayer>) -> Result<Self> {
        let mut session = Session::new(lower);
        session.configure(conf)?;
        Ok(session)
    }

    fn make_trace_id(local_call_id: u16) -> String {
        format!("pptpgre-{:04x}", local_call_id)
    }

    /// Apply a new configuration.
    ///
    /// The sequence, window and timing state is always reset and both timers
    /// are cancelled, even if the configuration did not change. Statistics
    /// are kept. An invalid configuration leaves the session untouched.
    pub fn configure(&mut self, conf: TunnelConfig) -> Result<()> {
        if let Err(e) = conf.validate() {
            warn!("{} reject config {:?}: {:?}", self.trace_id, conf, e);
            return Err(e);
        }

        self.conf = conf;
        self.trace_id = Self::make_trace_id(conf.local_call_id);
        self.reset();
        self.state = if conf.enabled {
            SessionState::Active
        } else {
            SessionState::Idle
        };
        info!("{} configured {:?}", self.trace_id, conf);
        Ok(())
    }

    fn reset(&mut self) {
        self.timers.stop_all();
        self.tracker = AckWindowTracker::new(&self.conf);
    }

    /// Tear the session down. Both timers are cancelled and the session
    /// stops accepting and emitting frames until it is configured again.
    pub fn close(&mut self) {
        self.timers.stop_all();
        self.conf.enabled = false;
        self.state = SessionState::Idle;
        info!("{} closed", self.trace_id);
    }

    /// Return the current configuration.
    pub fn get_config(&self) -> TunnelConfig {
        self.conf
    }

    /// Return the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check whether the session accepts and emits frames.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Return the statistics.
    pub fn get_stats(&self) -> Stats {
        self.stats
    }

    /// Reset all statistics to zero.
    pub fn clear_stats(&mut self) {
        self.stats = Stats::default();
    }

    /// Return the statistics and reset them to zero.
    pub fn get_and_clear_stats(&mut self) -> Stats {
        mem::take(&mut self.stats)
    }

    /// Return the trace id of the session.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Highest sequence number received from the peer.
    pub fn recv_seq(&self) -> u32 {
        self.tracker.recv_seq()
    }

    /// Highest sequence number acknowledged by the peer.
    pub fn recv_ack(&self) -> u32 {
        self.tracker.recv_ack()
    }

    /// Highest sequence number sent.
    pub fn xmit_seq(&self) -> u32 {
        self.tracker.xmit_seq()
    }

    /// Highest sequence number acknowledged to the peer.
    pub fn xmit_ack(&self) -> u32 {
        self.tracker.xmit_ack()
    }

    /// Current transmit window.
    pub fn xmit_window(&self) -> u16 {
        self.tracker.xmit_window()
    }

    /// Current adaptive ack timeout in PPTP time units.
    pub fn ato(&self) -> i32 {
        self.tracker.timeout().ato()
    }

    /// Current smoothed round trip time in PPTP time units.
    pub fn rtt(&self) -> i32 {
        self.tracker.timeout().rtt()
    }

    /// Send a data packet, or a lone acknowledgment if `payload` is `None`.
    ///
    /// Returns `Error::Backpressure` when the transmit window is full. The
    /// caller should keep the packet and retry once acknowledgments arrive.
    pub fn send(&mut self, payload: Option<&[u8]>, now: Instant) -> Result<()> {
        if !self.is_active() {
            return Err(Error::NotConfigured);
        }
        self.xmit(payload, now)
    }

    fn xmit(&mut self, payload: Option<&[u8]>, now: Instant) -> Result<()> {
        if let Some(payload) = payload {
            if self.tracker.window_full() {
                stat_add(&mut self.stats.xmit_drops, 1);
                debug!(
                    "{} window full, {} packets outstanding",
                    self.trace_id,
                    self.tracker.outstanding()
                );
                return Err(Error::Backpressure);
            }
            if payload.len() > PPTP_MAX_PAYLOAD {
                stat_add(&mut self.stats.xmit_too_big, 1);
                debug!("{} payload of {} bytes too big", self.trace_id, payload.len());
                return Err(Error::TooBig);
            }
        }

        let (seq, ack) = match self.tracker.on_send(payload.is_some(), now) {
            SendDecision::Send { seq, ack } => (seq, ack),
            SendDecision::WindowFull => {
                stat_add(&mut self.stats.xmit_drops, 1);
                return Err(Error::Backpressure);
            }
        };

        // A piggybacked ack makes the delayed one unnecessary.
        if ack.is_some() {
            self.timers.stop(Timer::SendAck);
        }

        let frame = gre::encode(self.conf.peer_call_id, seq, ack, payload.unwrap_or_default())?;
        trace!(
            "{} send frame cid={:04x} seq={:?} ack={:?} len={}",
            self.trace_id,
            self.conf.peer_call_id,
            seq,
            ack,
            frame.len()
        );

        stat_add(&mut self.stats.xmit_packets, 1);
        stat_add(&mut self.stats.xmit_octets, frame.len() as u64);
        if payload.is_none() {
            stat_add(&mut self.stats.xmit_lone_acks, 1);
        }

        // The packet counts as outstanding even if the lower layer loses it,
        // so the timer must run to write it off.
        if seq.is_some() && !self.timers.is_pending(Timer::RecvAck) {
            self.set_recv_ack_timer(now);
        }

        if let Err(e) = self.lower.send_raw(&frame) {
            warn!("{} lower layer send failed: {:?}", self.trace_id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Process a frame received from the peer.
    ///
    /// Returns the payload of a new data frame. Frames that only carry an
    /// acknowledgment, duplicates and out-of-order frames are consumed
    /// and yield `None`. Malformed frames and frames for another call are
    /// counted and returned as errors; the caller should drop them.
    pub fn recv(&mut self, frame: Bytes, now: Instant) -> Result<Option<Bytes>> {
        if !self.is_active() {
            stat_add(&mut self.stats.recv_bad_cid, 1);
            debug!("{} drop frame, session not active", self.trace_id);
            return Err(Error::BadCallId);
        }

        let (hdr, payload) = self.decode_frame(&frame)?;
        trace!("{} recv frame {:?}", self.trace_id, hdr);

        if let Some(ack) = hdr.ack {
            self.process_ack(ack, now);
        }

        let seq = match hdr.seq {
            Some(seq) => seq,
            None => {
                stat_add(&mut self.stats.recv_lone_acks, 1);
                return Ok(None);
            }
        };

        match self.tracker.on_recv_seq(seq) {
            SeqDecision::Accept => (),
            SeqDecision::Duplicate => {
                stat_add(&mut self.stats.recv_duplicates, 1);
                debug!("{} drop duplicate seq {}", self.trace_id, seq);
                return Ok(None);
            }
            SeqDecision::OutOfOrder => {
                stat_add(&mut self.stats.recv_out_of_order, 1);
                debug!(
                    "{} drop out of order seq {}, expect after {}",
                    self.trace_id,
                    seq,
                    self.tracker.recv_seq()
                );
                return Ok(None);
            }
        }

        // Acknowledge the new packet, now or after a while.
        if !self.timers.is_pending(Timer::SendAck) {
            if self.conf.enable_delayed_ack {
                self.set_send_ack_timer(now);
            } else if let Err(e) = self.xmit(None, now) {
                debug!("{} send ack failed: {:?}", self.trace_id, e);
            }
        }

        stat_add(&mut self.stats.recv_packets, 1);
        stat_add(&mut self.stats.recv_octets, payload.len() as u64);
        Ok(Some(frame.slice(payload)))
    }

    /// Validate a received frame and return its header and payload range.
    fn decode_frame(&mut self, frame: &[u8]) -> Result<(GreHeader, Range<usize>)> {
        let (hdr, hdr_len) = match GreHeader::from_bytes(frame) {
            Ok(v) => v,
            Err(e) => {
                match e {
                    Error::Truncated => stat_add(&mut self.stats.recv_runts, 1),
                    _ => stat_add(&mut self.stats.recv_bad_gre, 1),
                }
                debug!(
                    "{} drop frame of {} bytes: {:?}",
                    self.trace_id,
                    frame.len(),
                    e
                );
                return Err(e);
            }
        };

        if hdr.call_id != self.conf.local_call_id {
            stat_add(&mut self.stats.recv_bad_cid, 1);
            debug!("{} drop frame for other call {:?}", self.trace_id, hdr);
            return Err(Error::BadCallId);
        }

        match hdr.payload_range(hdr_len, frame.len()) {
            Ok(payload) => Ok((hdr, payload)),
            Err(e) => {
                stat_add(&mut self.stats.recv_bad_gre, 1);
                debug!(
                    "{} drop frame {:?} with {} payload bytes",
                    self.trace_id,
                    hdr,
                    frame.len() - hdr_len
                );
                Err(e)
            }
        }
    }

    fn process_ack(&mut self, ack: u32, now: Instant) {
        match self.tracker.on_recv_ack(ack, now) {
            Ok(AckOutcome::Acked { outstanding }) => {
                self.timers.stop(Timer::RecvAck);
                if outstanding {
                    self.set_recv_ack_timer(now);
                }
                trace!(
                    "{} acked {}, window {} ato {}",
                    self.trace_id,
                    ack,
                    self.tracker.xmit_window(),
                    self.tracker.timeout().ato()
                );
            }
            Ok(AckOutcome::Stale) => {
                stat_add(&mut self.stats.recv_stale_acks, 1);
            }
            Err(e) => {
                stat_add(&mut self.stats.recv_bad_acks, 1);
                debug!(
                    "{} ignore ack {} beyond sent {}: {:?}",
                    self.trace_id,
                    ack,
                    self.tracker.xmit_seq(),
                    e
                );
            }
        }
    }

    fn set_recv_ack_timer(&mut self, now: Instant) {
        match self.tracker.recv_ack_deadline() {
            Some(deadline) => {
                let time = cmp::max(deadline, now) + TIMER_GRANULARITY;
                trace!(
                    "{} recv ack timer in {:?}",
                    self.trace_id,
                    time.saturating_duration_since(now)
                );
                self.timers.set(Timer::RecvAck, time);
            }
            None => self.timers.stop(Timer::RecvAck),
        }
    }

    fn set_send_ack_timer(&mut self, now: Instant) {
        let delay = rtt::to_duration(self.tracker.ack_delay());
        trace!("{} send ack timer in {:?}", self.trace_id, delay);
        self.timers.set(Timer::SendAck, now + delay);
    }

    /// Return the earliest timer deadline, if any timer is armed.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.timers.next_timeout()
    }

    /// Return the amount of time until the next timeout event.
    ///
    /// `None` means no timer is armed. The caller should call
    /// [`Session::on_timeout`] once the duration has elapsed.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        let d = self
            .timers
            .next_timeout()
            .map(|time| time.saturating_duration_since(now));
        trace!("{} next timeout duration {:?}", self.trace_id, d);
        d
    }

    /// Process timeout events on the session.
    pub fn on_timeout(&mut self, now: Instant) {
        for timer in Timer::iter() {
            if !self.timers.is_expired(timer, now) {
                continue;
            }
            trace!("{} timer {:?} timeout", self.trace_id, timer);

            self.timers.stop(timer);
            match timer {
                Timer::RecvAck => {
                    stat_add(&mut self.stats.recv_ack_timeouts, 1);
                    self.tracker.on_recv_timeout();
                    debug!(
                        "{} ack timeout, window {} ato {}",
                        self.trace_id,
                        self.tracker.xmit_window(),
                        self.tracker.timeout().ato()
                    );
                    if self.tracker.outstanding() != 0 {
                        self.set_recv_ack_timer(now);
                    }
                }

                Timer::SendAck => {
                    if !self.tracker.ack_pending() && !self.conf.enable_always_ack {
                        continue;
                    }
                    if let Err(e) = self.xmit(None, now) {
                        debug!("{} send delayed ack failed: {:?}", self.trace_id, e);
                    }
                }
            }
        }
    }
}

pub mod ack;
pub mod rtt;
pub(crate) mod timer;
