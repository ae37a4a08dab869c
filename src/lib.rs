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

//! An implementation of the enhanced GRE encapsulation used by the
//! [Point-to-Point Tunneling Protocol](https://www.rfc-editor.org/rfc/rfc2637)
//! to carry PPP frames over IP.
//!
//! ## Features
//!
//! * **Wire compatible**: bit-exact encoding and validation of the PPTP GRE
//!   header with optional sequence and acknowledgment numbers.
//! * **Sliding window**: the number of unacknowledged data packets is bounded
//!   by a transmit window that grows while the peer keeps up and halves when
//!   an acknowledgment is overdue.
//! * **Adaptive timing**: the acknowledgment timeout follows the smoothed round
//!   trip time and its deviation (RFC 2637 Section 4.4).
//! * **Piggybacked acks**: acknowledgments ride on outgoing data whenever
//!   possible and are sent on their own only after a short delay.
//! * **Sans-IO**: the engine never blocks. Frames leave through a
//!   [`LowerLayer`], timers are exposed as deadlines to be driven by the
//!   caller's event loop.
//!
//! ## Get started
//!
//! A [`Session`] handles one tunnel. A [`Node`] multiplexes many sessions
//! sharing one lower layer by their call id.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! struct Discard;
//!
//! impl pptpgre::LowerLayer for Discard {
//!     fn send_raw(&self, _buf: &[u8]) -> pptpgre::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let mut session = pptpgre::Session::new(Arc::new(Discard));
//! session.configure(pptpgre::TunnelConfig {
//!     enabled: true,
//!     local_call_id: 0x1234,
//!     peer_call_id: 0x4321,
//!     recv_window: 16,
//!     enable_windowing: true,
//!     enable_delayed_ack: true,
//!     ..Default::default()
//! })?;
//! session.send(Some(b"\xff\x03\xc0\x21"), Instant::now())?;
//! assert_eq!(session.get_stats().xmit_packets, 1);
//! # Ok::<(), pptpgre::Error>(())
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Maximum number of packets in the transmit window.
pub const PPTP_XMIT_WIN: usize = 16;

/// PPTP time units per second. Timing state is kept in these units.
pub const PPTP_TIME_SCALE: i32 = 1000;

/// Lower bound of the initial round trip time estimate.
pub const PPTP_MIN_RTT: i32 = PPTP_TIME_SCALE / 10;

/// Lower bound of the adaptive ack timeout.
pub const PPTP_MIN_TIMEOUT: i32 = PPTP_TIME_SCALE / 83;

/// Upper bound of the adaptive ack timeout.
pub const PPTP_MAX_TIMEOUT: i32 = 3 * PPTP_TIME_SCALE;

/// Lower bound of the delayed ack timer.
pub const PPTP_MIN_ACK_DELAY: i32 = PPTP_TIME_SCALE / 500;

/// Upper bound of the delayed ack timer.
pub const PPTP_MAX_ACK_DELAY: i32 = PPTP_TIME_SCALE / 2;

/// Scheduling tick added to the receive ack timer so that it never fires
/// before the deadline.
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// Result type for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration of a tunnel session.
///
/// Applying a configuration always resets the session's sequence and timing
/// state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Whether the session accepts and emits frames.
    pub enabled: bool,

    /// Call id expected on received frames.
    pub local_call_id: u16,

    /// Call id stamped on sent frames.
    pub peer_call_id: u16,

    /// Peer packet processing delay in tenths of a second, used to seed the
    /// round trip time estimate.
    pub peer_ppd: u16,

    /// Receive window advertised by the peer, used to seed the transmit
    /// window.
    pub recv_window: u16,

    /// Bound the number of unacknowledged data packets and adapt timing
    /// from their round trip times.
    pub enable_windowing: bool,

    /// Put an acknowledgment on every outgoing frame.
    pub enable_always_ack: bool,

    /// Hold acknowledgments back for a short while so they can piggyback on
    /// outgoing data.
    pub enable_delayed_ack: bool,
}

impl TunnelConfig {
    /// Check the configuration before it is applied.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.enable_windowing && self.recv_window == 0 {
            return Err(Error::InvalidConfig(
                "windowing requires a non-zero receive window".into(),
            ));
        }
        Ok(())
    }
}

/// Statistics about a tunnel session.
///
/// Counters only ever grow, saturating at `u64::MAX`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// The number of frames sent.
    pub xmit_packets: u64,

    /// The number of bytes sent, GRE headers included.
    pub xmit_octets: u64,

    /// The number of frames sent carrying only an acknowledgment.
    pub xmit_lone_acks: u64,

    /// The number of data packets refused because the window was full.
    pub xmit_drops: u64,

    /// The number of data packets refused because they were too large.
    pub xmit_too_big: u64,

    /// The number of data frames delivered.
    pub recv_packets: u64,

    /// The number of payload bytes delivered.
    pub recv_octets: u64,

    /// The number of frames too short for their header.
    pub recv_runts: u64,

    /// The number of frames with invalid GRE bits or payload length.
    pub recv_bad_gre: u64,

    /// The number of acknowledgments for packets never sent.
    pub recv_bad_acks: u64,

    /// The number of frames for an unknown or disabled call id.
    pub recv_bad_cid: u64,

    /// The number of data frames older than the last one received.
    pub recv_out_of_order: u64,

    /// The number of data frames repeating the last one received.
    pub recv_duplicates: u64,

    /// The number of acknowledgments that were already seen.
    pub recv_stale_acks: u64,

    /// The number of frames carrying only an acknowledgment.
    pub recv_lone_acks: u64,

    /// The number of times an acknowledgment was overdue.
    pub recv_ack_timeouts: u64,
}

/// Increase a statistics counter by `n`.
pub(crate) fn stat_add(counter: &mut u64, n: u64) {
    *counter = counter.saturating_add(n);
}

/// The LowerLayer carries encoded frames towards the peer, usually over a
/// raw IP socket with protocol number 47.
///
/// No ordering or delivery guarantee is expected from it.
pub trait LowerLayer: Send + Sync {
    /// Called for every frame the session emits.
    fn send_raw(&self, buf: &[u8]) -> Result<()>;
}

/// The UpperLayer receives payloads decapsulated by a [`Node`], usually to
/// feed them into PPP processing.
pub trait UpperLayer: Send + Sync {
    /// Called once for every accepted data frame.
    fn deliver_payload(&self, call_id: u16, buf: &[u8]);
}


pub use crate::error::Error;
pub use crate::gre::GreHeader;
pub use crate::node::Node;
pub use crate::session::Session;
pub use crate::session::SessionState;

#[path = "session/session.rs"]
pub mod session;

mod codec;
pub mod error;
pub mod gre;
pub mod node;
#[doc(hidden)]
pub mod timer_queue;
pub mod window;
