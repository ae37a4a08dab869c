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

//! Many tunnel sessions sharing one lower layer.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use log::*;
use rustc_hash::FxHashMap;

use crate::gre::GreHeader;
use crate::stat_add;
use crate::timer_queue::TimerQueue;
use crate::Error;
use crate::LowerLayer;
use crate::Result;
use crate::Session;
use crate::Stats;
use crate::TunnelConfig;
use crate::UpperLayer;

/// A node demultiplexes received frames to sessions by call id and keeps
/// track of the next deadline of every session.
pub struct Node {
    /// Sessions keyed by local call id.
    sessions: FxHashMap<u16, Session>,

    /// Next deadline of each session with an armed timer.
    timers: TimerQueue,

    /// Shared by all sessions for sending frames.
    lower: Arc<dyn LowerLayer>,

    /// Receives the payloads of all sessions.
    upper: Arc<dyn UpperLayer>,

    /// Frames dropped before reaching any session.
    stats: Stats,
}

impl Node {
    pub fn new(lower: Arc<dyn LowerLayer>, upper: Arc<dyn UpperLayer>) -> Self {
        Node {
            sessions: FxHashMap::default(),
            timers: TimerQueue::new(),
            lower,
            upper,
            stats: Stats::default(),
        }
    }

    /// Create a node with room for `capacity` sessions.
    pub fn with_capacity(
        lower: Arc<dyn LowerLayer>,
        upper: Arc<dyn UpperLayer>,
        capacity: usize,
    ) -> Self {
        Node {
            sessions: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            timers: TimerQueue::with_capacity(capacity),
            lower,
            upper,
            stats: Stats::default(),
        }
    }

    /// Create a session for the given configuration.
    pub fn add_session(&mut self, conf: TunnelConfig) -> Result<()> {
        let cid = conf.local_call_id;
        if self.sessions.contains_key(&cid) {
            return Err(Error::DuplicateCallId(cid));
        }

        let session = Session::with_config(conf, self.lower.clone())?;
        info!("{} added, {} sessions", session.trace_id(), self.sessions.len() + 1);
        self.sessions.insert(cid, session);
        Ok(())
    }

    /// Apply a new configuration to an existing session. The session is
    /// fully reset.
    pub fn reconfigure(&mut self, conf: TunnelConfig) -> Result<()> {
        let cid = conf.local_call_id;
        let session = self
            .sessions
            .get_mut(&cid)
            .ok_or(Error::UnknownCallId(cid))?;
        session.configure(conf)?;
        self.refresh_timer(cid);
        Ok(())
    }

    /// Tear a session down and return its final statistics.
    pub fn remove_session(&mut self, cid: u16) -> Result<Stats> {
        let mut session = self
            .sessions
            .remove(&cid)
            .ok_or(Error::UnknownCallId(cid))?;
        session.close();
        self.timers.del(&cid);
        info!("{} removed, {} sessions", session.trace_id(), self.sessions.len());
        Ok(session.get_stats())
    }

    /// Tear all sessions down. Node statistics are kept.
    pub fn clear(&mut self) {
        for session in self.sessions.values_mut() {
            session.close();
        }
        self.sessions.clear();
        self.timers.clear();
        info!("all sessions removed");
    }

    /// Get a reference to a session.
    pub fn session(&self, cid: u16) -> Option<&Session> {
        self.sessions.get(&cid)
    }

    /// Return the statistics of a session.
    pub fn session_stats(&self, cid: u16) -> Option<Stats> {
        self.sessions.get(&cid).map(|s| s.get_stats())
    }

    /// Reset the statistics of a session.
    pub fn clear_session_stats(&mut self, cid: u16) -> Result<()> {
        self.sessions
            .get_mut(&cid)
            .ok_or(Error::UnknownCallId(cid))?
            .clear_stats();
        Ok(())
    }

    /// Return the statistics of a session and reset them.
    pub fn get_and_clear_session_stats(&mut self, cid: u16) -> Result<Stats> {
        let session = self
            .sessions
            .get_mut(&cid)
            .ok_or(Error::UnknownCallId(cid))?;
        Ok(session.get_and_clear_stats())
    }

    /// Return the statistics of frames that matched no session.
    pub fn node_stats(&self) -> Stats {
        self.stats
    }

    /// Reset the statistics of frames that matched no session.
    pub fn clear_node_stats(&mut self) {
        self.stats = Stats::default();
    }

    /// Return the statistics of frames that matched no session and reset
    /// them.
    pub fn get_and_clear_node_stats(&mut self) -> Stats {
        std::mem::take(&mut self.stats)
    }

    /// Return the number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Return whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Send a payload, or a lone ack if `payload` is `None`, on a session.
    pub fn send(&mut self, cid: u16, payload: Option<&[u8]>, now: Instant) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&cid)
            .ok_or(Error::UnknownCallId(cid))?;
        let ret = session.send(payload, now);
        self.refresh_timer(cid);
        ret
    }

    /// Process a frame received from the lower layer.
    ///
    /// Payloads are handed to the upper layer. Malformed frames and frames
    /// for unknown calls are counted and dropped, never reported as errors.
    pub fn recv(&mut self, frame: Bytes, now: Instant) -> Result<()> {
        let cid = match GreHeader::from_bytes(&frame) {
            Ok((hdr, _)) => hdr.call_id,
            Err(e) => {
                match e {
                    Error::Truncated => stat_add(&mut self.stats.recv_runts, 1),
                    _ => stat_add(&mut self.stats.recv_bad_gre, 1),
                }
                debug!("drop frame of {} bytes: {:?}", frame.len(), e);
                return Ok(());
            }
        };

        let session = match self.sessions.get_mut(&cid) {
            Some(session) if session.is_active() => session,
            _ => {
                stat_add(&mut self.stats.recv_bad_cid, 1);
                debug!("drop frame for unknown call {:04x}", cid);
                return Ok(());
            }
        };

        match session.recv(frame, now) {
            Ok(Some(payload)) => self.upper.deliver_payload(cid, &payload),
            Ok(None) => (),
            Err(e) => trace!("{} frame dropped: {:?}", session.trace_id(), e),
        }
        self.refresh_timer(cid);
        Ok(())
    }

    /// Return the amount of time until the earliest session deadline.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.timers.time_remaining(now)
    }

    /// Fire the expired timers of all sessions, earliest deadline first.
    pub fn on_timeout(&mut self, now: Instant) {
        while let Some(cid) = self.timers.next_expire(now) {
            if let Some(session) = self.sessions.get_mut(&cid) {
                session.on_timeout(now);
            }
            self.refresh_timer(cid);
        }
    }

    /// Sync the queued deadline of a session with its timers.
    fn refresh_timer(&mut self, cid: u16) {
        match self.sessions.get(&cid).and_then(|s| s.next_timeout()) {
            Some(time) => self.timers.add(cid, time),
            None => self.timers.del(&cid),
        }
    }
}
