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

//! Error type for PPTP/GRE tunnel operations.

use strum_macros::EnumIter;

/// PPTP/GRE tunnel error.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Error {
    /* Note: malformed input, the frame is dropped */
    /// The fixed GRE header bits do not describe a PPTP enhanced GRE frame.
    BadGreBits,

    /// The frame carries a call id that does not belong to this tunnel.
    BadCallId,

    /// The frame is shorter than its header or its declared payload length.
    Truncated,

    /* Note: protocol anomalies, counted and ignored */
    /// The peer acknowledged a sequence number that was never sent.
    FutureAck,

    /* Note: send path conditions */
    /// The transmit window is full. The caller should retry once the peer
    /// acknowledges outstanding packets.
    Backpressure,

    /// The payload does not fit into a single GRE frame.
    TooBig,

    /// The session has not been configured and enabled.
    NotConfigured,

    /// The provided buffer is too short.
    BufferTooShort,

    /// The configuration is invalid.
    InvalidConfig(String),

    /// A session with the given local call id already exists.
    DuplicateCallId(u16),

    /// No session with the given local call id exists.
    UnknownCallId(u16),

    /// I/O error reported by the lower layer.
    IoError(String),
}

impl Error {
    /// Return the error number using by the C caller.
    pub fn to_errno(&self) -> libc::ssize_t {
        let errno = match self {
            Error::BadGreBits => libc::EPROTO,
            Error::BadCallId => libc::EPROTO,
            Error::Truncated => libc::EBADMSG,
            Error::FutureAck => libc::EPROTO,
            Error::Backpressure => libc::ENOBUFS,
            Error::TooBig => libc::EMSGSIZE,
            Error::NotConfigured => libc::ENXIO,
            Error::BufferTooShort => libc::ENOSPC,
            Error::InvalidConfig(_) => libc::EINVAL,
            Error::DuplicateCallId(_) => libc::EISCONN,
            Error::UnknownCallId(_) => libc::ENOTCONN,
            Error::IoError(_) => libc::EIO,
        };
        -(errno as libc::ssize_t)
    }

    /// Whether the error only means the offending frame was dropped.
    pub fn is_dropped_frame(&self) -> bool {
        matches!(self, Error::BadGreBits | Error::BadCallId | Error::Truncated)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}
