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

//! Enhanced GRE header used by PPTP.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|R|K|S|s|Recur|A| Flags | Ver |         Protocol Type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Key (Payload Length)       |       Key (Call ID)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Sequence Number (Optional)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               Acknowledgment Number (Optional)                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! See RFC 2637 Section 4.1

use core::ops::Range;

use bytes::Bytes;
use bytes::BytesMut;

use crate::codec::Decoder;
use crate::codec::Encoder;
use crate::Error;
use crate::Result;

/// The GRE protocol type carried by PPTP (PPP).
pub const PPTP_GRE_PROTO: u16 = 0x880b;

/// The first header word with every fixed field set and both optional
/// fields absent: key present, version 1, protocol PPP.
pub const PPTP_INIT_VALUE: u32 = 0x2001_880b;

/// Bits of the first header word that must match `PPTP_INIT_VALUE`. Only
/// the sequence and acknowledgment presence bits may vary.
pub const PPTP_INIT_MASK: u32 = 0xef7f_ffff;

/// Sequence number present (S) bit of the first header word.
const GRE_HAS_SEQ: u32 = 0x1000_0000;

/// Acknowledgment number present (A) bit of the first header word.
const GRE_HAS_ACK: u32 = 0x0080_0000;

/// Length of the mandatory part of the header.
pub const GRE_FIXED_HEADER_LEN: usize = 8;

/// Length of the header carrying both sequence and acknowledgment numbers.
pub const GRE_MAX_HEADER_LEN: usize = GRE_FIXED_HEADER_LEN + 8;

/// The largest payload that fits the 16 bit IP total length together with
/// the largest GRE header.
pub const PPTP_MAX_PAYLOAD: usize = 0xffff - GRE_MAX_HEADER_LEN;

/// PPTP enhanced GRE header.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct GreHeader {
    /// Length of the payload following the header, zero for a lone ack.
    pub length: u16,

    /// Call id of the tunnel the frame belongs to.
    pub call_id: u16,

    /// Sequence number, present on frames carrying data.
    pub seq: Option<u32>,

    /// Acknowledgment number, the highest sequence number received.
    pub ack: Option<u32>,
}

impl GreHeader {
    /// Return the encoded length of the header.
    pub fn wire_len(&self) -> usize {
        GRE_FIXED_HEADER_LEN + 4 * self.seq.is_some() as usize + 4 * self.ack.is_some() as usize
    }

    /// Encode the header to the given buffer.
    pub fn to_bytes(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.wire_len() {
            return Err(Error::BufferTooShort);
        }
        let len = buf.len();

        let mut first = PPTP_INIT_VALUE;
        if self.seq.is_some() {
            first |= GRE_HAS_SEQ;
        }
        if self.ack.is_some() {
            first |= GRE_HAS_ACK;
        }
        buf.write_u32(first)?;
        buf.write_u16(self.length)?;
        buf.write_u16(self.call_id)?;

        // The acknowledgment number follows the sequence number.
        if let Some(seq) = self.seq {
            buf.write_u32(seq)?;
        }
        if let Some(ack) = self.ack {
            buf.write_u32(ack)?;
        }

        Ok(len - buf.len())
    }

    /// Decode the header from the given buffer and return it together with
    /// the length of the header.
    ///
    /// Only the fixed bits are validated here; the call id and the payload
    /// length are left to the caller.
    pub fn from_bytes(mut buf: &[u8]) -> Result<(GreHeader, usize)> {
        let len = buf.len();
        if len < GRE_FIXED_HEADER_LEN {
            return Err(Error::Truncated);
        }

        let first = buf.read_u32()?;
        if first & PPTP_INIT_MASK != PPTP_INIT_VALUE {
            return Err(Error::BadGreBits);
        }
        let length = buf.read_u16()?;
        let call_id = buf.read_u16()?;

        let seq = if first & GRE_HAS_SEQ != 0 {
            Some(buf.read_u32().map_err(|_| Error::Truncated)?)
        } else {
            None
        };
        let ack = if first & GRE_HAS_ACK != 0 {
            Some(buf.read_u32().map_err(|_| Error::Truncated)?)
        } else {
            None
        };

        Ok((
            GreHeader {
                length,
                call_id,
                seq,
                ack,
            },
            len - buf.len(),
        ))
    }

    /// Return the payload range inside a frame of `frame_len` bytes whose
    /// header is `hdr_len` bytes long. Bytes past the declared length are
    /// ignored.
    pub fn payload_range(&self, hdr_len: usize, frame_len: usize) -> Result<Range<usize>> {
        let end = hdr_len + self.length as usize;
        if end > frame_len {
            return Err(Error::Truncated);
        }
        Ok(hdr_len..end)
    }
}

impl std::fmt::Debug for GreHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "cid={:04x} len={}", self.call_id, self.length)?;
        if let Some(seq) = self.seq {
            write!(f, " seq={}", seq)?;
        }
        if let Some(ack) = self.ack {
            write!(f, " ack={}", ack)?;
        }
        Ok(())
    }
}

/// A validated header and the location of its payload inside the frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedHeader {
    /// The decoded header.
    pub header: GreHeader,

    /// Payload bytes inside the frame.
    pub payload: Range<usize>,
}

/// Build a complete frame for the given call id, optional sequence and
/// acknowledgment numbers, and payload. An empty payload yields a lone ack.
pub fn encode(call_id: u16, seq: Option<u32>, ack: Option<u32>, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > PPTP_MAX_PAYLOAD {
        return Err(Error::TooBig);
    }

    let hdr = GreHeader {
        length: payload.len() as u16,
        call_id,
        seq,
        ack,
    };
    let mut out = BytesMut::zeroed(hdr.wire_len() + payload.len());
    let hdr_len = hdr.to_bytes(&mut out[..])?;
    out[hdr_len..].copy_from_slice(payload);

    Ok(out.freeze())
}

/// Decode and validate a frame addressed to `local_call_id`.
///
/// Validation order follows the receive path: runt frames, fixed GRE bits,
/// call id, then the declared payload length.
pub fn decode(buf: &[u8], local_call_id: u16) -> Result<ParsedHeader> {
    let (header, hdr_len) = GreHeader::from_bytes(buf)?;
    if header.call_id != local_call_id {
        return Err(Error::BadCallId);
    }
    let payload = header.payload_range(hdr_len, buf.len())?;

    Ok(ParsedHeader { header, payload })
}
