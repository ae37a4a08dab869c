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

use bytes::Buf;
use bytes::BufMut;

use crate::error::Error;
use crate::Result;

/// Encoder for GRE header words, in network byte order.
pub trait Encoder {
    /// Write an unsigned 16 bit integer to self.
    fn write_u16(&mut self, n: u16) -> Result<usize>;

    /// Write an unsigned 32 bit integer to self.
    fn write_u32(&mut self, n: u32) -> Result<usize>;
}

/// Decoder for GRE header words, in network byte order.
pub trait Decoder {
    /// Read an unsigned 16 bit integer from self.
    fn read_u16(&mut self) -> Result<u16>;

    /// Read an unsigned 32 bit integer from self.
    fn read_u32(&mut self) -> Result<u32>;
}

impl Encoder for &mut [u8] {
    fn write_u16(&mut self, n: u16) -> Result<usize> {
        if self.remaining_mut() < 2 {
            return Err(Error::BufferTooShort);
        }
        self.put_u16(n);
        Ok(2)
    }

    fn write_u32(&mut self, n: u32) -> Result<usize> {
        if self.remaining_mut() < 4 {
            return Err(Error::BufferTooShort);
        }
        self.put_u32(n);
        Ok(4)
    }
}

impl Decoder for &[u8] {
    fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(Error::BufferTooShort);
        }
        Ok(self.get_u16())
    }

    fn read_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::BufferTooShort);
        }
        Ok(self.get_u32())
    }
}
