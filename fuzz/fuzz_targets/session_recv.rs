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

#![no_main]

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use lazy_static::lazy_static;
use libfuzzer_sys::fuzz_target;

use pptpgre::LowerLayer;
use pptpgre::Session;
use pptpgre::TunnelConfig;

struct Discard;

impl LowerLayer for Discard {
    fn send_raw(&self, _buf: &[u8]) -> pptpgre::Result<()> {
        Ok(())
    }
}

lazy_static! {
    static ref LINK: Arc<Discard> = Arc::new(Discard);
}

fuzz_target!(|data: &[u8]| {
    let now = Instant::now();
    let _ = pptpgre::gre::decode(data, 1);

    let conf = TunnelConfig {
        enabled: true,
        local_call_id: 1,
        peer_call_id: 2,
        peer_ppd: 1,
        recv_window: 16,
        enable_windowing: true,
        enable_always_ack: false,
        enable_delayed_ack: false,
    };
    let mut session = Session::with_config(conf, LINK.clone()).unwrap();
    session.send(Some(b"fuzz"), now).unwrap();

    // The input may hold several frames, each prefixed by its length.
    let mut rest = data;
    while rest.len() >= 2 {
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let end = std::cmp::min(2 + len, rest.len());
        let frame = Bytes::copy_from_slice(&rest[2..end]);
        session.recv(frame, now).ok();
        rest = &rest[end..];
    }
    session.on_timeout(now);
});
