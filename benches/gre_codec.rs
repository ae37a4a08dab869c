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

use std::sync::Arc;
use std::time::Instant;

use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use pptpgre::gre;
use pptpgre::GreHeader;
use pptpgre::LowerLayer;
use pptpgre::Session;
use pptpgre::TunnelConfig;

struct Discard;

impl LowerLayer for Discard {
    fn send_raw(&self, _buf: &[u8]) -> pptpgre::Result<()> {
        Ok(())
    }
}

pub fn header_benchmark(c: &mut Criterion) {
    let hdr = GreHeader {
        length: 1400,
        call_id: 0x1234,
        seq: Some(100),
        ack: Some(99),
    };
    let mut buf = [0; gre::GRE_MAX_HEADER_LEN];
    c.bench_function("gre header encode", |b| {
        b.iter(|| hdr.to_bytes(black_box(&mut buf[..])))
    });

    c.bench_function("gre header decode", |b| {
        b.iter(|| GreHeader::from_bytes(black_box(&buf[..])))
    });
}

pub fn frame_benchmark(c: &mut Criterion) {
    let payload = vec![0x5a; 1400];
    c.bench_function("gre frame encode", |b| {
        b.iter(|| gre::encode(0x1234, Some(100), Some(99), black_box(&payload)))
    });

    let frame = gre::encode(0x1234, Some(100), Some(99), &payload).unwrap();
    c.bench_function("gre frame decode", |b| {
        b.iter(|| gre::decode(black_box(&frame), 0x1234))
    });
}

pub fn session_recv_benchmark(c: &mut Criterion) {
    let conf = TunnelConfig {
        enabled: true,
        local_call_id: 1,
        peer_call_id: 2,
        peer_ppd: 1,
        recv_window: 16,
        enable_windowing: true,
        enable_always_ack: false,
        enable_delayed_ack: true,
    };
    let mut session = Session::with_config(conf, Arc::new(Discard)).unwrap();
    let payload = vec![0x5a; 1400];
    let now = Instant::now();

    let mut seq = 0u32;
    c.bench_function("session recv", |b| {
        b.iter(|| {
            seq = seq.wrapping_add(1);
            let frame = gre::encode(1, Some(seq), None, &payload).unwrap();
            session.recv(black_box(frame), now)
        })
    });
}

criterion_group!(
    benches,
    header_benchmark,
    frame_benchmark,
    session_recv_benchmark,
);
criterion_main!(benches);
