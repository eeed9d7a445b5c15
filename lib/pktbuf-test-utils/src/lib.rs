// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for unit tests, integration tests, and benches.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod log;
pub mod pkt;

// Let's make our lives easier and pub use a bunch of stuff.
pub use pktbuf::Packet;
pub use pktbuf::WritablePacket;
pub use pktbuf::engine::element::Element;
pub use pktbuf::engine::element::PacketSink;
pub use pktbuf::provider::ExecCtx;
pub use pktbuf::provider::LogLevel;
pub use std::net::Ipv4Addr;

pub use log::RecordLog;
pub use log::test_logger;
pub use pkt::*;

use std::sync::Arc;
use std::sync::Mutex;

/// A [`PacketSink`] that queues everything pushed to it.
#[derive(Clone, Default)]
pub struct SinkQueue {
    pkts: Arc<Mutex<Vec<Packet>>>,
}

impl SinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pkts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every queued packet.
    pub fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.pkts.lock().unwrap())
    }
}

impl PacketSink for SinkQueue {
    fn push(&self, pkt: Packet) {
        self.pkts.lock().unwrap().push(pkt);
    }
}

/// An execution context logging to a fresh [`RecordLog`], which is
/// returned alongside it for inspection.
pub fn record_ctx() -> (Arc<ExecCtx>, RecordLog) {
    let log = RecordLog::new();
    (Arc::new(ExecCtx::new(Box::new(log.clone()))), log)
}
