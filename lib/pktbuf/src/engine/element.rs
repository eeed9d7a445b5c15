// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The contract between pipeline stages.
//!
//! An [`Element`] consumes packets on its single input, emits the
//! packets it keeps on output 0, and may route others to additional
//! outputs. Outputs beyond the first are [`PacketSink`]s attached when
//! the element is built. Every element also exposes a set of named,
//! read-only handlers for introspection; these may be read at any
//! time, concurrently with packet processing.
use super::packet::Packet;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;

/// Somewhere to push packets: the downstream side of an output port.
pub trait PacketSink: Send + Sync {
    fn push(&self, pkt: Packet);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandlerError {
    UnknownHandler(String),
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownHandler(name) => write!(f, "no handler named {name}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HandlerError {}

pub trait Element: Send + Sync {
    /// The element's class, e.g. `CheckTCPHeader`.
    fn class_name(&self) -> &'static str;

    /// The number of output ports in use.
    fn noutputs(&self) -> usize;

    /// Process one packet. Returning `Some` forwards the packet on
    /// output 0; `None` means the element disposed of it, either by
    /// sending it to another output or by releasing it.
    fn simple_action(&self, pkt: Packet) -> Option<Packet>;

    /// The names of the read handlers this element currently exposes.
    fn handlers(&self) -> &[&'static str];

    fn read_handler(&self, name: &str) -> Result<String, HandlerError>;
}
