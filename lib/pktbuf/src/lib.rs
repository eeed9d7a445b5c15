// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet buffer core.
//!
//! A [`engine::packet::Packet`] is a cheaply clonable handle onto a
//! byte buffer with headroom and tailroom reserved around the valid
//! data. Handles share their storage until someone needs to write to
//! it, at which point the writer obtains a
//! [`engine::packet::WritablePacket`] through
//! [`engine::packet::Packet::uniqueify()`] (or one of the resizing
//! operations), copying the buffer only if another handle can still
//! observe it.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

#[macro_use]
extern crate cfg_if;

// This is needed so that the kstat-macro (`#[derive(KStatProvider)]`)
// can use fully-qualified type paths.
extern crate self as pktbuf;

pub mod ddi;
pub mod engine;
pub mod provider;

pub use engine::packet::Packet;
pub use engine::packet::WritablePacket;
