// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-packet annotations.
//!
//! Annotations are metadata that travel with a packet through the
//! pipeline without being part of its bytes. The [`Anno`] block has a
//! fixed size; it is zeroed by `clear_annotations()` and copied whole
//! by `copy_annotations()`, never merged field by field.
use core::fmt;
use core::net::Ipv4Addr;
use core::net::Ipv6Addr;
use serde::Deserialize;
use serde::Serialize;

/// The space available for the annotation block.
pub const ANNO_SIZE: usize = 48;

/// Bytes of user annotation space.
pub const USER_ANNO_SIZE: usize = 12;

/// Number of 32-bit words in the user annotation space.
pub const USER_ANNO_U_SIZE: usize = USER_ANNO_SIZE / 4;

/// Number of signed 32-bit words in the user annotation space.
pub const USER_ANNO_I_SIZE: usize = USER_ANNO_SIZE / 4;

/// The destination address annotation. A packet carries either an
/// IPv4 or an IPv6 destination, never both.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DstAnno {
    #[default]
    Unset,
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

/// The fixed-size annotation block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct Anno {
    dst: DstAnno,
    user: [u8; USER_ANNO_SIZE],
    perfctr: u64,
}

const _: () = assert!(core::mem::size_of::<Anno>() <= ANNO_SIZE);

impl Anno {
    pub fn dst(&self) -> DstAnno {
        self.dst
    }

    pub fn set_dst(&mut self, dst: DstAnno) {
        self.dst = dst;
    }

    /// The IPv4 destination annotation, if one is set.
    pub fn dst_ip(&self) -> Option<Ipv4Addr> {
        match self.dst {
            DstAnno::V4(ip) => Some(ip),
            _ => None,
        }
    }

    /// The IPv6 destination annotation, if one is set.
    pub fn dst_ip6(&self) -> Option<Ipv6Addr> {
        match self.dst {
            DstAnno::V6(ip) => Some(ip),
            _ => None,
        }
    }

    /// Return user annotation byte `i`.
    ///
    /// # Panics
    ///
    /// If `i >= USER_ANNO_SIZE`.
    pub fn user_c(&self, i: usize) -> u8 {
        self.user[i]
    }

    pub fn set_user_c(&mut self, i: usize, v: u8) {
        self.user[i] = v;
    }

    /// Return user annotation word `i`, in host byte order.
    ///
    /// # Panics
    ///
    /// If `i >= USER_ANNO_U_SIZE`.
    pub fn user_u(&self, i: usize) -> u32 {
        u32::from_ne_bytes(self.word(i))
    }

    pub fn set_user_u(&mut self, i: usize, v: u32) {
        self.set_word(i, v.to_ne_bytes());
    }

    /// Return user annotation word `i` as a signed value.
    ///
    /// # Panics
    ///
    /// If `i >= USER_ANNO_I_SIZE`.
    pub fn user_i(&self, i: usize) -> i32 {
        i32::from_ne_bytes(self.word(i))
    }

    pub fn set_user_i(&mut self, i: usize, v: i32) {
        self.set_word(i, v.to_ne_bytes());
    }

    pub fn user_bytes(&self) -> &[u8; USER_ANNO_SIZE] {
        &self.user
    }

    pub fn perfctr(&self) -> u64 {
        self.perfctr
    }

    pub fn set_perfctr(&mut self, pc: u64) {
        self.perfctr = pc;
    }

    fn word(&self, i: usize) -> [u8; 4] {
        let off = i * 4;
        let mut w = [0u8; 4];
        w.copy_from_slice(&self.user[off..off + 4]);
        w
    }

    fn set_word(&mut self, i: usize, w: [u8; 4]) {
        let off = i * 4;
        self.user[off..off + 4].copy_from_slice(&w);
    }
}

/// Where a packet came from or is headed, from the point of view of
/// the receiving host. The values match the link-layer packet types
/// used by the kernel.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[repr(u8)]
pub enum PacketType {
    #[default]
    Host = 0,
    Broadcast = 1,
    Multicast = 2,
    OtherHost = 3,
    Outgoing = 4,
    Loopback = 5,
    FastRoute = 6,
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Self::Host),
            1 => Ok(Self::Broadcast),
            2 => Ok(Self::Multicast),
            3 => Ok(Self::OtherHost),
            4 => Ok(Self::Outgoing),
            5 => Ok(Self::Loopback),
            6 => Ok(Self::FastRoute),
            _ => Err(val),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(pt: PacketType) -> u8 {
        pt as u8
    }
}

/// The receive timestamp annotation.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Timestamp {
    pub secs: i64,
    pub usecs: i32,
}

impl Timestamp {
    pub const ZERO: Self = Self { secs: 0, usecs: 0 };

    pub const fn new(secs: i64, usecs: i32) -> Self {
        Self { secs, usecs }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl From<core::time::Duration> for Timestamp {
    fn from(d: core::time::Duration) -> Self {
        Self { secs: d.as_secs() as i64, usecs: d.subsec_micros() as i32 }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.usecs)
    }
}

/// Identifies the device a packet arrived on.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct DeviceId(pub u32);
