// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 headers.
use super::ReadErr;
use super::checksum::Checksum;
use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_MASK: u8 = 0xF0;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_VERSION: u8 = 4;

/// The minimum (option-less) IPv4 header size.
pub const IPV4_HDR_SZ: usize = core::mem::size_of::<Ipv4HdrRaw>();

/// The size of an IPv6 header, for callers marking one with
/// `set_ip6_header()`.
pub const IPV6_HDR_SZ: usize = 40;

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Protocol {
    ICMP,
    TCP,
    UDP,
    Unknown(u8),
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ICMP => write!(f, "ICMP"),
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
            Self::Unknown(p) => write!(f, "Unknown({p})"),
        }
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        match proto {
            PROTO_ICMP => Self::ICMP,
            PROTO_TCP => Self::TCP,
            PROTO_UDP => Self::UDP,
            _ => Self::Unknown(proto),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => PROTO_ICMP,
            Protocol::TCP => PROTO_TCP,
            Protocol::UDP => PROTO_UDP,
            Protocol::Unknown(v) => v,
        }
    }
}

/// The fixed portion of an IPv4 header, as laid out on the wire.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

/// A read-only view of an IPv4 header sitting in packet memory.
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Hdr<'a> {
    raw: &'a Ipv4HdrRaw,
}

impl<'a> Ipv4Hdr<'a> {
    /// View the front of `bytes` as an IPv4 header. Only the fixed
    /// 20-byte portion needs to be present; options are not examined.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ReadErr> {
        Ok(Self { raw: super::read_hdr(bytes)? })
    }

    pub fn raw(&self) -> &'a Ipv4HdrRaw {
        self.raw
    }

    pub fn version(&self) -> u8 {
        (self.raw.ver_hdr_len & IPV4_HDR_VER_MASK) >> IPV4_HDR_VER_SHIFT
    }

    /// The header length in bytes, including options.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.raw.ver_hdr_len & IPV4_HDR_LEN_MASK) << 2
    }

    /// The total length of the datagram, per the header.
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.raw.total_len)
    }

    pub fn proto(&self) -> Protocol {
        Protocol::from(self.raw.proto)
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.raw.src)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.raw.dst)
    }

    /// Return the bytes of the pseudo-header used by upper-layer
    /// checksums for a segment of `ulp_len` bytes.
    pub fn pseudo_bytes(&self, ulp_len: u16) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&self.raw.src);
        bytes[4..8].copy_from_slice(&self.raw.dst);
        bytes[9] = self.raw.proto;
        bytes[10..12].copy_from_slice(&ulp_len.to_be_bytes());
        bytes
    }

    /// Return a [`Checksum`] of the pseudo header.
    pub fn pseudo_csum(&self, ulp_len: u16) -> Checksum {
        Checksum::compute(&self.pseudo_bytes(ulp_len))
    }
}
