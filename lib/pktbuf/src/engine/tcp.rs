// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP headers.
use super::ReadErr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const TCP_HDR_OFFSET_MASK: u8 = 0xF0;
pub const TCP_HDR_OFFSET_SHIFT: u8 = 4;

/// The minimum (option-less) TCP header size.
pub const TCP_HDR_SZ: usize = core::mem::size_of::<TcpHdrRaw>();

/// The fixed portion of a TCP header, as laid out on the wire.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub win: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

/// A read-only view of a TCP header sitting in packet memory.
#[derive(Clone, Copy, Debug)]
pub struct TcpHdr<'a> {
    raw: &'a TcpHdrRaw,
}

impl<'a> TcpHdr<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ReadErr> {
        Ok(Self { raw: super::read_hdr(bytes)? })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.raw.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.raw.dst_port)
    }

    /// The data offset: the header length in bytes, including
    /// options.
    pub fn hdr_len(&self) -> usize {
        usize::from((self.raw.offset & TCP_HDR_OFFSET_MASK) >> TCP_HDR_OFFSET_SHIFT)
            << 2
    }

    pub fn flags(&self) -> u8 {
        self.raw.flags
    }

    pub fn csum(&self) -> [u8; 2] {
        self.raw.csum
    }
}
