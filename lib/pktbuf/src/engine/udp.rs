// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! UDP headers.
use super::ReadErr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const UDP_HDR_SZ: usize = core::mem::size_of::<UdpHdrRaw>();

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub length: [u8; 2],
    pub csum: [u8; 2],
}

#[derive(Clone, Copy, Debug)]
pub struct UdpHdr<'a> {
    raw: &'a UdpHdrRaw,
}

impl<'a> UdpHdr<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ReadErr> {
        Ok(Self { raw: super::read_hdr(bytes)? })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.raw.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.raw.dst_port)
    }

    /// The length of the header plus payload, per the header.
    pub fn len(&self) -> u16 {
        u16::from_be_bytes(self.raw.length)
    }

    pub fn csum(&self) -> [u8; 2] {
        self.raw.csum
    }

    /// A zero checksum means the sender did not compute one.
    pub fn csum_present(&self) -> bool {
        self.raw.csum != [0, 0]
    }
}
