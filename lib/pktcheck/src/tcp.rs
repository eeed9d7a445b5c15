// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP header checks.
use crate::check::CheckHeader;
use crate::check::DropReason;
use crate::check::L4Check;
use pktbuf::engine::ip4::Ipv4Hdr;
use pktbuf::engine::ip4::Protocol;
use pktbuf::engine::tcp::TCP_HDR_SZ;
use pktbuf::engine::tcp::TcpHdr;

/// Validates the TCP header of IPv4 packets: the segment length implied
/// by the IP header, the TCP data offset, and (optionally) the checksum.
pub struct Tcp;

pub type CheckTcpHeader = CheckHeader<Tcp>;

impl L4Check for Tcp {
    const CLASS_NAME: &'static str = "CheckTCPHeader";
    const PROTO: Protocol = Protocol::TCP;
    const REASON_TEXTS: [&'static str; 3] =
        ["not TCP", "bad packet length", "bad TCP checksum"];

    fn check(ip: &Ipv4Hdr, l4: &[u8], checksum: bool) -> Result<(), DropReason> {
        // The segment length as claimed by the IP header.
        let len = usize::from(ip.total_len())
            .checked_sub(ip.hdr_len())
            .ok_or(DropReason::BadLength)?;
        let tcp = TcpHdr::parse(l4).map_err(|_| DropReason::BadLength)?;
        let tcp_hdr_len = tcp.hdr_len();

        if tcp_hdr_len < TCP_HDR_SZ || len < tcp_hdr_len || len > l4.len() {
            return Err(DropReason::BadLength);
        }

        if checksum {
            // `len` is bounded by the 16-bit IP total length.
            let mut csum = ip.pseudo_csum(len as u16);
            csum.add_bytes(&l4[..len]);
            if !csum.is_valid() {
                return Err(DropReason::BadChecksum);
            }
        }

        Ok(())
    }
}
