// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! UDP header checks.
use crate::check::CheckHeader;
use crate::check::DropReason;
use crate::check::L4Check;
use pktbuf::engine::ip4::Ipv4Hdr;
use pktbuf::engine::ip4::Protocol;
use pktbuf::engine::udp::UDP_HDR_SZ;
use pktbuf::engine::udp::UdpHdr;

/// Validates the UDP header of IPv4 packets: the UDP length field and,
/// when the sender supplied one, the checksum.
pub struct Udp;

pub type CheckUdpHeader = CheckHeader<Udp>;

impl L4Check for Udp {
    const CLASS_NAME: &'static str = "CheckUDPHeader";
    const PROTO: Protocol = Protocol::UDP;
    const REASON_TEXTS: [&'static str; 3] =
        ["not UDP", "bad packet length", "bad UDP checksum"];

    fn check(ip: &Ipv4Hdr, l4: &[u8], checksum: bool) -> Result<(), DropReason> {
        let udp = UdpHdr::parse(l4).map_err(|_| DropReason::BadLength)?;
        let len = usize::from(udp.len());

        if len < UDP_HDR_SZ || len > l4.len() {
            return Err(DropReason::BadLength);
        }

        // A zero checksum means none was sent.
        if udp.csum_present() && checksum {
            let mut csum = ip.pseudo_csum(udp.len());
            csum.add_bytes(&l4[..len]);
            if !csum.is_valid() {
                return Err(DropReason::BadChecksum);
            }
        }

        Ok(())
    }
}
