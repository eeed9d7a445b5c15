// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet builders.
//!
//! Transport headers and their checksums are produced by smoltcp so
//! that the checksum code under test is checked against an independent
//! implementation.
use pktbuf::Packet;
use pktbuf::engine::checksum::Checksum;
use pktbuf::engine::checksum::HeaderChecksum;
use pktbuf::engine::ip4::IPV4_HDR_SZ;
use pktbuf::engine::ip4::Ipv4HdrRaw;
use pktbuf::engine::ip4::PROTO_TCP;
use pktbuf::engine::ip4::PROTO_UDP;
use smoltcp::wire::EthernetAddress;
use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetProtocol;
use smoltcp::wire::IpAddress;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::TcpSeqNumber;
use smoltcp::wire::UdpPacket;
use std::net::Ipv4Addr;
use zerocopy::IntoBytes;

pub const ETH_HDR_SZ: usize = 14;
pub const TCP_HDR_SZ: usize = 20;
pub const UDP_HDR_SZ: usize = 8;

// Byte offsets of interesting fields within the IPv4 header.
pub const IP_PROTO_OFF: usize = 9;
pub const IP_TOTAL_LEN_OFF: usize = 2;

// Byte offsets within the transport headers.
pub const TCP_OFFSET_OFF: usize = 12;
pub const UDP_LEN_OFF: usize = 4;
pub const UDP_CSUM_OFF: usize = 6;

pub const GUEST_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0xF7, 0x00, 0x01];
pub const GW_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0xF7, 0x00, 0xFE];

/// The addressing of a test packet.
#[derive(Clone, Copy, Debug)]
pub struct Flow4 {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
}

impl Default for Flow4 {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::new(10, 0, 0, 5),
            dst: Ipv4Addr::new(52, 10, 128, 69),
            sport: 44490,
            dport: 443,
        }
    }
}

impl Flow4 {
    fn smol_src(&self) -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::from_bytes(&self.src.octets()))
    }

    fn smol_dst(&self) -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::from_bytes(&self.dst.octets()))
    }
}

/// Build an option-less IPv4 header with a valid header checksum.
pub fn ip4_hdr(flow: &Flow4, proto: u8, payload_len: usize) -> Vec<u8> {
    let total_len = u16::try_from(IPV4_HDR_SZ + payload_len)
        .expect("IPv4 datagram too large");
    let mut raw = Ipv4HdrRaw {
        ver_hdr_len: 0x45,
        dscp_ecn: 0,
        total_len: total_len.to_be_bytes(),
        ident: [0x00, 0x01],
        frag_and_flags: [0x40, 0x00],
        ttl: 64,
        proto,
        csum: [0; 2],
        src: flow.src.octets(),
        dst: flow.dst.octets(),
    };
    raw.csum = HeaderChecksum::from(Checksum::compute(raw.as_bytes())).bytes();
    raw.as_bytes().to_vec()
}

/// The bytes of an IPv4/TCP segment carrying `payload`.
pub fn tcp4_bytes(flow: &Flow4, payload: &[u8]) -> Vec<u8> {
    let mut seg = vec![0u8; TCP_HDR_SZ + payload.len()];
    let mut tcp = TcpPacket::new_unchecked(&mut seg[..]);
    tcp.set_src_port(flow.sport);
    tcp.set_dst_port(flow.dport);
    tcp.set_seq_number(TcpSeqNumber(4224));
    tcp.set_ack_number(TcpSeqNumber(8448));
    tcp.set_header_len(TCP_HDR_SZ as u8);
    tcp.set_ack(true);
    tcp.set_psh(true);
    tcp.set_window_len(64240);
    tcp.payload_mut().copy_from_slice(payload);
    tcp.fill_checksum(&flow.smol_src(), &flow.smol_dst());

    let mut bytes = ip4_hdr(flow, PROTO_TCP, seg.len());
    bytes.extend_from_slice(&seg);
    bytes
}

/// The bytes of an IPv4/UDP datagram carrying `payload`.
pub fn udp4_bytes(flow: &Flow4, payload: &[u8]) -> Vec<u8> {
    let len = UDP_HDR_SZ + payload.len();
    let mut dgram = vec![0u8; len];
    let mut udp = UdpPacket::new_unchecked(&mut dgram[..]);
    udp.set_src_port(flow.sport);
    udp.set_dst_port(flow.dport);
    udp.set_len(len as u16);
    udp.payload_mut().copy_from_slice(payload);
    udp.fill_checksum(&flow.smol_src(), &flow.smol_dst());

    let mut bytes = ip4_hdr(flow, PROTO_UDP, len);
    bytes.extend_from_slice(&dgram);
    bytes
}

/// Copy an IPv4 datagram into a packet and mark its IP header.
pub fn ip4_packet(bytes: &[u8]) -> Packet {
    let mut pkt = Packet::copy(bytes).unwrap();
    let hdr_len = usize::from(bytes[0] & 0x0F) << 2;
    pkt.set_ip_header(0, hdr_len).unwrap();
    pkt.into()
}

pub fn tcp4_packet(flow: &Flow4, payload: &[u8]) -> Packet {
    ip4_packet(&tcp4_bytes(flow, payload))
}

pub fn udp4_packet(flow: &Flow4, payload: &[u8]) -> Packet {
    ip4_packet(&udp4_bytes(flow, payload))
}

/// Prepend an Ethernet header to an IPv4 packet.
pub fn eth_encap(pkt: Packet) -> Packet {
    let mut pkt = pkt.push(ETH_HDR_SZ).unwrap();
    let mut eth = EthernetFrame::new_unchecked(&mut pkt.data_mut()[..ETH_HDR_SZ]);
    eth.set_dst_addr(EthernetAddress(GW_MAC));
    eth.set_src_addr(EthernetAddress(GUEST_MAC));
    eth.set_ethertype(EthernetProtocol::Ipv4);
    pkt.into()
}

/// Apply `f` to the packet data, copying first if the packet is shared.
pub fn rewrite<F: FnOnce(&mut [u8])>(pkt: Packet, f: F) -> Packet {
    let mut pkt = pkt.uniqueify().unwrap();
    f(pkt.data_mut());
    pkt.into()
}

/// Flip a single bit of the packet data.
pub fn flip_bit(pkt: Packet, offset: usize, bit: u8) -> Packet {
    rewrite(pkt, |data| data[offset] ^= 1 << bit)
}
