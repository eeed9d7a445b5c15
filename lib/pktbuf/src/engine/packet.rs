// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packets and their copy-on-write protocol.
//!
//! A packet is a window `[data, tail)` onto a [`ByteBuffer`] running
//! from `head` (offset zero) to `end`:
//!
//! ```text
//!   head          data               tail           end
//!    |  headroom   |      length      |   tailroom   |
//! ```
//!
//! Storage is reference counted. [`Packet::clone()`] is O(1) and hands
//! out another handle onto the same buffer; each handle keeps its own
//! window, header offsets, and annotations. The bytes themselves may
//! only be written through a [`WritablePacket`], and the only way to
//! get one is from an operation that has just established exclusive
//! ownership of the buffer: allocation, import, or one of
//! [`Packet::uniqueify()`], [`Packet::push()`], and [`Packet::put()`],
//! which copy the buffer when another handle could observe the write.
//!
//! Releasing a packet is dropping it (or calling [`Packet::kill()`]).
//! The buffer goes back to its backend when the last handle is gone.
use super::anno::Anno;
use super::anno::DeviceId;
use super::anno::DstAnno;
use super::anno::PacketType;
use super::anno::Timestamp;
use super::buf::AllocError;
use super::buf::ByteBuffer;
use super::buf::DEFAULT_HEADROOM;
use super::buf::ExternalBuf;
use super::buf::HeapBuf;
use super::buf::MAX_BUFFER_LEN;
use super::buf::MIN_BUFFER_LENGTH;
use super::ip4::IPV6_HDR_SZ;
use alloc::sync::Arc;
use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;
use core::net::Ipv6Addr;
use core::ops::Deref;
use core::ops::DerefMut;

/// An attempt to move the data window outside the buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PktAdjustError {
    /// Attempt to pull more bytes than the packet holds.
    StartPastEnd { requested: usize, length: usize },

    /// Attempt to take more bytes than the packet holds.
    EndBeforeStart { requested: usize, length: usize },

    /// Attempt to place the end of the data past the end of the
    /// underlying buffer.
    EndPastLimit { requested: usize, limit: usize },
}

impl Display for PktAdjustError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StartPastEnd { requested, length } => {
                write!(f, "pull {requested} > length {length}")
            }

            Self::EndBeforeStart { requested, length } => {
                write!(f, "take {requested} > length {length}")
            }

            Self::EndPastLimit { requested, limit } => {
                write!(f, "{requested} bytes exceeds buffer length {limit}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PktAdjustError {}

/// An attempt to mark a header outside the packet data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HdrOffsetError {
    OutOfRange { offset: usize, len: usize, length: usize },
}

impl Display for HdrOffsetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfRange { offset, len, length } => write!(
                f,
                "header at {offset} of {len} bytes outside packet of {length} bytes"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HdrOffsetError {}

// Header positions, as offsets from the start of the buffer. They stay
// put when the data window moves, so a header may end up in the
// headroom after a pull.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct HdrOffsets {
    network: usize,
    transport: usize,
}

impl HdrOffsets {
    fn shifted(self, by: usize) -> Self {
        Self { network: self.network + by, transport: self.transport + by }
    }
}

/// The state carried by every packet handle.
///
/// This type holds everything that may be read or adjusted through any
/// handle, shared or not. It is reached through [`Packet`] and
/// [`WritablePacket`], both of which deref to it.
pub struct PacketBase {
    buf: Arc<dyn ByteBuffer>,
    data: usize,
    tail: usize,
    hdrs: Option<HdrOffsets>,
    anno: Anno,
    pkt_type: PacketType,
    timestamp: Timestamp,
    device: Option<DeviceId>,
    // Set on handles produced by `clone()`. A clone remains shared for
    // its whole life.
    cloned: bool,
}

impl PacketBase {
    fn new(buf: Arc<dyn ByteBuffer>, data: usize, tail: usize) -> Self {
        Self {
            buf,
            data,
            tail,
            hdrs: None,
            anno: Anno::default(),
            pkt_type: PacketType::Host,
            timestamp: Timestamp::ZERO,
            device: None,
            cloned: false,
        }
    }

    /// Whether the bytes may be visible through some other handle.
    ///
    /// This is true for any handle produced by `clone()`, and for the
    /// original while any of its clones are alive.
    pub fn shared(&self) -> bool {
        self.cloned || Arc::strong_count(&self.buf) > 1
    }

    /// The number of live handles addressing this packet's buffer.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.buf)
    }

    // Unlike `shared()`, this synchronizes with handles dropped on
    // other threads, so a `true` result makes it safe to write.
    fn is_exclusive(&mut self) -> bool {
        !self.cloned && Arc::get_mut(&mut self.buf).is_some()
    }

    /// The packet data.
    pub fn data(&self) -> &[u8] {
        &self.buf.bytes()[self.data..self.tail]
    }

    pub fn length(&self) -> usize {
        self.tail - self.data
    }

    pub fn headroom(&self) -> usize {
        self.data
    }

    pub fn tailroom(&self) -> usize {
        self.buffer_length() - self.tail
    }

    /// The entire underlying buffer, headroom and tailroom included.
    pub fn buffer_data(&self) -> &[u8] {
        self.buf.bytes()
    }

    pub fn buffer_length(&self) -> usize {
        self.buf.len()
    }

    /// Remove `n` bytes from the front of the packet.
    ///
    /// The bytes stay in the buffer as headroom. Pulling more than
    /// [`Self::length()`] bytes is an error and leaves the packet
    /// untouched.
    pub fn pull(&mut self, n: usize) -> Result<(), PktAdjustError> {
        if n > self.length() {
            return Err(PktAdjustError::StartPastEnd {
                requested: n,
                length: self.length(),
            });
        }

        self.data += n;
        Ok(())
    }

    /// Remove `n` bytes from the end of the packet.
    ///
    /// Taking more than [`Self::length()`] bytes is an error and leaves
    /// the packet untouched.
    pub fn take(&mut self, n: usize) -> Result<(), PktAdjustError> {
        if n > self.length() {
            return Err(PktAdjustError::EndBeforeStart {
                requested: n,
                length: self.length(),
            });
        }

        self.tail -= n;
        Ok(())
    }

    /// Reposition the data window to start `headroom` bytes into the
    /// buffer and span `length` bytes.
    ///
    /// No bytes are written, so this is permitted on shared packets.
    pub fn change_headroom_and_length(
        &mut self,
        headroom: usize,
        length: usize,
    ) -> Result<(), PktAdjustError> {
        let limit = self.buffer_length();
        match headroom.checked_add(length) {
            Some(end) if end <= limit => {
                self.data = headroom;
                self.tail = end;
                Ok(())
            }

            _ => Err(PktAdjustError::EndPastLimit {
                requested: headroom.saturating_add(length),
                limit,
            }),
        }
    }

    // ================================================================
    // Header annotations
    // ================================================================

    /// Mark a network header starting `offset` bytes into the data and
    /// spanning `len` bytes. The transport header is taken to follow
    /// it immediately.
    pub fn set_network_header(
        &mut self,
        offset: usize,
        len: usize,
    ) -> Result<(), HdrOffsetError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.length() => {
                let network = self.data + offset;
                self.hdrs =
                    Some(HdrOffsets { network, transport: network + len });
                Ok(())
            }

            _ => Err(HdrOffsetError::OutOfRange {
                offset,
                len,
                length: self.length(),
            }),
        }
    }

    /// Mark an IPv4 header of `len` bytes (options included).
    pub fn set_ip_header(
        &mut self,
        offset: usize,
        len: usize,
    ) -> Result<(), HdrOffsetError> {
        self.set_network_header(offset, len)
    }

    /// Mark an IPv6 header. Extension headers, if any, are considered
    /// part of the transport header.
    pub fn set_ip6_header(&mut self, offset: usize) -> Result<(), HdrOffsetError> {
        self.set_network_header(offset, IPV6_HDR_SZ)
    }

    /// Mark an IPv6 header of `len` bytes, counting any extension
    /// headers in `len` rather than in the transport header.
    pub fn set_ip6_header_with_len(
        &mut self,
        offset: usize,
        len: usize,
    ) -> Result<(), HdrOffsetError> {
        self.set_network_header(offset, len)
    }

    pub fn clear_network_header(&mut self) {
        self.hdrs = None;
    }

    pub fn has_network_header(&self) -> bool {
        self.hdrs.is_some()
    }

    // The bytes from `pos` to the end of the data. A header left
    // beyond the data by a `take()` sees an empty slice.
    fn from_pos(&self, pos: usize) -> &[u8] {
        &self.buf.bytes()[pos.min(self.tail)..self.tail]
    }

    /// The bytes from the start of the network header to the end of
    /// the packet data.
    pub fn network_header(&self) -> Option<&[u8]> {
        self.hdrs.map(|h| self.from_pos(h.network))
    }

    /// The bytes from the start of the transport header to the end of
    /// the packet data.
    pub fn transport_header(&self) -> Option<&[u8]> {
        self.hdrs.map(|h| self.from_pos(h.transport))
    }

    /// The network header's position relative to the start of the
    /// data; negative if the header has since been pulled.
    pub fn network_header_offset(&self) -> Option<isize> {
        self.hdrs.map(|h| h.network as isize - self.data as isize)
    }

    pub fn network_header_length(&self) -> Option<usize> {
        self.hdrs.map(|h| h.transport - h.network)
    }

    pub fn transport_header_offset(&self) -> Option<isize> {
        self.hdrs.map(|h| h.transport as isize - self.data as isize)
    }

    pub fn ip_header_offset(&self) -> Option<isize> {
        self.network_header_offset()
    }

    pub fn ip_header_length(&self) -> Option<usize> {
        self.network_header_length()
    }

    pub fn ip6_header_offset(&self) -> Option<isize> {
        self.network_header_offset()
    }

    pub fn ip6_header_length(&self) -> Option<usize> {
        self.network_header_length()
    }

    // ================================================================
    // Annotations
    // ================================================================

    pub fn anno(&self) -> &Anno {
        &self.anno
    }

    pub fn anno_mut(&mut self) -> &mut Anno {
        &mut self.anno
    }

    pub fn dst_ip_anno(&self) -> Option<Ipv4Addr> {
        self.anno.dst_ip()
    }

    pub fn set_dst_ip_anno(&mut self, ip: Ipv4Addr) {
        self.anno.set_dst(DstAnno::V4(ip));
    }

    pub fn dst_ip6_anno(&self) -> Option<Ipv6Addr> {
        self.anno.dst_ip6()
    }

    pub fn set_dst_ip6_anno(&mut self, ip: Ipv6Addr) {
        self.anno.set_dst(DstAnno::V6(ip));
    }

    pub fn user_anno_c(&self, i: usize) -> u8 {
        self.anno.user_c(i)
    }

    pub fn set_user_anno_c(&mut self, i: usize, v: u8) {
        self.anno.set_user_c(i, v);
    }

    pub fn user_anno_u(&self, i: usize) -> u32 {
        self.anno.user_u(i)
    }

    pub fn set_user_anno_u(&mut self, i: usize, v: u32) {
        self.anno.set_user_u(i, v);
    }

    pub fn user_anno_i(&self, i: usize) -> i32 {
        self.anno.user_i(i)
    }

    pub fn set_user_anno_i(&mut self, i: usize, v: i32) {
        self.anno.set_user_i(i, v);
    }

    pub fn perfctr_anno(&self) -> u64 {
        self.anno.perfctr()
    }

    pub fn set_perfctr_anno(&mut self, pc: u64) {
        self.anno.set_perfctr(pc);
    }

    pub fn packet_type_anno(&self) -> PacketType {
        self.pkt_type
    }

    pub fn set_packet_type_anno(&mut self, pt: PacketType) {
        self.pkt_type = pt;
    }

    pub fn timestamp_anno(&self) -> Timestamp {
        self.timestamp
    }

    pub fn set_timestamp_anno(&mut self, ts: Timestamp) {
        self.timestamp = ts;
    }

    pub fn device_anno(&self) -> Option<DeviceId> {
        self.device
    }

    pub fn set_device_anno(&mut self, dev: Option<DeviceId>) {
        self.device = dev;
    }

    /// Reset every annotation: the annotation block is zeroed, the
    /// packet type becomes [`PacketType::Host`], the device and
    /// timestamp are cleared, and the network header is unset.
    pub fn clear_annotations(&mut self) {
        self.anno = Anno::default();
        self.pkt_type = PacketType::Host;
        self.device = None;
        self.timestamp = Timestamp::ZERO;
        self.hdrs = None;
    }

    /// Copy the annotation block, packet type, device, and timestamp
    /// from `src`. Header offsets are left alone.
    pub fn copy_annotations(&mut self, src: &PacketBase) {
        self.anno = src.anno;
        self.pkt_type = src.pkt_type;
        self.device = src.device;
        self.timestamp = src.timestamp;
    }
}

impl fmt::Debug for PacketBase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("headroom", &self.headroom())
            .field("length", &self.length())
            .field("tailroom", &self.tailroom())
            .field("shared", &self.shared())
            .field("network_header_offset", &self.network_header_offset())
            .field("transport_header_offset", &self.transport_header_offset())
            .field("pkt_type", &self.pkt_type)
            .finish_non_exhaustive()
    }
}

/// A handle onto a packet that may share its bytes with other
/// handles.
pub struct Packet {
    base: PacketBase,
}

impl Packet {
    /// Allocate a packet of `len` zeroed bytes with
    /// [`DEFAULT_HEADROOM`] bytes of headroom.
    pub fn make(len: usize) -> Result<WritablePacket, AllocError> {
        Self::make_zeroed(DEFAULT_HEADROOM, len, 0)
    }

    /// Allocate a packet holding a copy of `bytes`, with
    /// [`DEFAULT_HEADROOM`] bytes of headroom.
    pub fn copy(bytes: &[u8]) -> Result<WritablePacket, AllocError> {
        Self::make_with(DEFAULT_HEADROOM, bytes, 0)
    }

    /// Allocate a packet holding a copy of `bytes` with at least
    /// `headroom` and `tailroom` bytes around it.
    pub fn make_with(
        headroom: usize,
        bytes: &[u8],
        tailroom: usize,
    ) -> Result<WritablePacket, AllocError> {
        let mut pkt = Self::make_zeroed(headroom, bytes.len(), tailroom)?;
        pkt.data_mut().copy_from_slice(bytes);
        Ok(pkt)
    }

    /// Allocate a packet of `len` zeroed bytes with at least `headroom`
    /// and `tailroom` bytes around it.
    ///
    /// The buffer is never smaller than [`MIN_BUFFER_LENGTH`]; any
    /// padding goes to the tailroom.
    pub fn make_zeroed(
        headroom: usize,
        len: usize,
        tailroom: usize,
    ) -> Result<WritablePacket, AllocError> {
        let requested = headroom
            .checked_add(len)
            .and_then(|n| n.checked_add(tailroom))
            .ok_or(AllocError::TooLarge {
                requested: usize::MAX,
                max: MAX_BUFFER_LEN,
            })?;
        let buf = HeapBuf::alloc(requested.max(MIN_BUFFER_LENGTH))?;
        let base = PacketBase::new(Arc::new(buf), headroom, headroom + len);
        Ok(WritablePacket { base })
    }

    /// Wrap an externally owned buffer without copying it. The whole
    /// region is packet data: there is no headroom or tailroom until
    /// the window is adjusted.
    pub fn import(buf: ExternalBuf) -> WritablePacket {
        let len = buf.len();
        WritablePacket { base: PacketBase::new(Arc::new(buf), 0, len) }
    }

    /// Return a writable packet, copying the buffer first if any other
    /// handle could observe a write.
    ///
    /// The copy has the same headroom, length, and tailroom as this
    /// packet, along with its header offsets and annotations. If the
    /// copy cannot be allocated the packet is released.
    pub fn uniqueify(mut self) -> Result<WritablePacket, AllocError> {
        if self.base.is_exclusive() {
            Ok(WritablePacket { base: self.base })
        } else {
            self.expensive_uniqueify(0, 0)
        }
    }

    /// Copy the buffer into a new exclusive one, growing the headroom
    /// by `extra_head` and the tailroom by `extra_tail` bytes.
    fn expensive_uniqueify(
        self,
        extra_head: usize,
        extra_tail: usize,
    ) -> Result<WritablePacket, AllocError> {
        let old_len = self.buffer_length();
        let new_len = extra_head
            .checked_add(old_len)
            .and_then(|n| n.checked_add(extra_tail))
            .ok_or(AllocError::TooLarge {
                requested: usize::MAX,
                max: MAX_BUFFER_LEN,
            })?;

        let mut nbuf = HeapBuf::alloc(new_len)?;
        nbuf.bytes_mut()[extra_head..extra_head + old_len]
            .copy_from_slice(self.buffer_data());

        let mut base = self.base;
        // Our reference on the old buffer goes away here.
        base.buf = Arc::new(nbuf);
        base.data += extra_head;
        base.tail += extra_head;
        base.hdrs = base.hdrs.map(|h| h.shifted(extra_head));
        base.cloned = false;
        Ok(WritablePacket { base })
    }

    // The extra room allocated when a push or put doesn't fit.
    fn growth(n: usize) -> usize {
        n.saturating_add(128) & !3
    }

    /// Prepend `n` bytes of space to the packet, returning it as
    /// writable. The new bytes are left for the caller to fill.
    ///
    /// This is O(1) when the packet is exclusive and has enough
    /// headroom. Otherwise the buffer is copied, growing the headroom
    /// if needed; should that allocation fail, the packet is released.
    pub fn push(mut self, n: usize) -> Result<WritablePacket, AllocError> {
        if self.headroom() >= n && self.base.is_exclusive() {
            let mut q = WritablePacket { base: self.base };
            q.base.data -= n;
            Ok(q)
        } else {
            self.expensive_push(n)
        }
    }

    fn expensive_push(self, n: usize) -> Result<WritablePacket, AllocError> {
        let extra = if self.headroom() >= n { 0 } else { Self::growth(n) };
        let mut q = self.expensive_uniqueify(extra, 0)?;
        q.base.data -= n;
        Ok(q)
    }

    /// Prepend `n` bytes of space without making the packet exclusive.
    ///
    /// When there is enough headroom only this handle's window moves,
    /// exposing whatever bytes were already in the headroom; the result
    /// may still be shared. Otherwise this falls back to [`Self::push()`].
    pub fn nonunique_push(mut self, n: usize) -> Result<Packet, AllocError> {
        if self.headroom() >= n {
            self.base.data -= n;
            Ok(self)
        } else {
            self.expensive_push(n).map(Packet::from)
        }
    }

    /// Append `n` bytes of space to the packet, returning it as
    /// writable. The mirror image of [`Self::push()`].
    pub fn put(mut self, n: usize) -> Result<WritablePacket, AllocError> {
        if self.tailroom() >= n && self.base.is_exclusive() {
            let mut q = WritablePacket { base: self.base };
            q.base.tail += n;
            Ok(q)
        } else {
            self.expensive_put(n)
        }
    }

    fn expensive_put(self, n: usize) -> Result<WritablePacket, AllocError> {
        let extra = if self.tailroom() >= n { 0 } else { Self::growth(n) };
        let mut q = self.expensive_uniqueify(0, extra)?;
        q.base.tail += n;
        Ok(q)
    }

    /// Append `n` bytes of space without making the packet exclusive.
    /// The mirror image of [`Self::nonunique_push()`].
    pub fn nonunique_put(mut self, n: usize) -> Result<Packet, AllocError> {
        if self.tailroom() >= n {
            self.base.tail += n;
            Ok(self)
        } else {
            self.expensive_put(n).map(Packet::from)
        }
    }

    /// Release this handle. The buffer is returned to its backend if
    /// this was the last handle onto it.
    pub fn kill(self) {
        drop(self);
    }
}

impl Clone for Packet {
    /// Create another handle onto the same bytes. Both handles report
    /// [`PacketBase::shared()`] afterwards.
    fn clone(&self) -> Self {
        let b = &self.base;
        Self {
            base: PacketBase {
                buf: Arc::clone(&b.buf),
                data: b.data,
                tail: b.tail,
                hdrs: b.hdrs,
                anno: b.anno,
                pkt_type: b.pkt_type,
                timestamp: b.timestamp,
                device: b.device,
                cloned: true,
            },
        }
    }
}

impl Deref for Packet {
    type Target = PacketBase;

    fn deref(&self) -> &PacketBase {
        &self.base
    }
}

impl DerefMut for Packet {
    fn deref_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.base.fmt(f)
    }
}

/// A packet whose bytes no other handle can observe.
///
/// There is no public constructor: a `WritablePacket` only comes out of
/// operations that have just established exclusivity. It cannot be
/// cloned; turn it back into a [`Packet`] to share it.
pub struct WritablePacket {
    base: PacketBase,
}

impl WritablePacket {
    fn bytes_mut(&mut self) -> &mut [u8] {
        Arc::get_mut(&mut self.base.buf)
            .expect("writable packet holds the only buffer reference")
            .bytes_mut()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let (data, tail) = (self.base.data, self.base.tail);
        &mut self.bytes_mut()[data..tail]
    }

    pub fn buffer_data_mut(&mut self) -> &mut [u8] {
        self.bytes_mut()
    }

    pub fn network_header_mut(&mut self) -> Option<&mut [u8]> {
        let hdrs = self.base.hdrs?;
        let tail = self.base.tail;
        Some(&mut self.bytes_mut()[hdrs.network.min(tail)..tail])
    }

    pub fn transport_header_mut(&mut self) -> Option<&mut [u8]> {
        let hdrs = self.base.hdrs?;
        let tail = self.base.tail;
        Some(&mut self.bytes_mut()[hdrs.transport.min(tail)..tail])
    }

    /// See [`Packet::push()`].
    pub fn push(self, n: usize) -> Result<WritablePacket, AllocError> {
        Packet::from(self).push(n)
    }

    /// See [`Packet::put()`].
    pub fn put(self, n: usize) -> Result<WritablePacket, AllocError> {
        Packet::from(self).put(n)
    }

    pub fn into_packet(self) -> Packet {
        Packet { base: self.base }
    }
}

impl From<WritablePacket> for Packet {
    fn from(pkt: WritablePacket) -> Self {
        pkt.into_packet()
    }
}

impl Deref for WritablePacket {
    type Target = PacketBase;

    fn deref(&self) -> &PacketBase {
        &self.base
    }
}

impl DerefMut for WritablePacket {
    fn deref_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }
}

impl fmt::Debug for WritablePacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.base.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn check_sizes(pkt: &PacketBase) {
        assert_eq!(
            pkt.headroom() + pkt.length() + pkt.tailroom(),
            pkt.buffer_length()
        );
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn make_sizes() {
        let pkt = Packet::make(10).unwrap();
        assert_eq!(pkt.headroom(), DEFAULT_HEADROOM);
        assert_eq!(pkt.length(), 10);
        assert_eq!(pkt.buffer_length(), MIN_BUFFER_LENGTH);
        assert_eq!(pkt.tailroom(), MIN_BUFFER_LENGTH - DEFAULT_HEADROOM - 10);
        assert!(pkt.data().iter().all(|b| *b == 0));
        assert!(!pkt.shared());
        assert!(!pkt.has_network_header());
        check_sizes(&pkt);

        let bytes = payload(100);
        let pkt = Packet::make_with(4, &bytes, 6).unwrap();
        assert_eq!(pkt.headroom(), 4);
        assert_eq!(pkt.tailroom(), 6);
        assert_eq!(pkt.buffer_length(), 110);
        assert_eq!(pkt.data(), &bytes[..]);
        check_sizes(&pkt);
    }

    #[test]
    fn make_too_large() {
        assert!(matches!(
            Packet::make(MAX_BUFFER_LEN),
            Err(AllocError::TooLarge { .. })
        ));
        assert!(matches!(
            Packet::make_zeroed(usize::MAX, 1, 0),
            Err(AllocError::TooLarge { .. })
        ));
    }

    #[test]
    fn clone_shares() {
        let pkt = Packet::from(Packet::copy(&payload(20)).unwrap());
        assert_eq!(pkt.use_count(), 1);
        let clone = pkt.clone();
        assert!(pkt.shared());
        assert!(clone.shared());
        assert_eq!(pkt.use_count(), 2);
        assert_eq!(pkt.buffer_data().as_ptr(), clone.buffer_data().as_ptr());

        // The original becomes exclusive again once the clone is gone,
        // but a clone never does.
        let clone2 = clone.clone();
        drop(clone);
        assert!(pkt.shared());
        drop(pkt);
        assert_eq!(clone2.use_count(), 1);
        assert!(clone2.shared());
    }

    #[test]
    fn original_unshared_after_clone_killed() {
        let pkt = Packet::from(Packet::make(8).unwrap());
        let clone = pkt.clone();
        clone.kill();
        assert!(!pkt.shared());
    }

    #[test]
    fn uniqueify_unshared_no_copy() {
        let pkt = Packet::from(Packet::copy(&payload(20)).unwrap());
        let ptr = pkt.buffer_data().as_ptr();
        let pkt = pkt.uniqueify().unwrap();
        assert_eq!(pkt.buffer_data().as_ptr(), ptr);
    }

    #[test]
    fn cow_isolation() {
        let bytes = payload(32);
        let mut pkt = Packet::from(Packet::copy(&bytes).unwrap());
        pkt.set_network_header(0, 20).unwrap();
        pkt.set_user_anno_u(0, 77);
        let clone = pkt.clone();

        let mut w = clone.uniqueify().unwrap();
        assert!(!w.shared());
        assert_ne!(w.buffer_data().as_ptr(), pkt.buffer_data().as_ptr());
        assert_eq!(w.headroom(), pkt.headroom());
        assert_eq!(w.tailroom(), pkt.tailroom());
        assert_eq!(w.network_header_offset(), Some(0));
        assert_eq!(w.transport_header_offset(), Some(20));
        assert_eq!(w.user_anno_u(0), 77);

        w.data_mut()[0] = 0xFF;
        assert_eq!(w.data()[0], 0xFF);
        assert_eq!(pkt.data(), &bytes[..]);

        // The clone released its reference when it was copied.
        assert!(!pkt.shared());
    }

    #[test]
    fn push_pull_round_trip() {
        let bytes = payload(16);
        let pkt = Packet::copy(&bytes).unwrap();
        let ptr = pkt.buffer_data().as_ptr();

        let mut pkt = pkt.push(14).unwrap();
        assert_eq!(pkt.buffer_data().as_ptr(), ptr);
        assert_eq!(pkt.headroom(), DEFAULT_HEADROOM - 14);
        assert_eq!(pkt.length(), 30);
        check_sizes(&pkt);
        pkt.data_mut()[..14].copy_from_slice(&[0xEE; 14]);

        pkt.pull(14).unwrap();
        assert_eq!(pkt.headroom(), DEFAULT_HEADROOM);
        assert_eq!(pkt.data(), &bytes[..]);
        check_sizes(&pkt);
    }

    #[test]
    fn put_take_round_trip() {
        let bytes = payload(16);
        let pkt = Packet::make_with(0, &bytes, 8).unwrap();
        let ptr = pkt.buffer_data().as_ptr();
        let tailroom = pkt.tailroom();

        let mut pkt = pkt.put(8).unwrap();
        assert_eq!(pkt.buffer_data().as_ptr(), ptr);
        assert_eq!(pkt.tailroom(), tailroom - 8);
        pkt.data_mut()[16..].copy_from_slice(&[0xAA; 8]);
        check_sizes(&pkt);

        pkt.take(8).unwrap();
        assert_eq!(pkt.tailroom(), tailroom);
        assert_eq!(pkt.data(), &bytes[..]);
    }

    #[test]
    fn expensive_push_grows_headroom() {
        let bytes = payload(10);
        let mut pkt = Packet::make_with(2, &bytes, 0).unwrap();
        pkt.set_network_header(0, 4).unwrap();
        let old_len = pkt.buffer_length();

        let pkt = pkt.push(6).unwrap();
        let extra = (6 + 128) & !3;
        assert_eq!(pkt.buffer_length(), old_len + extra);
        assert_eq!(pkt.headroom(), 2 + extra - 6);
        assert_eq!(&pkt.data()[6..], &bytes[..]);
        assert_eq!(pkt.network_header_offset(), Some(6));
        assert_eq!(pkt.network_header().unwrap(), &bytes[..]);
        check_sizes(&pkt);
    }

    #[test]
    fn expensive_put_grows_tailroom() {
        let bytes = payload(70);
        let pkt = Packet::make_with(0, &bytes, 0).unwrap();
        assert_eq!(pkt.tailroom(), 0);

        let pkt = pkt.put(300).unwrap();
        assert_eq!(pkt.length(), 370);
        assert_eq!(pkt.tailroom(), ((300 + 128) & !3) - 300);
        assert_eq!(&pkt.data()[..70], &bytes[..]);
        check_sizes(&pkt);
    }

    #[test]
    fn push_on_shared_copies() {
        let bytes = payload(12);
        let pkt = Packet::from(Packet::copy(&bytes).unwrap());
        let clone = pkt.clone();

        let mut w = clone.push(4).unwrap();
        assert_ne!(w.buffer_data().as_ptr(), pkt.buffer_data().as_ptr());
        assert_eq!(w.headroom(), DEFAULT_HEADROOM - 4);
        w.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&w.data()[4..], &bytes[..]);
        assert_eq!(pkt.headroom(), DEFAULT_HEADROOM);
        assert_eq!(pkt.data(), &bytes[..]);
    }

    #[test]
    fn nonunique_push_keeps_sharing() {
        let pkt = Packet::from(Packet::copy(&payload(12)).unwrap());
        let clone = pkt.clone();
        let ptr = pkt.buffer_data().as_ptr();

        let clone = clone.nonunique_push(8).unwrap();
        assert_eq!(clone.buffer_data().as_ptr(), ptr);
        assert!(clone.shared());
        assert_eq!(clone.length(), 20);
        assert_eq!(pkt.length(), 12);

        let clone = clone.nonunique_put(4).unwrap();
        assert_eq!(clone.buffer_data().as_ptr(), ptr);
        assert_eq!(clone.length(), 24);

        // Not enough headroom: copy.
        let clone = clone.nonunique_push(DEFAULT_HEADROOM).unwrap();
        assert_ne!(clone.buffer_data().as_ptr(), ptr);
        assert!(!clone.shared());
    }

    #[test]
    fn nonunique_put_without_tailroom_copies() {
        let bytes = payload(12);
        let pkt = Packet::from(Packet::copy(&bytes).unwrap());
        let clone = pkt.clone();
        let ptr = pkt.buffer_data().as_ptr();
        let tailroom = clone.tailroom();
        let n = tailroom + 16;

        let clone = clone.nonunique_put(n).unwrap();
        assert_ne!(clone.buffer_data().as_ptr(), ptr);
        assert!(!clone.shared());
        assert_eq!(clone.length(), bytes.len() + n);
        assert_eq!(clone.headroom(), DEFAULT_HEADROOM);
        assert_eq!(clone.tailroom(), tailroom + ((n + 128) & !3) - n);
        assert_eq!(&clone.data()[..bytes.len()], &bytes[..]);
        check_sizes(&clone);

        assert_eq!(pkt.data(), &bytes[..]);
        assert_eq!(pkt.length(), bytes.len());
        assert_eq!(pkt.buffer_data().as_ptr(), ptr);
        assert!(!pkt.shared());
    }

    #[test]
    fn pull_take_overflow_is_error() {
        let mut pkt = Packet::copy(&payload(10)).unwrap();
        assert_eq!(
            pkt.pull(11),
            Err(PktAdjustError::StartPastEnd { requested: 11, length: 10 })
        );
        assert_eq!(
            pkt.take(11),
            Err(PktAdjustError::EndBeforeStart { requested: 11, length: 10 })
        );
        assert_eq!(pkt.length(), 10);
        assert_eq!(pkt.headroom(), DEFAULT_HEADROOM);

        pkt.pull(4).unwrap();
        pkt.take(6).unwrap();
        assert_eq!(pkt.length(), 0);
        assert!(pkt.data().is_empty());
        check_sizes(&pkt);
    }

    #[test]
    fn pull_take_on_shared_is_per_handle() {
        let bytes = payload(10);
        let pkt = Packet::from(Packet::copy(&bytes).unwrap());
        let mut clone = pkt.clone();
        clone.pull(3).unwrap();
        clone.take(2).unwrap();
        assert_eq!(clone.data(), &bytes[3..8]);
        assert_eq!(pkt.data(), &bytes[..]);
    }

    #[test]
    fn change_headroom_and_length() {
        let mut pkt = Packet::make(10).unwrap();
        let blen = pkt.buffer_length();
        pkt.change_headroom_and_length(0, blen).unwrap();
        assert_eq!(pkt.headroom(), 0);
        assert_eq!(pkt.tailroom(), 0);
        assert_eq!(
            pkt.change_headroom_and_length(1, blen),
            Err(PktAdjustError::EndPastLimit { requested: blen + 1, limit: blen })
        );
        assert_eq!(pkt.length(), blen);
    }

    #[test]
    fn network_header_offsets() {
        let bytes = payload(60);
        let mut pkt = Packet::copy(&bytes).unwrap();
        pkt.set_network_header(14, 20).unwrap();
        assert!(pkt.has_network_header());
        assert_eq!(pkt.network_header_offset(), Some(14));
        assert_eq!(pkt.network_header_length(), Some(20));
        assert_eq!(pkt.transport_header_offset(), Some(34));
        assert_eq!(pkt.network_header().unwrap(), &bytes[14..]);
        assert_eq!(pkt.transport_header().unwrap(), &bytes[34..]);

        // Headers stay put when the data moves.
        pkt.pull(34).unwrap();
        assert_eq!(pkt.network_header_offset(), Some(-20));
        assert_eq!(pkt.transport_header_offset(), Some(0));
        assert_eq!(pkt.network_header().unwrap(), &bytes[14..]);

        pkt.take(26).unwrap();
        assert_eq!(pkt.transport_header().unwrap(), &[] as &[u8]);

        assert_eq!(
            pkt.set_network_header(0, 1),
            Err(HdrOffsetError::OutOfRange { offset: 0, len: 1, length: 0 })
        );

        pkt.clear_network_header();
        assert!(!pkt.has_network_header());
        assert_eq!(pkt.network_header(), None);
        assert_eq!(pkt.transport_header_offset(), None);
    }

    #[test]
    fn ip6_header_len() {
        let mut pkt = Packet::make(60).unwrap();
        pkt.set_ip6_header(0).unwrap();
        assert_eq!(pkt.network_header_length(), Some(IPV6_HDR_SZ));
        assert_eq!(pkt.ip6_header_length(), Some(IPV6_HDR_SZ));
        assert_eq!(pkt.transport_header_offset(), Some(40));
        assert!(pkt.set_ip6_header(21).is_err());

        // A hop-by-hop extension header folded into the IPv6 header.
        pkt.set_ip6_header_with_len(4, IPV6_HDR_SZ + 8).unwrap();
        assert_eq!(pkt.ip6_header_offset(), Some(4));
        assert_eq!(pkt.ip6_header_length(), Some(48));
        assert_eq!(pkt.transport_header_offset(), Some(52));
        assert!(pkt.set_ip6_header_with_len(13, 48).is_err());
    }

    #[test]
    fn buffer_data_mut_reaches_headroom() {
        let bytes = payload(8);
        let mut pkt = Packet::copy(&bytes).unwrap();
        let head = pkt.headroom();
        pkt.buffer_data_mut()[head - 2..head].copy_from_slice(&[0xAB, 0xCD]);
        let blen = pkt.buffer_length();
        pkt.buffer_data_mut()[blen - 1] = 0xEF;
        assert_eq!(pkt.data(), &bytes[..]);

        // The bytes written ahead of the data show up once pushed.
        let pkt = pkt.push(2).unwrap();
        assert_eq!(&pkt.data()[..2], &[0xAB, 0xCD]);
        assert_eq!(&pkt.data()[2..], &bytes[..]);
        assert_eq!(pkt.buffer_data()[blen - 1], 0xEF);
    }

    #[test]
    fn header_mut_writes() {
        let mut pkt = Packet::make(40).unwrap();
        pkt.set_ip_header(0, 20).unwrap();
        pkt.network_header_mut().unwrap()[0] = 0x45;
        pkt.transport_header_mut().unwrap()[0] = 0x99;
        assert_eq!(pkt.data()[0], 0x45);
        assert_eq!(pkt.data()[20], 0x99);
    }

    #[test]
    fn annotations_clear_and_copy() {
        let mut src = Packet::make(20).unwrap();
        src.set_dst_ip_anno(Ipv4Addr::new(10, 0, 0, 9));
        src.set_user_anno_c(3, 7);
        src.set_perfctr_anno(12345);
        src.set_packet_type_anno(PacketType::Multicast);
        src.set_timestamp_anno(Timestamp::new(5, 6));
        src.set_device_anno(Some(DeviceId(2)));
        src.set_network_header(0, 20).unwrap();

        let mut dst = Packet::make(20).unwrap();
        dst.copy_annotations(&src);
        assert_eq!(dst.anno(), src.anno());
        assert_eq!(dst.dst_ip_anno(), Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(dst.user_anno_c(3), 7);
        assert_eq!(dst.perfctr_anno(), 12345);
        assert_eq!(dst.packet_type_anno(), PacketType::Multicast);
        assert_eq!(dst.timestamp_anno(), Timestamp::new(5, 6));
        assert_eq!(dst.device_anno(), Some(DeviceId(2)));
        assert!(!dst.has_network_header());

        src.set_dst_ip6_anno(Ipv6Addr::LOCALHOST);
        assert_eq!(src.dst_ip_anno(), None);
        assert_eq!(src.dst_ip6_anno(), Some(Ipv6Addr::LOCALHOST));

        src.clear_annotations();
        assert_eq!(src.anno(), &Anno::default());
        assert_eq!(src.packet_type_anno(), PacketType::Host);
        assert!(src.timestamp_anno().is_zero());
        assert_eq!(src.device_anno(), None);
        assert!(!src.has_network_header());
    }

    #[test]
    fn annotations_per_handle() {
        let mut pkt = Packet::from(Packet::make(4).unwrap());
        pkt.set_user_anno_i(0, -5);
        let mut clone = pkt.clone();
        assert_eq!(clone.user_anno_i(0), -5);
        clone.set_user_anno_i(0, 9);
        assert_eq!(pkt.user_anno_i(0), -5);
    }

    fn external(bytes: Vec<u8>, released: &'static AtomicUsize) -> ExternalBuf {
        let len = bytes.len();
        let raw = Box::into_raw(bytes.into_boxed_slice());
        let ptr = core::ptr::NonNull::new(raw as *mut u8).unwrap();
        unsafe {
            ExternalBuf::new(
                ptr,
                len,
                Box::new(move |p, len| {
                    released.fetch_add(1, Ordering::SeqCst);
                    let s = core::ptr::slice_from_raw_parts_mut(p.as_ptr(), len);
                    drop(Box::from_raw(s));
                }),
            )
        }
    }

    #[test]
    fn import_releases_once() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);
        let bytes = payload(64);
        let ptr;

        {
            let pkt = Packet::import(external(bytes.clone(), &RELEASED));
            ptr = pkt.buffer_data().as_ptr();
            assert_eq!(pkt.headroom(), 0);
            assert_eq!(pkt.tailroom(), 0);
            assert_eq!(pkt.data(), &bytes[..]);

            let pkt = Packet::from(pkt);
            let c1 = pkt.clone();
            let c2 = pkt.clone();
            drop(pkt);
            drop(c1);
            assert_eq!(RELEASED.load(Ordering::SeqCst), 0);

            // Copying away from the imported buffer drops the last
            // reference on it.
            let w = c2.uniqueify().unwrap();
            assert_ne!(w.buffer_data().as_ptr(), ptr);
            assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
            assert_eq!(w.data(), &bytes[..]);
        }

        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn import_write_in_place() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);
        let mut pkt = Packet::import(external(vec![0; 16], &RELEASED));
        pkt.data_mut()[0] = 1;
        pkt.change_headroom_and_length(4, 8).unwrap();
        let pkt = pkt.push(4).unwrap();
        assert_eq!(pkt.data()[0], 1);
        Packet::from(pkt).kill();
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_uniqueify() {
        let bytes = payload(40);
        let pkt = Packet::from(Packet::copy(&bytes).unwrap());
        let clones: Vec<Packet> = (0..8).map(|_| pkt.clone()).collect();

        std::thread::scope(|s| {
            for (i, c) in clones.into_iter().enumerate() {
                s.spawn(move || {
                    let mut w = c.uniqueify().unwrap();
                    w.data_mut()[0] = i as u8 + 100;
                    assert_eq!(w.data()[0], i as u8 + 100);
                    assert_eq!(&w.data()[1..], &payload(40)[1..]);
                });
            }
        });

        assert_eq!(pkt.data(), &bytes[..]);
        assert!(!pkt.shared());
    }
}
