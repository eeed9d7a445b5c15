// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The internet checksum (RFC 1071).
//!
//! [`Checksum`] is a rolling one's complement sum. Bytes are summed as
//! native-endian 16-bit words: the checksum field is a pair of bytes,
//! not a logical integer, so no byte-order conversion is ever applied
//! to it. Summing network-order words with native-endian loads and
//! storing the result the same way yields the network-order checksum
//! on any host (RFC 1071 section 1.B).
//!
//! Verification does not need to zero the checksum field: summing a
//! segment *including* its stored checksum folds to `0xFFFF` when the
//! segment is intact, see [`Checksum::is_valid()`].
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

/// The checksum value as stored in a header: the one's complement of
/// the folded sum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes as found in a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum.
///
/// Carries are accumulated in the upper half of a `u32` and only
/// folded back in by [`Checksum::finalize()`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self { inner: 0 }
    }

    /// Start a new sum over `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut csum = Self::new();
        csum.add_bytes(bytes);
        csum
    }

    /// Add `bytes` to the sum. An odd trailing byte is padded with
    /// zero, so only the last slice added may have an odd length.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.add_word(u16::from_ne_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.add_word(u16::from_ne_bytes([*last, 0]));
        }
    }

    /// Remove `bytes` from the sum, e.g. before rewriting a field.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.add_word(!u16::from_ne_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.add_word(!u16::from_ne_bytes([*last, 0]));
        }
    }

    #[inline]
    fn add_word(&mut self, w: u16) {
        // Fold early enough that the accumulator can't overflow no
        // matter how many bytes are summed.
        if self.inner >= 0xFFFF_0000 {
            self.fold();
        }
        self.inner += u32::from(w);
    }

    #[inline]
    fn fold(&mut self) {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }
    }

    /// Fold all carries and return the 16-bit sum.
    pub fn finalize(&mut self) -> u16 {
        self.fold();
        self.inner as u16
    }

    /// Whether a sum taken over a segment, its stored checksum, and any
    /// pseudo-header verifies: the complement of the folded sum is zero.
    pub fn is_valid(mut self) -> bool {
        !self.finalize() == 0
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: u32::from(!u16::from_ne_bytes(hc.bytes())) }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, mut other: Self) {
        self.add_word(other.finalize());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // The example from RFC 1071 section 3.
    const RFC_BYTES: [u8; 8] = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];

    #[test]
    fn rfc1071_example() {
        let mut csum = Checksum::compute(&RFC_BYTES);
        assert_eq!(u16::from_be(csum.finalize()), 0xddf2);
    }

    #[test]
    fn stored_checksum_verifies() {
        let mut seg = RFC_BYTES.to_vec();
        seg.extend_from_slice(&[0, 0]);
        let hc = HeaderChecksum::from(Checksum::compute(&seg));
        let n = seg.len();
        seg[n - 2..].copy_from_slice(&hc.bytes());
        assert!(Checksum::compute(&seg).is_valid());

        seg[3] ^= 0x10;
        assert!(!Checksum::compute(&seg).is_valid());
    }

    #[test]
    fn odd_length_pads() {
        let mut odd = Checksum::compute(&[0xAB, 0xCD, 0xEF]);
        let mut even = Checksum::compute(&[0xAB, 0xCD, 0xEF, 0x00]);
        assert_eq!(odd.finalize(), even.finalize());
    }

    #[test]
    fn incremental_update() {
        let mut bytes = RFC_BYTES;
        let mut csum = Checksum::compute(&bytes);
        csum.sub_bytes(&bytes[2..4]);
        bytes[2..4].copy_from_slice(&[0x12, 0x34]);
        csum.add_bytes(&bytes[2..4]);
        assert_eq!(csum.finalize(), Checksum::compute(&bytes).finalize());
    }

    #[test]
    fn sum_of_parts() {
        let a = Checksum::compute(&RFC_BYTES[..4]);
        let b = Checksum::compute(&RFC_BYTES[4..]);
        let mut whole = Checksum::compute(&RFC_BYTES);
        assert_eq!((a + b).finalize(), whole.finalize());
    }

    #[test]
    fn large_input_no_overflow() {
        let bytes = vec![0xFF; 200_000];
        let mut csum = Checksum::compute(&bytes);
        assert_eq!(csum.finalize(), 0xFFFF);
    }
}
