// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet engine: storage, packets, and the header views and
//! element contract used by pipeline stages.

pub mod anno;
pub mod buf;
pub mod checksum;
pub mod element;
pub mod ip4;
pub mod packet;
pub mod tcp;
pub mod udp;

use core::fmt;
use core::fmt::Display;

/// An error reading a header out of a byte slice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadErr {
    /// The slice is shorter than the header.
    NotEnoughBytes { needed: usize, available: usize },
}

impl Display for ReadErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotEnoughBytes { needed, available } => {
                write!(f, "need {needed} bytes, only {available} available")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ReadErr {}

/// Cast the front of `bytes` to the raw header type `T`.
pub(crate) fn read_hdr<T>(bytes: &[u8]) -> Result<&T, ReadErr>
where
    T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
{
    T::ref_from_prefix(bytes).map(|(hdr, _rest)| hdr).map_err(|_| {
        ReadErr::NotEnoughBytes {
            needed: core::mem::size_of::<T>(),
            available: bytes.len(),
        }
    })
}
