// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Storage backends for packet data.
//!
//! A [`ByteBuffer`] is the region of memory underlying a
//! [`Packet`](super::packet::Packet): it runs from the packet's `head`
//! to its `end`. The packet itself only tracks offsets into the
//! buffer, so the storage strategy is entirely up to the backend.
//!
//! * [`HeapBuf`]: an allocation made and freed by this crate.
//!
//! * [`ExternalBuf`]: memory owned by someone else (a device ring, a
//!   foreign allocator), handed back through a release callback once
//!   the last packet referencing it is gone.
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::ptr::NonNull;

/// The headroom reserved by [`Packet::make()`] and friends; enough
/// for the link-layer header of most common media.
///
/// [`Packet::make()`]: super::packet::Packet::make
pub const DEFAULT_HEADROOM: usize = 28;

/// The smallest buffer we allocate. Requests smaller than this are
/// padded out with tailroom.
pub const MIN_BUFFER_LENGTH: usize = 64;

/// The largest buffer we will allocate for a single packet.
pub const MAX_BUFFER_LEN: usize = 128 * 1024;

/// The storage underneath a packet.
///
/// Every byte of the region must be initialized, and the region must
/// not change size for the life of the buffer.
pub trait ByteBuffer: Send + Sync {
    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    fn len(&self) -> usize {
        self.bytes().len()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocError {
    /// The request exceeds [`MAX_BUFFER_LEN`].
    TooLarge { requested: usize, max: usize },

    /// The allocator could not satisfy the request.
    OutOfMemory { requested: usize },
}

impl Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TooLarge { requested, max } => {
                write!(f, "buffer of {requested} bytes exceeds max {max}")
            }

            Self::OutOfMemory { requested } => {
                write!(f, "failed to allocate buffer of {requested} bytes")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

/// A zeroed heap allocation owned by the packet layer.
pub struct HeapBuf {
    inner: Box<[u8]>,
}

impl HeapBuf {
    /// Allocate `len` zeroed bytes.
    pub fn alloc(len: usize) -> Result<Self, AllocError> {
        if len > MAX_BUFFER_LEN {
            return Err(AllocError::TooLarge {
                requested: len,
                max: MAX_BUFFER_LEN,
            });
        }

        let mut v: Vec<u8> = Vec::new();
        v.try_reserve_exact(len)
            .map_err(|_| AllocError::OutOfMemory { requested: len })?;
        v.resize(len, 0);
        Ok(Self { inner: v.into_boxed_slice() })
    }
}

impl ByteBuffer for HeapBuf {
    fn bytes(&self) -> &[u8] {
        &self.inner
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.inner
    }
}

/// The callback used to hand an [`ExternalBuf`] region back to its
/// owner. It receives the original pointer and length.
pub type ReleaseFn = Box<dyn FnOnce(NonNull<u8>, usize) + Send>;

/// A region of memory owned outside the packet layer.
///
/// The release callback runs exactly once, when the buffer is dropped;
/// that happens when the last [`Packet`](super::packet::Packet)
/// sharing it goes away.
pub struct ExternalBuf {
    ptr: NonNull<u8>,
    len: usize,
    release: Option<ReleaseFn>,
}

impl ExternalBuf {
    /// Wrap an externally owned region.
    ///
    /// # Safety
    ///
    /// * `ptr` must be valid for reads and writes of `len` bytes, and
    ///   all `len` bytes must be initialized.
    ///
    /// * The region must not be accessed by anyone else until
    ///   `release` is called.
    ///
    /// * The region must stay valid until `release` is called.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize, release: ReleaseFn) -> Self {
        Self { ptr, len, release: Some(release) }
    }
}

impl ByteBuffer for ExternalBuf {
    fn bytes(&self) -> &[u8] {
        // Safety: The caller of `new()` guaranteed the region is
        // valid, initialized, and ours until release.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // Safety: As above, and `&mut self` means nobody else holds a
        // slice of this region.
        unsafe {
            core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
        }
    }
}

impl Drop for ExternalBuf {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.ptr, self.len);
        }
    }
}

// Safety: The region is exclusively ours (see `ExternalBuf::new()`),
// and mutable access only happens through `&mut self`. The release
// callback is `Send` and is never reachable through `&self`.
unsafe impl Send for ExternalBuf {}
unsafe impl Sync for ExternalBuf {}

impl fmt::Debug for ExternalBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExternalBuf")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn heap_buf_zeroed() {
        let buf = HeapBuf::alloc(100).unwrap();
        assert_eq!(buf.len(), 100);
        assert!(buf.bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn heap_buf_too_large() {
        assert_eq!(
            HeapBuf::alloc(MAX_BUFFER_LEN + 1).err(),
            Some(AllocError::TooLarge {
                requested: MAX_BUFFER_LEN + 1,
                max: MAX_BUFFER_LEN,
            })
        );
    }

    #[test]
    fn external_release_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let r2 = released.clone();
        let raw = Box::into_raw(vec![1u8, 2, 3, 4].into_boxed_slice());
        let ptr = NonNull::new(raw as *mut u8).unwrap();

        let mut buf = unsafe {
            ExternalBuf::new(
                ptr,
                4,
                Box::new(move |p, len| {
                    r2.fetch_add(1, Ordering::SeqCst);
                    let slice = core::ptr::slice_from_raw_parts_mut(
                        p.as_ptr(),
                        len,
                    );
                    drop(Box::from_raw(slice));
                }),
            )
        };

        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
        buf.bytes_mut()[0] = 9;
        assert_eq!(buf.bytes(), &[9, 2, 3, 4]);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(buf);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
