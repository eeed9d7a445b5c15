// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Named 64-bit counters, modelled on illumos named kstats.
//!
//! See `kstat_create(9F)`.
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

cfg_if! {
    if #[cfg(feature = "std")] {
        use std::boxed::Box;
        use std::string::String;
        use std::string::ToString;
    } else {
        use alloc::boxed::Box;
        use alloc::string::String;
        use alloc::string::ToString;
    }
}

/// The maximum length of a kstat name, including the NUL terminator.
pub const KSTAT_STRLEN: usize = 31;

/// A provider of named kstats.
///
/// Rather than implementing this trait manually, the kstat-macro
/// should be used.
///
/// # Example
///
/// To declare a new kstat provider simply define a struct of named
/// fields with type [`KStatU64`] and derive [`KStatProvider`].
///
/// ```
/// use pktbuf::ddi::kstat::KStatProvider;
/// use pktbuf::ddi::kstat::KStatU64;
///
/// #[derive(KStatProvider)]
/// struct SomeStats {
///     bytes_out: KStatU64,
///     bytes_in: KStatU64,
/// }
///
/// let stats = SomeStats::new();
/// stats.bytes_out.incr(54);
/// assert_eq!(stats.snapshot().bytes_out, 54);
/// ```
///
/// To register a provider see [`KStatNamed`].
pub trait KStatProvider {
    const NUM_FIELDS: u32;
    type Snap;

    fn init(&mut self) -> Result<(), Error>;

    fn new() -> Self;

    fn num_fields(&self) -> u32 {
        Self::NUM_FIELDS
    }

    /// Return a snapshot of the stats. This is how you obtain a copy,
    /// as opposed to the traditional clone().
    fn snapshot(&self) -> Self::Snap;
}

pub use kstat_macro::KStatProvider;

/// Initialize and register a [`KStatProvider`].
///
/// This should be called **exactly** once for a given provider. The
/// `module` and `name` pair identifies the stats to whoever reads
/// them.
///
/// ```
/// # use pktbuf::ddi::kstat::*;
/// #[derive(KStatProvider)]
/// pub struct StatProvider {
///     my_counter: KStatU64,
/// }
///
/// let ks = KStatNamed::new("pktcheck", "tcp0", StatProvider::new())
///     .unwrap();
/// ks.vals.my_counter.incr(1);
/// ```
pub struct KStatNamed<T: KStatProvider> {
    // Readers only ever take a snapshot. The individual values are
    // always intact, but a snapshot taken while a packet is in flight
    // may reflect only part of that packet's updates.
    pub vals: Box<T>,
    module: String,
    name: String,
}

impl<T: KStatProvider> KStatNamed<T> {
    pub fn new(
        module: &str,
        name: &str,
        provider: T,
    ) -> Result<KStatNamed<T>, Error> {
        validate_name(module)?;
        validate_name(name)?;
        let mut vals = Box::new(provider);
        vals.init()?;
        Ok(Self {
            vals,
            module: module.to_string(),
            name: name.to_string(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> T::Snap {
        self.vals.snapshot()
    }
}

/// A 64-bit unsigned named kstat.
///
/// Updates are atomic so that a single provider may be shared by
/// many threads processing packets at once.
#[derive(Debug, Default)]
pub struct KStatU64 {
    value: AtomicU64,
}

impl KStatU64 {
    pub fn init(&mut self, name: &str) -> Result<(), Error> {
        validate_name(name)
    }

    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    /// Add `n` to the stat, returning the value it held before.
    #[inline]
    pub fn incr(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::Relaxed)
    }

    pub fn set(&self, val: u64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn val(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl core::ops::AddAssign<u64> for KStatU64 {
    #[inline]
    fn add_assign(&mut self, other: u64) {
        *self.value.get_mut() += other;
    }
}

impl core::ops::SubAssign<u64> for KStatU64 {
    #[inline]
    fn sub_assign(&mut self, other: u64) {
        *self.value.get_mut() -= other;
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.as_bytes().contains(&0) {
        return Err(Error::NulChar);
    }

    // The kstat system would silently truncate; we'd rather tell the
    // consumer.
    if name.len() + 1 > KSTAT_STRLEN {
        return Err(Error::NameTooLong(name.to_string()));
    }

    Ok(())
}

/// A kstat error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    NameTooLong(String),
    NulChar,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NameTooLong(name) => {
                write!(f, "kstat name too long: {name}")
            }

            Self::NulChar => write!(f, "kstat name contains NUL char"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(KStatProvider)]
    struct TestStats {
        in_pkts: KStatU64,
        out_pkts: KStatU64,
    }

    #[test]
    fn derive_counts_fields() {
        let stats = TestStats::new();
        assert_eq!(stats.num_fields(), 2);
        assert_eq!(TestStats::NUM_FIELDS, 2);
    }

    #[test]
    fn incr_returns_previous() {
        let ks = KStatNamed::new("pktbuf", "test", TestStats::new()).unwrap();
        assert_eq!(ks.vals.in_pkts.incr(1), 0);
        assert_eq!(ks.vals.in_pkts.incr(2), 1);
        let snap = ks.snapshot();
        assert_eq!(snap.in_pkts, 3);
        assert_eq!(snap.out_pkts, 0);
        assert_eq!(ks.module(), "pktbuf");
        assert_eq!(ks.name(), "test");
    }

    #[test]
    fn assign_ops() {
        let mut stat = KStatU64::new();
        stat += 10;
        stat -= 3;
        assert_eq!(stat.val(), 7);
        stat.set(1);
        assert_eq!(stat.val(), 1);
    }

    #[test]
    fn bad_names() {
        let long = "a".repeat(KSTAT_STRLEN);
        match KStatNamed::new("pktbuf", &long, TestStats::new()) {
            Err(Error::NameTooLong(name)) => assert_eq!(name, long),
            Err(e) => panic!("expected NameTooLong, got: {e}"),
            Ok(_) => panic!("expected failure for {long}"),
        }

        let max = "a".repeat(KSTAT_STRLEN - 1);
        assert!(KStatNamed::new("pktbuf", &max, TestStats::new()).is_ok());

        assert!(matches!(
            KStatNamed::new("pkt\0buf", "test", TestStats::new()),
            Err(Error::NulChar)
        ));
    }
}
