// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Transport header checkers.
//!
//! [`CheckTcpHeader`] and [`CheckUdpHeader`] are pipeline stages which
//! inspect the IPv4 and transport headers of each packet, forward the
//! packets that pass, and divert (or release) the ones that don't. Both
//! are instances of [`CheckHeader`], differing only in the protocol
//! checks plugged into it.

pub mod cfg;
pub mod check;
pub mod tcp;
pub mod udp;

pub use cfg::CfgError;
pub use cfg::CheckCfg;
pub use check::CheckError;
pub use check::CheckHeader;
pub use check::CheckStatsSnap;
pub use check::DropReason;
pub use check::ReasonStatsSnap;
pub use check::Verdict;
pub use tcp::CheckTcpHeader;
pub use udp::CheckUdpHeader;
