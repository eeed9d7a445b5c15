// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The header checker pipeline stage, generic over the transport
//! protocol it validates.
use crate::cfg::CheckCfg;
use core::marker::PhantomData;
use pktbuf::Packet;
use pktbuf::ddi::kstat;
use pktbuf::ddi::kstat::KStatNamed;
use pktbuf::ddi::kstat::KStatProvider;
use pktbuf::ddi::kstat::KStatU64;
use pktbuf::engine::element::Element;
use pktbuf::engine::element::HandlerError;
use pktbuf::engine::element::PacketSink;
use pktbuf::engine::ip4::IPV4_VERSION;
use pktbuf::engine::ip4::Ipv4Hdr;
use pktbuf::engine::ip4::Protocol;
use pktbuf::engine::packet::PacketBase;
use pktbuf::provider::ExecCtx;
use pktbuf::provider::LogLevel;
use std::fmt::Write;
use std::sync::Arc;

/// Why a packet failed its header check.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DropReason {
    /// No network header, or not carrying the checker's protocol.
    NotProto,
    /// A length field is too small or claims more bytes than exist.
    BadLength,
    BadChecksum,
}

impl DropReason {
    /// Every reason, in the order they are reported.
    pub const ALL: [DropReason; 3] =
        [Self::NotProto, Self::BadLength, Self::BadChecksum];

    fn idx(self) -> usize {
        match self {
            Self::NotProto => 0,
            Self::BadLength => 1,
            Self::BadChecksum => 2,
        }
    }
}

/// The protocol-specific half of a header checker.
pub trait L4Check: Send + Sync + 'static {
    /// The element class name.
    const CLASS_NAME: &'static str;

    /// The IP protocol this checker accepts.
    const PROTO: Protocol;

    /// The human readable text for each [`DropReason`], indexed in the
    /// order of [`DropReason::ALL`].
    const REASON_TEXTS: [&'static str; 3];

    /// Validate the transport header found at `l4`, whose IPv4 header
    /// is `ip`. `l4` runs to the end of the packet data.
    fn check(ip: &Ipv4Hdr, l4: &[u8], checksum: bool) -> Result<(), DropReason>;
}

/// Counters kept by every header checker.
#[derive(KStatProvider)]
pub struct CheckStats {
    /// Packets that passed the check.
    pub count: KStatU64,
    /// Packets that failed the check, for any reason.
    pub drops: KStatU64,
}

/// Per-reason drop counters, kept when `DETAILS` is set.
#[derive(KStatProvider)]
pub struct ReasonStats {
    pub not_proto: KStatU64,
    pub bad_length: KStatU64,
    pub bad_checksum: KStatU64,
}

impl ReasonStats {
    fn stat(&self, reason: DropReason) -> &KStatU64 {
        match reason {
            DropReason::NotProto => &self.not_proto,
            DropReason::BadLength => &self.bad_length,
            DropReason::BadChecksum => &self.bad_checksum,
        }
    }
}

/// The outcome of checking a packet.
#[derive(Debug)]
pub enum Verdict {
    /// The packet passed and continues on output 0, unmodified.
    Forward(Packet),
    /// The packet failed; it goes to the divert output if there is one.
    Divert(Packet, DropReason),
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("failed to register stats: {0}")]
    Kstat(#[from] kstat::Error),
}

const HANDLERS: [&str; 2] = ["count", "drops"];
const HANDLERS_DETAILS: [&str; 3] = ["count", "drops", "drop_details"];

/// A pipeline stage validating the transport header described by `P`.
///
/// A checker may be shared by any number of threads: all of its
/// mutable state is in atomic counters.
pub struct CheckHeader<P: L4Check> {
    name: String,
    cfg: CheckCfg,
    ectx: Arc<ExecCtx>,
    stats: KStatNamed<CheckStats>,
    reasons: Option<KStatNamed<ReasonStats>>,
    divert: Option<Box<dyn PacketSink>>,
    _proto: PhantomData<fn() -> P>,
}

impl<P: L4Check> CheckHeader<P> {
    pub fn new(
        name: &str,
        cfg: CheckCfg,
        ectx: Arc<ExecCtx>,
    ) -> Result<Self, CheckError> {
        let stats = KStatNamed::new("pktcheck", name, CheckStats::new())?;
        let reasons = if cfg.details {
            Some(KStatNamed::new(
                "pktcheck_reasons",
                name,
                ReasonStats::new(),
            )?)
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            cfg,
            ectx,
            stats,
            reasons,
            divert: None,
            _proto: PhantomData,
        })
    }

    /// Attach a second output, which receives the packets that fail.
    /// Without one, failed packets are released.
    pub fn with_divert(mut self, sink: Box<dyn PacketSink>) -> Self {
        self.divert = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cfg(&self) -> &CheckCfg {
        &self.cfg
    }

    /// Check `pkt`, updating the counters. The packet is never
    /// modified.
    pub fn validate(&self, pkt: Packet) -> Verdict {
        match self.classify(&pkt) {
            Ok(()) => {
                self.stats.vals.count.incr(1);
                Verdict::Forward(pkt)
            }

            Err(reason) => {
                self.record_drop(reason);
                Verdict::Divert(pkt, reason)
            }
        }
    }

    fn classify(&self, pkt: &PacketBase) -> Result<(), DropReason> {
        let (Some(nh), Some(l4)) = (pkt.network_header(), pkt.transport_header())
        else {
            return Err(DropReason::NotProto);
        };

        let ip = Ipv4Hdr::parse(nh).map_err(|_| DropReason::NotProto)?;
        if ip.version() != IPV4_VERSION || ip.proto() != P::PROTO {
            return Err(DropReason::NotProto);
        }

        P::check(&ip, l4, self.cfg.checksum)
    }

    fn record_drop(&self, reason: DropReason) {
        let prev = self.stats.vals.drops.incr(1);
        if prev == 0 || self.cfg.verbose {
            let msg = format!(
                "{}: {} header check failed: {}",
                self.name,
                P::PROTO,
                self.reason_text(reason)
            );
            self.ectx.log.log(LogLevel::Warn, &msg);
        }

        if let Some(reasons) = &self.reasons {
            reasons.vals.stat(reason).incr(1);
        }
    }

    pub fn reason_text(&self, reason: DropReason) -> &'static str {
        P::REASON_TEXTS[reason.idx()]
    }

    /// The number of packets that passed.
    pub fn count(&self) -> u64 {
        self.stats.vals.count.val()
    }

    /// The number of packets that failed.
    pub fn drops(&self) -> u64 {
        self.stats.vals.drops.val()
    }

    pub fn stats(&self) -> CheckStatsSnap {
        self.stats.snapshot()
    }

    /// The per-reason drop counters, if `DETAILS` is set.
    pub fn reason_stats(&self) -> Option<ReasonStatsSnap> {
        self.reasons.as_ref().map(|r| r.snapshot())
    }

    /// A table of drops per reason, if `DETAILS` is set.
    pub fn drop_details(&self) -> Option<String> {
        let reasons = self.reasons.as_ref()?;
        let mut out = String::new();
        for reason in DropReason::ALL {
            // Writing to a String cannot fail.
            let _ = writeln!(
                out,
                "{:>15} packets due to: {:>24}",
                reasons.vals.stat(reason).val(),
                self.reason_text(reason)
            );
        }
        Some(out)
    }
}

impl<P: L4Check> Element for CheckHeader<P> {
    fn class_name(&self) -> &'static str {
        P::CLASS_NAME
    }

    fn noutputs(&self) -> usize {
        if self.divert.is_some() { 2 } else { 1 }
    }

    fn simple_action(&self, pkt: Packet) -> Option<Packet> {
        match self.validate(pkt) {
            Verdict::Forward(pkt) => Some(pkt),

            Verdict::Divert(pkt, _) => {
                match &self.divert {
                    Some(sink) => sink.push(pkt),
                    None => pkt.kill(),
                }
                None
            }
        }
    }

    fn handlers(&self) -> &[&'static str] {
        if self.reasons.is_some() { &HANDLERS_DETAILS } else { &HANDLERS }
    }

    fn read_handler(&self, name: &str) -> Result<String, HandlerError> {
        match name {
            "count" => Ok(self.count().to_string()),
            "drops" => Ok(self.drops().to_string()),
            "drop_details" => self
                .drop_details()
                .ok_or_else(|| HandlerError::UnknownHandler(name.to_string())),
            _ => Err(HandlerError::UnknownHandler(name.to_string())),
        }
    }
}
