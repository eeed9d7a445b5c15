// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the engine run in different contexts by plugging in
//! implementations of core services. Logging is the only such service
//! today: a pipeline stage never prints on its own, it hands messages
//! to whatever [`LogProvider`] its [`ExecCtx`] was built with.

use alloc::boxed::Box;
use core::fmt;
use core::fmt::Display;

/// The execution context handed to a pipeline stage at construction.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}

impl ExecCtx {
    pub fn new(log: Box<dyn LogProvider>) -> Self {
        Self { log }
    }
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// For example, in a unit test this could map to `println!`, while a
/// long running router hands messages to its `slog` drain.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[cfg(feature = "std")]
#[derive(Clone, Copy)]
pub struct PrintlnLog;

#[cfg(feature = "std")]
impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Forward engine log messages to a [`slog::Logger`].
#[cfg(feature = "std")]
#[derive(Clone)]
pub struct SlogLog {
    log: slog::Logger,
}

#[cfg(feature = "std")]
impl SlogLog {
    pub fn new(log: slog::Logger) -> Self {
        Self { log }
    }
}

#[cfg(feature = "std")]
impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.log, "{}", msg),
            LogLevel::Warn => slog::warn!(self.log, "{}", msg),
            LogLevel::Error => slog::error!(self.log, "{}", msg),
        }
    }
}

/// Discard every message.
#[derive(Clone, Copy, Default)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}
