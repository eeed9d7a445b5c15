// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Logging for tests.
use pktbuf::provider::LogLevel;
use pktbuf::provider::LogProvider;
use pktbuf::provider::SlogLog;
use slog::Drain;
use std::sync::Arc;
use std::sync::Mutex;

/// Build a logger writing to the test harness's captured stdout. The
/// level is controlled through `RUST_LOG`.
pub fn test_logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).ignore_res();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("component" => "test"))
}

/// A [`LogProvider`] which records every message so tests can assert
/// on what was logged. Messages are also forwarded to a
/// [`test_logger()`].
#[derive(Clone)]
pub struct RecordLog {
    msgs: Arc<Mutex<Vec<(LogLevel, String)>>>,
    fwd: SlogLog,
}

impl RecordLog {
    pub fn new() -> Self {
        Self {
            msgs: Arc::new(Mutex::new(Vec::new())),
            fwd: SlogLog::new(test_logger()),
        }
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.msgs.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.msgs.lock().unwrap().len()
    }
}

impl Default for RecordLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogProvider for RecordLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.fwd.log(level, msg);
        self.msgs.lock().unwrap().push((level, msg.to_string()));
    }
}
