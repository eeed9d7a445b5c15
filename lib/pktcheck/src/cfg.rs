// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Header checker configuration.
use serde::Deserialize;
use serde::Serialize;

/// The options recognized by the header checkers. Each is
/// independently defaultable, and on the wire (or in a config file)
/// they are spelled in upper case: `VERBOSE`, `DETAILS`, `CHECKSUM`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "UPPERCASE")]
pub struct CheckCfg {
    /// Log every dropped packet, rather than just the first.
    pub verbose: bool,

    /// Keep a count of drops per reason, exposed by the `drop_details`
    /// handler.
    pub details: bool,

    /// Verify the transport checksum.
    pub checksum: bool,
}

impl Default for CheckCfg {
    fn default() -> Self {
        Self { verbose: false, details: false, checksum: true }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CfgError {
    #[error("unknown option: {0}")]
    UnknownOption(String),
}

impl CheckCfg {
    /// Set an option by its keyword.
    pub fn set(&mut self, keyword: &str, val: bool) -> Result<(), CfgError> {
        match keyword {
            "VERBOSE" => self.verbose = val,
            "DETAILS" => self.details = val,
            "CHECKSUM" => self.checksum = val,
            _ => return Err(CfgError::UnknownOption(keyword.to_string())),
        }

        Ok(())
    }

    /// Build a configuration from `(keyword, value)` pairs, starting
    /// from the defaults.
    pub fn from_keywords<'a, I>(kws: I) -> Result<Self, CfgError>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut cfg = Self::default();
        for (kw, val) in kws {
            cfg.set(kw, val)?;
        }
        Ok(cfg)
    }
}
