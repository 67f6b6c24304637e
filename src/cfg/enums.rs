// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a redaction mode string is not one of `full`, `redact`,
/// `none`.
#[derive(Debug, Error)]
#[error("unknown redaction mode: {0:?}")]
pub struct UnknownRedactMode(pub String);

/// How byte payloads are rendered into persisted log events.
///
/// The console line and the raw-payload side table are unaffected; this mode
/// only governs the blob descriptors stored in `logs.args_json` and the
/// monthly JSONL files.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RedactMode {
    /// Full lowercase hex of every payload.
    Full,
    /// First and last 8 bytes only.
    Redact,
    /// Length only.
    #[serde(rename = "none")]
    Off,
}

impl RedactMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactMode::Full => "full",
            RedactMode::Redact => "redact",
            RedactMode::Off => "none",
        }
    }
}

impl fmt::Display for RedactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedactMode {
    type Err = UnknownRedactMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(RedactMode::Full),
            "redact" => Ok(RedactMode::Redact),
            "none" => Ok(RedactMode::Off),
            other => Err(UnknownRedactMode(other.to_string())),
        }
    }
}
