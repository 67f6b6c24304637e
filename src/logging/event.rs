// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cfg::enums::RedactMode;

/// One positional logging argument as produced at a call site.
///
/// Anything that is not a string or a byte payload is stringified by the
/// caller.
#[derive(Debug, Clone, PartialEq)]
pub enum LogArg {
    Str(String),
    Blob(Bytes),
}

impl LogArg {
    pub fn str(s: impl Into<String>) -> Self {
        LogArg::Str(s.into())
    }

    pub fn blob(b: impl Into<Bytes>) -> Self {
        LogArg::Blob(b.into())
    }

    /// Console rendering: strings verbatim, payloads as lowercase hex.
    pub fn render(&self) -> String {
        match self {
            LogArg::Str(s) => s.clone(),
            LogArg::Blob(b) => hex::encode(b),
        }
    }

    /// The persisted form, with payloads redacted per `mode`.
    pub fn to_event_arg(&self, mode: RedactMode) -> EventArg {
        match self {
            LogArg::Str(s) => EventArg::Str(s.clone()),
            LogArg::Blob(b) => EventArg::Bytes(BlobDescriptor::new(b, mode)),
        }
    }
}

/// A transformed argument as stored in `args_json` and the JSONL stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventArg {
    Str(String),
    Bytes(BlobDescriptor),
}

impl EventArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventArg::Str(s) => Some(s),
            EventArg::Bytes(_) => None,
        }
    }
}

/// Structured stand-in for a byte payload inside an event.
///
/// The populated fields depend on the redaction mode the descriptor was
/// built under; `len` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<String>,
}

impl BlobDescriptor {
    pub fn new(bytes: &Bytes, mode: RedactMode) -> Self {
        let len = bytes.len();
        let mut descriptor = BlobDescriptor {
            kind: "bytes".to_string(),
            len,
            hex: None,
            head: None,
            tail: None,
        };
        match mode {
            RedactMode::Full => descriptor.hex = Some(hex::encode(bytes)),
            RedactMode::Redact => {
                descriptor.head = Some(hex::encode(&bytes[..len.min(8)]));
                descriptor.tail = Some(if len > 8 {
                    hex::encode(&bytes[len - 8..])
                } else {
                    String::new()
                });
            },
            RedactMode::Off => {},
        }
        descriptor
    }
}

/// The JSONL line shape; `args` already carries redacted descriptors.
#[derive(Debug, Serialize)]
pub struct LogEvent<'a> {
    pub ts: &'a str,
    pub tag: &'a str,
    pub origin: &'a str,
    pub session: Option<u8>,
    pub args: &'a [EventArg],
}

/// Matches the arg shape the relay's inbound-frame logger emits:
/// `["server", "data:", <payload>]`. Returns the payload when it does.
pub fn inbound_frame_payload(args: &[LogArg]) -> Option<&Bytes> {
    if args.len() < 3 {
        return None;
    }
    if args[0] != LogArg::Str("server".into()) || args[1] != LogArg::Str("data:".into()) {
        return None;
    }
    match &args[2] {
        LogArg::Blob(b) => Some(b),
        LogArg::Str(_) => None,
    }
}
