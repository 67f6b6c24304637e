//! NFC payload decoding and derived APDU analytics.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// APDU extraction into the analytics table.
pub mod indexer;
/// Protobuf wire envelope and the default decoder.
pub mod proto;

use bytes::Bytes;

/// Which side of the emulated link produced an APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduDirection {
    /// Reader→card command APDU.
    Reader,
    /// Card→reader response APDU.
    Card,
}

impl ApduDirection {
    /// Single-letter store encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApduDirection::Reader => "R",
            ApduDirection::Card => "C",
        }
    }
}

/// A successfully decoded NFC payload: the direction and the raw APDU
/// bytes it carried.
#[derive(Debug, Clone)]
pub struct DecodedApdu {
    pub direction: ApduDirection,
    pub apdu: Bytes,
}

/// Capability interface for the NFC message decoder.
///
/// `None` means "not an NFC message" (or no decoder at all); callers treat
/// that as perfectly normal traffic and move on.
pub trait NfcDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Option<DecodedApdu>;
}
