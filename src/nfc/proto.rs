// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use prost::Message;

use crate::nfc::{ApduDirection, DecodedApdu, NfcDecoder};

/// Outer client→server envelope: an opcode plus an opaque inner message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerData {
    #[prost(int32, tag = "1")]
    pub opcode: i32,
    #[prost(bytes = "bytes", tag = "2")]
    pub data: Bytes,
}

/// Inner card-to-card message carrying the APDU bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NfcData {
    #[prost(enumeration = "DataSource", tag = "1")]
    pub data_source: i32,
    #[prost(enumeration = "DataType", tag = "2")]
    pub data_type: i32,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataSource {
    Card = 1,
    Reader = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    Initial = 1,
    Raw = 2,
}

/// Default decoder for the two-level protobuf envelope.
///
/// Any parse failure, at either level, including an out-of-range
/// `data_source`, yields `None`; relayed payloads are not required to be
/// NFC messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeDecoder;

impl NfcDecoder for EnvelopeDecoder {
    fn decode(&self, payload: &[u8]) -> Option<DecodedApdu> {
        let outer = ServerData::decode(payload).ok()?;
        let inner = NfcData::decode(outer.data.as_ref()).ok()?;
        let direction = match DataSource::try_from(inner.data_source).ok()? {
            DataSource::Card => ApduDirection::Card,
            DataSource::Reader => ApduDirection::Reader,
        };
        Some(DecodedApdu { direction, apdu: inner.data })
    }
}

/// Builds an envelope around an APDU; the counterpart of
/// [`EnvelopeDecoder::decode`], used by relay peers and the test suite.
pub fn encode_envelope(source: DataSource, apdu: &[u8], timestamp: i64) -> Vec<u8> {
    let inner = NfcData {
        data_source: source as i32,
        data_type: DataType::Initial as i32,
        data: Bytes::copy_from_slice(apdu),
        timestamp,
    };
    let outer = ServerData { opcode: 0, data: inner.encode_to_vec().into() };
    outer.encode_to_vec()
}
