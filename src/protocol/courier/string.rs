use std::fmt;

use serde_json::Value as JsonValue;
use tracing::warn;

use super::{codec, utils, Deserialize, Dump, Dumper, Json, Serialize};
use crate::protocol::wire::{WireResult, WireStream};

/// Courier `STRING`: a length word followed by the characters, padded with
/// one zero byte when the length is odd.
///
/// The value holds the host form produced by [`codec`], so arbitrary XNS
/// character sets survive a round trip through a Rust `String`. `MAX` bounds
/// the encoded length in bytes; longer strings are cut at a character
/// boundary when written and when read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CourierString<const MAX: usize = 65535> {
    host: String,
}

impl<const MAX: usize> CourierString<MAX> {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Host form of the string.
    pub fn as_str(&self) -> &str {
        &self.host
    }

    pub fn into_string(self) -> String {
        self.host
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Wire bytes of the string, already cut to `MAX`.
    pub fn to_wire(&self) -> WireResult<Vec<u8>> {
        let mut wire = codec::encode(&self.host)?;
        let limit = MAX.min(u16::MAX as usize);
        if wire.len() > limit {
            warn!("string of {} bytes exceeds its maximum {}, truncating", wire.len(), limit);
            wire.truncate(codec::truncate(&wire, limit));
        }
        Ok(wire)
    }
}

impl<const MAX: usize> Serialize for CourierString<MAX> {
    fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
        let wire = self.to_wire()?;
        dest.write_u16(wire.len() as u16)?;
        dest.write_bytes(&wire)?;
        dest.align_write()
    }
}

impl<const MAX: usize> Deserialize for CourierString<MAX> {
    fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
        let len = src.read_u16()? as usize;
        let mut wire = src.read_bytes(len)?;
        src.align_read()?;
        if wire.len() > MAX {
            warn!("received string of {} bytes, maximum is {}", wire.len(), MAX);
            wire.truncate(codec::truncate(&wire, MAX));
        }
        self.host = codec::decode(&wire)?;
        Ok(())
    }
}

impl<const MAX: usize> Json for CourierString<MAX> {
    fn to_json(&self) -> JsonValue {
        JsonValue::String(self.host.clone())
    }

    fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
        let host = src
            .as_str()
            .ok_or_else(|| utils::invalid_data(format!("expected STRING, found {src}")))?;
        // reject host strings the codec cannot represent
        codec::encode(host)?;
        self.host = host.to_string();
        Ok(())
    }
}

impl<const MAX: usize> Dump for CourierString<MAX> {
    fn dump(&self, dest: &mut Dumper) {
        dest.text(format_args!("{:?}", self.host));
    }
}

impl<const MAX: usize> fmt::Display for CourierString<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

impl<const MAX: usize> From<&str> for CourierString<MAX> {
    fn from(host: &str) -> Self {
        Self::new(host)
    }
}

impl<const MAX: usize> From<String> for CourierString<MAX> {
    fn from(host: String) -> Self {
        Self::new(host)
    }
}
