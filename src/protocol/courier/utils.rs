use std::fmt::{Display, Write};

use serde_json::Value as JsonValue;

use crate::protocol::wire::WireError;

pub fn invalid_data(m: impl Into<String>) -> WireError {
    WireError::InvalidData(m.into())
}

/// Reads an unsigned JSON number that must fit into `max`.
pub fn json_unsigned(src: &JsonValue, max: u64, type_name: &str) -> Result<u64, WireError> {
    match src.as_u64() {
        Some(v) if v <= max => Ok(v),
        _ => Err(invalid_data(format!("expected {type_name}, found {src}"))),
    }
}

/// Reads a signed JSON number that must fit into `min..=max`.
pub fn json_signed(src: &JsonValue, min: i64, max: i64, type_name: &str) -> Result<i64, WireError> {
    match src.as_i64() {
        Some(v) if (min..=max).contains(&v) => Ok(v),
        _ => Err(invalid_data(format!("expected {type_name}, found {src}"))),
    }
}

pub fn json_array<'a>(src: &'a JsonValue, type_name: &str) -> Result<&'a Vec<JsonValue>, WireError> {
    src.as_array().ok_or_else(|| invalid_data(format!("expected {type_name} array, found {src}")))
}

/// Text sink for [`super::Dump`] implementations.
///
/// Records render as `[ name: value ... ]`, sequences as `{ value ... }`, one
/// member per line, indented by nesting depth.
#[derive(Debug, Default)]
pub struct Dumper {
    out: String,
    depth: usize,
}

impl Dumper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, text: impl Display) {
        let _ = write!(self.out, "{text}");
    }

    pub fn open(&mut self, bracket: char) {
        self.out.push(bracket);
        self.depth += 1;
    }

    pub fn close(&mut self, bracket: char) {
        self.depth = self.depth.saturating_sub(1);
        if !self.out.ends_with(['[', '{']) {
            self.newline();
        }
        self.out.push(bracket);
    }

    pub fn field(&mut self, name: &str, value: &dyn super::Dump) {
        self.newline();
        self.text(name);
        self.out.push_str(": ");
        value.dump(self);
    }

    pub fn item(&mut self, value: &dyn super::Dump) {
        self.newline();
        value.dump(self);
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }
}
