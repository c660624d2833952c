use serde_json::Value as JsonValue;

use super::{utils, Deserialize, Dump, Dumper, Json, Serialize};
use crate::protocol::wire::{WireResult, WireStream};

/// Number of elements per segment written by [`StreamOf`] unless configured otherwise.
pub const DEFAULT_SEGMENT_LEN: usize = 32;

/// A Courier stream of `T`: an unbounded list sent as consecutive segments.
///
/// Every segment starts with a selector word (`MORE` when further segments
/// follow, `LAST` for the final one) and an element count. An empty stream is a
/// single `LAST` segment with no elements.
#[derive(Clone, Debug)]
pub struct StreamOf<T, const MORE: u16 = 0, const LAST: u16 = 1> {
    pub items: Vec<T>,
    segment_len: usize,
}

impl<T, const MORE: u16, const LAST: u16> Default for StreamOf<T, MORE, LAST> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T, const MORE: u16, const LAST: u16> StreamOf<T, MORE, LAST> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, segment_len: DEFAULT_SEGMENT_LEN }
    }

    /// Sets the number of elements written per segment (at least one).
    pub fn with_segment_len(mut self, segment_len: usize) -> Self {
        self.segment_len = segment_len.clamp(1, u16::MAX as usize);
        self
    }

    pub fn segment_len(&self) -> usize {
        self.segment_len
    }
}

/// Streams compare by their elements; the segmentation is a sending detail.
impl<T: PartialEq, const MORE: u16, const LAST: u16> PartialEq for StreamOf<T, MORE, LAST> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Eq, const MORE: u16, const LAST: u16> Eq for StreamOf<T, MORE, LAST> {}

impl<T, const MORE: u16, const LAST: u16> From<Vec<T>> for StreamOf<T, MORE, LAST> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T: Serialize, const MORE: u16, const LAST: u16> Serialize for StreamOf<T, MORE, LAST> {
    fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
        if self.items.is_empty() {
            dest.write_u16(LAST)?;
            return dest.write_u16(0);
        }
        let mut segments = self.items.chunks(self.segment_len).peekable();
        while let Some(segment) = segments.next() {
            let selector = if segments.peek().is_some() { MORE } else { LAST };
            dest.write_u16(selector)?;
            dest.write_u16(segment.len() as u16)?;
            for item in segment {
                item.serialize(dest)?;
            }
        }

        Ok(())
    }
}

impl<T: Deserialize + Default, const MORE: u16, const LAST: u16> Deserialize
    for StreamOf<T, MORE, LAST>
{
    fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
        self.items.clear();
        loop {
            let selector = src.read_u16()?;
            if selector != MORE && selector != LAST {
                return Err(utils::invalid_data(format!("invalid stream segment selector {selector}")));
            }
            let count = src.read_u16()?;
            for _ in 0..count {
                self.items.push(super::deserialize::<T>(src)?);
            }
            if selector == LAST {
                return Ok(());
            }
        }
    }
}

impl<T: Json + Default, const MORE: u16, const LAST: u16> Json for StreamOf<T, MORE, LAST> {
    fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.items.iter().map(Json::to_json).collect())
    }

    fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
        self.items = utils::json_array(src, "stream")?
            .iter()
            .map(super::from_json::<T>)
            .collect::<WireResult<_>>()?;
        Ok(())
    }
}

impl<T: Dump, const MORE: u16, const LAST: u16> Dump for StreamOf<T, MORE, LAST> {
    fn dump(&self, dest: &mut Dumper) {
        dest.open('{');
        self.items.iter().for_each(|i| dest.item(i));
        dest.close('}');
    }
}
