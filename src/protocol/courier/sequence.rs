use std::ops::{Deref, DerefMut};

use serde_json::Value as JsonValue;
use tracing::warn;

use super::{utils, Deserialize, Dump, Dumper, Json, Serialize};
use crate::protocol::wire::{WireResult, WireStream};

/// Courier `SEQUENCE n OF T`: a count word followed by the elements.
///
/// `MAX` is the declared maximum length. Elements received beyond it are read
/// (to keep the stream in step) and discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence<T, const MAX: usize = 65535>(pub Vec<T>);

impl<T, const MAX: usize> Default for Sequence<T, MAX> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T, const MAX: usize> Sequence<T, MAX> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T, const MAX: usize> Deref for Sequence<T, MAX> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T, const MAX: usize> DerefMut for Sequence<T, MAX> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.0
    }
}

impl<T, const MAX: usize> From<Vec<T>> for Sequence<T, MAX> {
    fn from(items: Vec<T>) -> Self {
        Self(items)
    }
}

impl<T: Serialize, const MAX: usize> Serialize for Sequence<T, MAX> {
    fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
        let limit = MAX.min(u16::MAX as usize);
        if self.0.len() > limit {
            return Err(utils::invalid_data(format!(
                "sequence of {} elements exceeds its maximum {}",
                self.0.len(),
                limit
            )));
        }
        dest.write_u16(self.0.len() as u16)?;
        for item in &self.0 {
            item.serialize(dest)?;
        }

        Ok(())
    }
}

impl<T: Deserialize + Default, const MAX: usize> Deserialize for Sequence<T, MAX> {
    fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
        let count = src.read_u16()? as usize;
        if count > MAX {
            warn!("received sequence of {} elements, keeping the first {}", count, MAX);
        }
        self.0.clear();
        self.0.reserve(count.min(MAX));
        for i in 0..count {
            let item = super::deserialize::<T>(src)?;
            if i < MAX {
                self.0.push(item);
            }
        }

        Ok(())
    }
}

impl<T: Json + Default, const MAX: usize> Json for Sequence<T, MAX> {
    fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.0.iter().map(Json::to_json).collect())
    }

    fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
        let items = utils::json_array(src, "SEQUENCE")?;
        if items.len() > MAX {
            return Err(utils::invalid_data(format!(
                "SEQUENCE allows at most {MAX} elements, found {}",
                items.len()
            )));
        }
        self.0 = items.iter().map(super::from_json::<T>).collect::<WireResult<_>>()?;

        Ok(())
    }
}

impl<T: Dump, const MAX: usize> Dump for Sequence<T, MAX> {
    fn dump(&self, dest: &mut Dumper) {
        dest.open('{');
        self.0.iter().for_each(|i| dest.item(i));
        dest.close('}');
    }
}
