//! Courier is the remote procedure call protocol of the Xerox Network Systems
//! family. Its data types are built from 16-bit words and are self-contained:
//! a value carries no type information on the wire, so both sides must agree
//! on the shape of every parameter.
//!
//! <https://bitsavers.org/pdf/xerox/xns/XSIS_038112_Courier_The_Remote_Procedure_Call_Protocol_Dec81.pdf>
//!
//! Its Rust-specific implementation is presented below. Where appropriate the
//! Courier types have been replaced by similar Rust types:
//!
//! | Courier            | Rust                                   |
//! |--------------------|----------------------------------------|
//! | `BOOLEAN`          | `bool`                                 |
//! | `CARDINAL`         | `u16`                                  |
//! | `LONG CARDINAL`    | `u32`                                  |
//! | `INTEGER`          | `i16`                                  |
//! | `LONG INTEGER`     | `i32`                                  |
//! | `UNSPECIFIED`      | [`Unspecified`]                        |
//! | `LONG UNSPECIFIED` | [`LongUnspecified`]                    |
//! | `STRING`           | [`CourierString`]                      |
//! | `ARRAY n OF T`     | `[T; n]`                               |
//! | `SEQUENCE n OF T`  | [`Sequence<T, n>`](Sequence)           |
//! | `RECORD []`        | `()`                                   |
//! | stream of `T`      | [`StreamOf<T>`](StreamOf)              |
//!
//! Records, enumerations and choices are plain Rust types that register their
//! member names with the [`CourierRecord!`], [`CourierEnum!`] and
//! [`CourierChoice!`] macros.
//!
//! Every value can be written to and read from a [`WireStream`], converted to
//! and from JSON, and rendered as readable text.

use std::any::Any;
use std::fmt;

use serde_json::Value as JsonValue;

use crate::protocol::wire::{WireResult, WireStream};

pub mod codec;
pub mod message;
mod sequence;
mod stream_of;
mod string;
pub mod utils;

pub use sequence::Sequence;
pub use stream_of::{StreamOf, DEFAULT_SEGMENT_LEN};
pub use string::CourierString;
pub use utils::Dumper;

pub trait Serialize {
    /// Serializes the implementing type to the provided stream.
    ///
    /// ## Parameters
    /// * `dest` - Where will the value be serialized to.
    fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()>;
}

pub trait Deserialize {
    /// Deserializes data from the provided stream into the implementing type.
    ///
    /// ## Parameters
    /// * `src` - From where the value will be deserialized.
    fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()>;
}

/// Textual JSON representation.
pub trait Json {
    fn to_json(&self) -> JsonValue;

    fn from_json(&mut self, src: &JsonValue) -> WireResult<()>;
}

/// Human readable rendering.
pub trait Dump {
    fn dump(&self, dest: &mut Dumper);
}

/// Complete capability set of a Courier value.
///
/// [`Default`] serves as the zero-argument factory: compound values create
/// their members with it before deserializing into them.
pub trait Value: Serialize + Deserialize + Json + Dump + Default + Send + Sync + 'static {}

impl<T> Value for T where T: Serialize + Deserialize + Json + Dump + Default + Send + Sync + 'static {}

/// Deserialization based on the [Default] trait of the type T.
///
/// # Parameters
/// * src - From where the value will be deserialized
pub fn deserialize<T>(src: &mut dyn WireStream) -> WireResult<T>
where
    T: Deserialize + Default,
{
    let mut val = T::default();
    val.deserialize(src)?;

    Ok(val)
}

/// Builds a value of type T from its JSON representation.
pub fn from_json<T>(src: &JsonValue) -> WireResult<T>
where
    T: Json + Default,
{
    let mut val = T::default();
    val.from_json(src)?;

    Ok(val)
}

/// Renders a value as text.
pub fn to_text(value: &dyn Dump) -> String {
    let mut dumper = Dumper::new();
    value.dump(&mut dumper);
    dumper.finish()
}

/// A record raised by a procedure as an application-level error.
///
/// Implemented with [`CourierError!`].
pub trait ErrorRecord: Serialize + Dump + fmt::Debug + Any + Send + Sync {
    /// Numeric error code sent in the abort message.
    fn error_code(&self) -> u16;

    fn as_any(&self) -> &dyn Any;
}

/// Courier `BOOLEAN` serialization implementation.
///
/// Occupies one word, only bit 0 is significant.
impl Serialize for bool {
    fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
        dest.write_u16(if *self { 1 } else { 0 })
    }
}

/// Courier `BOOLEAN` deserialization implementation.
impl Deserialize for bool {
    fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
        *self = src.read_u16()? & 1 == 1;
        Ok(())
    }
}

impl Json for bool {
    fn to_json(&self) -> JsonValue {
        JsonValue::Bool(*self)
    }

    fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
        *self = src
            .as_bool()
            .ok_or_else(|| utils::invalid_data(format!("expected BOOLEAN, found {src}")))?;
        Ok(())
    }
}

impl Dump for bool {
    fn dump(&self, dest: &mut Dumper) {
        dest.text(self);
    }
}

/// Implements the capability set for the integral Courier types.
macro_rules! impl_integer {
    (@wire $t:ty, $write:ident, $read:ident) => {
        impl Serialize for $t {
            fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
                dest.$write(*self)
            }
        }

        impl Deserialize for $t {
            fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
                *self = src.$read()?;
                Ok(())
            }
        }

        impl Dump for $t {
            fn dump(&self, dest: &mut Dumper) {
                dest.text(self);
            }
        }
    };
    ($t:ty, $courier:literal, $write:ident, $read:ident, unsigned) => {
        impl_integer!(@wire $t, $write, $read);

        impl Json for $t {
            fn to_json(&self) -> JsonValue {
                JsonValue::from(*self)
            }

            fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
                *self = utils::json_unsigned(src, <$t>::MAX as u64, $courier)? as $t;
                Ok(())
            }
        }
    };
    ($t:ty, $courier:literal, $write:ident, $read:ident, signed) => {
        impl_integer!(@wire $t, $write, $read);

        impl Json for $t {
            fn to_json(&self) -> JsonValue {
                JsonValue::from(*self)
            }

            fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
                *self = utils::json_signed(src, <$t>::MIN as i64, <$t>::MAX as i64, $courier)? as $t;
                Ok(())
            }
        }
    };
}

impl_integer!(u16, "CARDINAL", write_u16, read_u16, unsigned);
impl_integer!(u32, "LONG CARDINAL", write_u32, read_u32, unsigned);
impl_integer!(i16, "INTEGER", write_i16, read_i16, signed);
impl_integer!(i32, "LONG INTEGER", write_i32, read_i32, signed);

/// Courier `UNSPECIFIED`: one word without interpretation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Unspecified(pub u16);

/// Courier `LONG UNSPECIFIED`: two words without interpretation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LongUnspecified(pub u32);

macro_rules! impl_unspecified {
    ($t:ident, $inner:ty) => {
        impl Serialize for $t {
            fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
                self.0.serialize(dest)
            }
        }

        impl Deserialize for $t {
            fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
                self.0.deserialize(src)
            }
        }

        impl Json for $t {
            fn to_json(&self) -> JsonValue {
                self.0.to_json()
            }

            fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
                self.0.from_json(src)
            }
        }

        impl Dump for $t {
            fn dump(&self, dest: &mut Dumper) {
                dest.text(format_args!("{:#x}", self.0));
            }
        }

        impl From<$inner> for $t {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

impl_unspecified!(Unspecified, u16);
impl_unspecified!(LongUnspecified, u32);

/// Courier `ARRAY n OF T` serialization implementation.
///
/// The length is part of the type and is not transmitted.
impl<const N: usize, T: Serialize> Serialize for [T; N] {
    fn serialize(&self, dest: &mut dyn WireStream) -> WireResult<()> {
        for i in self {
            i.serialize(dest)?;
        }

        Ok(())
    }
}

/// Courier `ARRAY n OF T` deserialization implementation.
impl<const N: usize, T: Deserialize> Deserialize for [T; N] {
    fn deserialize(&mut self, src: &mut dyn WireStream) -> WireResult<()> {
        for i in self {
            i.deserialize(src)?;
        }

        Ok(())
    }
}

impl<const N: usize, T: Json> Json for [T; N] {
    fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.iter().map(Json::to_json).collect())
    }

    fn from_json(&mut self, src: &JsonValue) -> WireResult<()> {
        let items = utils::json_array(src, "ARRAY")?;
        if items.len() != N {
            return Err(utils::invalid_data(format!(
                "ARRAY needs {N} elements, found {}",
                items.len()
            )));
        }
        for (item, json) in self.iter_mut().zip(items) {
            item.from_json(json)?;
        }

        Ok(())
    }
}

impl<const N: usize, T: Dump> Dump for [T; N] {
    fn dump(&self, dest: &mut Dumper) {
        dest.open('{');
        self.iter().for_each(|i| dest.item(i));
        dest.close('}');
    }
}

/// The empty record, e.g. parameters of a procedure without arguments.
impl Serialize for () {
    fn serialize(&self, _dest: &mut dyn WireStream) -> WireResult<()> {
        Ok(())
    }
}

impl Deserialize for () {
    fn deserialize(&mut self, _src: &mut dyn WireStream) -> WireResult<()> {
        Ok(())
    }
}

impl Json for () {
    fn to_json(&self) -> JsonValue {
        JsonValue::Object(serde_json::Map::new())
    }

    fn from_json(&mut self, _src: &JsonValue) -> WireResult<()> {
        Ok(())
    }
}

impl Dump for () {
    fn dump(&self, dest: &mut Dumper) {
        dest.text("[]");
    }
}

/// Implements the Courier capability set for a record.
///
/// Members are serialized in the listed order; the listed names are used for
/// JSON keys and text rendering.
///
/// ```ignore
/// struct TimeInfo { time: u32, offset: i16 }
/// CourierRecord!(TimeInfo, time, offset);
/// ```
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! CourierRecord {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::protocol::courier::Serialize for $t {
            fn serialize(
                &self,
                dest: &mut dyn $crate::protocol::wire::WireStream,
            ) -> $crate::protocol::wire::WireResult<()> {
                $($crate::protocol::courier::Serialize::serialize(&self.$element, dest)?;)*
                Ok(())
            }
        }

        impl $crate::protocol::courier::Deserialize for $t {
            fn deserialize(
                &mut self,
                src: &mut dyn $crate::protocol::wire::WireStream,
            ) -> $crate::protocol::wire::WireResult<()> {
                $($crate::protocol::courier::Deserialize::deserialize(&mut self.$element, src)?;)*
                Ok(())
            }
        }

        impl $crate::protocol::courier::Json for $t {
            fn to_json(&self) -> $crate::__macro_support::serde_json::Value {
                #[allow(unused_mut)]
                let mut members = $crate::__macro_support::serde_json::Map::new();
                $(members.insert(
                    stringify!($element).to_string(),
                    $crate::protocol::courier::Json::to_json(&self.$element),
                );)*
                $crate::__macro_support::serde_json::Value::Object(members)
            }

            fn from_json(
                &mut self,
                src: &$crate::__macro_support::serde_json::Value,
            ) -> $crate::protocol::wire::WireResult<()> {
                #[allow(unused_variables)]
                let members = src.as_object().ok_or_else(|| {
                    $crate::protocol::courier::utils::invalid_data(format!(
                        "expected {} record, found {}",
                        stringify!($t),
                        src
                    ))
                })?;
                $(
                    let member = members.get(stringify!($element)).ok_or_else(|| {
                        $crate::protocol::courier::utils::invalid_data(format!(
                            "{} record lacks member {}",
                            stringify!($t),
                            stringify!($element)
                        ))
                    })?;
                    $crate::protocol::courier::Json::from_json(&mut self.$element, member)?;
                )*
                Ok(())
            }
        }

        impl $crate::protocol::courier::Dump for $t {
            fn dump(&self, dest: &mut $crate::protocol::courier::Dumper) {
                dest.open('[');
                $(dest.field(stringify!($element), &self.$element);)*
                dest.close(']');
            }
        }
    };
}

/// Implements the Courier capability set for an enumeration.
///
/// The enumeration must derive `FromPrimitive` and `ToPrimitive`; its
/// discriminants are the 16-bit wire codes and may be sparse. Every variant
/// has to be listed, the names are used for JSON and text.
///
/// ```ignore
/// #[derive(Clone, Copy, Debug, Default, FromPrimitive, ToPrimitive)]
/// #[repr(u16)]
/// enum Direction { #[default] West = 0, East = 1 }
/// CourierEnum!(Direction, West, East);
/// ```
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! CourierEnum {
    (
        $t:ident,
        $($variant:ident),+
    ) => {
        impl $t {
            /// Name of the value as declared.
            pub fn name(&self) -> &'static str {
                match self {
                    $($t::$variant => stringify!($variant),)+
                }
            }
        }

        impl $crate::protocol::courier::Serialize for $t {
            fn serialize(
                &self,
                dest: &mut dyn $crate::protocol::wire::WireStream,
            ) -> $crate::protocol::wire::WireResult<()> {
                match $crate::__macro_support::num_traits::ToPrimitive::to_u16(self) {
                    Some(code) => dest.write_u16(code),
                    None => Err($crate::protocol::courier::utils::invalid_data(format!(
                        "{} value {} has no 16-bit code",
                        stringify!($t),
                        self.name()
                    ))),
                }
            }
        }

        impl $crate::protocol::courier::Deserialize for $t {
            fn deserialize(
                &mut self,
                src: &mut dyn $crate::protocol::wire::WireStream,
            ) -> $crate::protocol::wire::WireResult<()> {
                let code = src.read_u16()?;
                match <$t as $crate::__macro_support::num_traits::FromPrimitive>::from_u16(code) {
                    Some(val) => {
                        *self = val;
                        Ok(())
                    }
                    None => Err($crate::protocol::courier::utils::invalid_data(format!(
                        "invalid {} code {}",
                        stringify!($t),
                        code
                    ))),
                }
            }
        }

        impl $crate::protocol::courier::Json for $t {
            fn to_json(&self) -> $crate::__macro_support::serde_json::Value {
                $crate::__macro_support::serde_json::Value::String(self.name().to_string())
            }

            fn from_json(
                &mut self,
                src: &$crate::__macro_support::serde_json::Value,
            ) -> $crate::protocol::wire::WireResult<()> {
                *self = match src.as_str() {
                    $(Some(stringify!($variant)) => $t::$variant,)+
                    _ => {
                        return Err($crate::protocol::courier::utils::invalid_data(format!(
                            "invalid {} name {}",
                            stringify!($t),
                            src
                        )))
                    }
                };
                Ok(())
            }
        }

        impl $crate::protocol::courier::Dump for $t {
            fn dump(&self, dest: &mut $crate::protocol::courier::Dumper) {
                dest.text(self.name());
            }
        }
    };
}

/// Implements the Courier capability set for a choice (tagged union).
///
/// The choice is a Rust enum whose variants each wrap one record and are named
/// like the variants of the discriminating enumeration `$kind`. On the wire the
/// discriminator precedes the selected record. Discriminator values without a
/// variant in the choice are rejected when reading.
///
/// ```ignore
/// enum Credentials { Simple(SimpleCredentials), Strong(StrongCredentials) }
/// CourierChoice!(Credentials, CredentialsType, Simple, Strong);
/// ```
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! CourierChoice {
    (
        $t:ident,
        $kind:ident,
        $($variant:ident),+
    ) => {
        impl $t {
            /// Discriminator of the active variant.
            pub fn kind(&self) -> $kind {
                match self {
                    $($t::$variant(_) => $kind::$variant,)+
                }
            }
        }

        impl $crate::protocol::courier::Serialize for $t {
            fn serialize(
                &self,
                dest: &mut dyn $crate::protocol::wire::WireStream,
            ) -> $crate::protocol::wire::WireResult<()> {
                $crate::protocol::courier::Serialize::serialize(&self.kind(), dest)?;
                match self {
                    $($t::$variant(v) => $crate::protocol::courier::Serialize::serialize(v, dest),)+
                }
            }
        }

        impl $crate::protocol::courier::Deserialize for $t {
            fn deserialize(
                &mut self,
                src: &mut dyn $crate::protocol::wire::WireStream,
            ) -> $crate::protocol::wire::WireResult<()> {
                let kind = $crate::protocol::courier::deserialize::<$kind>(src)?;
                *self = match kind {
                    $($kind::$variant => $t::$variant($crate::protocol::courier::deserialize(src)?),)+
                    #[allow(unreachable_patterns)]
                    other => {
                        return Err($crate::protocol::courier::utils::invalid_data(format!(
                            "{} has no variant for {}",
                            stringify!($t),
                            other.name()
                        )))
                    }
                };
                Ok(())
            }
        }

        impl $crate::protocol::courier::Json for $t {
            fn to_json(&self) -> $crate::__macro_support::serde_json::Value {
                let mut choice = $crate::__macro_support::serde_json::Map::new();
                match self {
                    $($t::$variant(v) => {
                        choice.insert(
                            stringify!($variant).to_string(),
                            $crate::protocol::courier::Json::to_json(v),
                        );
                    })+
                }
                $crate::__macro_support::serde_json::Value::Object(choice)
            }

            #[allow(irrefutable_let_patterns)]
            fn from_json(
                &mut self,
                src: &$crate::__macro_support::serde_json::Value,
            ) -> $crate::protocol::wire::WireResult<()> {
                let invalid = || {
                    $crate::protocol::courier::utils::invalid_data(format!(
                        "expected {} choice, found {}",
                        stringify!($t),
                        src
                    ))
                };
                let choice = src.as_object().filter(|c| c.len() == 1).ok_or_else(invalid)?;
                let (name, value) = choice.iter().next().ok_or_else(invalid)?;
                *self = match name.as_str() {
                    $(stringify!($variant) => {
                        let mut selected = $t::$variant(Default::default());
                        if let $t::$variant(v) = &mut selected {
                            $crate::protocol::courier::Json::from_json(v, value)?;
                        }
                        selected
                    })+
                    _ => return Err(invalid()),
                };
                Ok(())
            }
        }

        impl $crate::protocol::courier::Dump for $t {
            fn dump(&self, dest: &mut $crate::protocol::courier::Dumper) {
                match self {
                    $($t::$variant(v) => {
                        dest.text(concat!(stringify!($variant), " => "));
                        $crate::protocol::courier::Dump::dump(v, dest);
                    })+
                }
            }
        }
    };
}

/// Implements [`ErrorRecord`] for a record raised as an application error.
///
/// ```ignore
/// CourierError!(AccessError, 2);
/// ```
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! CourierError {
    ($t:ident, $code:expr) => {
        impl $crate::protocol::courier::ErrorRecord for $t {
            fn error_code(&self) -> u16 {
                $code
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
    };
}

// Re-export public macros for use in other modules
pub use crate::CourierChoice;
pub use crate::CourierEnum;
pub use crate::CourierError;
pub use crate::CourierRecord;
