//! Courier message headers.
//!
//! Every Courier message starts with a message type word and the transaction
//! id chosen by the caller:
//!
//! - call: `type=0, transaction, program, version, procedure, <arguments>`
//! - reject: `type=1, transaction, reject code [, lowest version, highest version]`
//! - return: `type=2, transaction, <results>`
//! - abort: `type=3, transaction, error code, <error arguments>`
//!
//! Before the first message of a connection each side sends the range of
//! Courier versions it supports. The program number is a LONG CARDINAL under
//! Courier 3 and a CARDINAL under Courier 2.

use num_derive::{FromPrimitive, ToPrimitive};

use super::{deserialize, CourierEnum, CourierRecord, Serialize};
use crate::protocol::wire::{WireResult, WireStream};

/// Lowest Courier protocol version spoken by this crate.
pub const COURIER_VERSION_LOW: u16 = 2;
/// Highest Courier protocol version spoken by this crate.
pub const COURIER_VERSION_HIGH: u16 = 3;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum MessageType {
    #[default]
    Call = 0,
    Reject = 1,
    Return = 2,
    Abort = 3,
}
CourierEnum!(MessageType, Call, Reject, Return, Abort);

/// Why a call was refused before reaching a procedure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum RejectCode {
    #[default]
    NoSuchProgram = 0,
    /// The program exists, but not in the requested version.
    NoSuchVersion = 1,
    NoSuchProcedure = 2,
    /// The arguments did not match the declared shape, or the
    /// implementation failed in an undeclared way.
    InvalidArguments = 3,
}
CourierEnum!(RejectCode, NoSuchProgram, NoSuchVersion, NoSuchProcedure, InvalidArguments);

/// Inclusive range of versions, used both for the Courier version exchange
/// and for the program versions reported by a "no such version" reject.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionRange {
    pub low: u16,
    pub high: u16,
}
CourierRecord!(VersionRange, low, high);

impl VersionRange {
    pub fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    /// Courier versions supported by this crate.
    pub fn supported() -> Self {
        Self::new(COURIER_VERSION_LOW, COURIER_VERSION_HIGH)
    }

    pub fn overlaps(&self, other: &VersionRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

/// Header of a call message following the message type word.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CallHeader {
    pub transaction: u16,
    pub program: u32,
    pub version: u16,
    pub procedure: u16,
}

/// Reads a version range sent at the beginning of a connection.
pub fn read_versions(src: &mut dyn WireStream) -> WireResult<VersionRange> {
    deserialize(src)
}

/// Sends a version range; does not end the message.
pub fn write_versions(dest: &mut dyn WireStream, range: VersionRange) -> WireResult<()> {
    range.serialize(dest)
}

/// Reads a program number whose width depends on the Courier version.
pub fn read_program_number(src: &mut dyn WireStream, courier_version: u16) -> WireResult<u32> {
    if courier_version == 3 {
        src.read_u32()
    } else {
        Ok(src.read_u16()? as u32)
    }
}

pub fn write_program_number(
    dest: &mut dyn WireStream,
    courier_version: u16,
    program: u32,
) -> WireResult<()> {
    if courier_version == 3 {
        dest.write_u32(program)
    } else {
        dest.write_u16(program as u16)
    }
}

/// Writes a call header including its message type. Arguments follow.
pub fn write_call_header(
    dest: &mut dyn WireStream,
    courier_version: u16,
    header: &CallHeader,
) -> WireResult<()> {
    MessageType::Call.serialize(dest)?;
    dest.write_u16(header.transaction)?;
    write_program_number(dest, courier_version, header.program)?;
    dest.write_u16(header.version)?;
    dest.write_u16(header.procedure)
}

/// Writes a return header. Results and the end of message follow.
pub fn write_return_header(dest: &mut dyn WireStream, transaction: u16) -> WireResult<()> {
    MessageType::Return.serialize(dest)?;
    dest.write_u16(transaction)
}

/// Writes an abort header. Error arguments and the end of message follow.
pub fn write_abort_header(dest: &mut dyn WireStream, transaction: u16, error: u16) -> WireResult<()> {
    MessageType::Abort.serialize(dest)?;
    dest.write_u16(transaction)?;
    dest.write_u16(error)
}

/// Writes a complete reject message.
///
/// `range` is only appended to a "no such version" reject under Courier 3.
pub fn write_reject(
    dest: &mut dyn WireStream,
    transaction: u16,
    code: RejectCode,
    range: Option<VersionRange>,
) -> WireResult<()> {
    MessageType::Reject.serialize(dest)?;
    dest.write_u16(transaction)?;
    code.serialize(dest)?;
    if let Some(range) = range {
        range.serialize(dest)?;
    }
    dest.write_end_of_message()
}

/// Decoded header of a message sent back to a caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplyHeader {
    /// Results follow.
    Return { transaction: u16 },
    /// Error arguments follow.
    Abort { transaction: u16, error: u16 },
    Reject { transaction: u16, code: RejectCode, range: Option<VersionRange> },
}

impl ReplyHeader {
    pub fn transaction(&self) -> u16 {
        match self {
            ReplyHeader::Return { transaction }
            | ReplyHeader::Abort { transaction, .. }
            | ReplyHeader::Reject { transaction, .. } => *transaction,
        }
    }
}

/// Reads the header of a return, abort or reject message.
///
/// The version range of a "no such version" reject is read when the
/// negotiated version is 3.
pub fn read_reply_header(src: &mut dyn WireStream, courier_version: u16) -> WireResult<ReplyHeader> {
    let message_type = deserialize::<MessageType>(src)?;
    let transaction = src.read_u16()?;
    let header = match message_type {
        MessageType::Return => ReplyHeader::Return { transaction },
        MessageType::Abort => ReplyHeader::Abort { transaction, error: src.read_u16()? },
        MessageType::Reject => {
            let code = deserialize::<RejectCode>(src)?;
            let range = if code == RejectCode::NoSuchVersion && courier_version == 3 {
                Some(read_versions(src)?)
            } else {
                None
            };
            ReplyHeader::Reject { transaction, code, range }
        }
        MessageType::Call => {
            return Err(super::utils::invalid_data(format!(
                "expected a reply, found a call with transaction {transaction}"
            )))
        }
    };
    Ok(header)
}
