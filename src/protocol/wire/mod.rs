//! Word-oriented wire streams used by Courier.
//!
//! Courier data is a sequence of 16-bit big-endian words grouped into messages.
//! A message is delimited by an end-of-message mark and tagged with a one-byte
//! stream sub-type (SST) that the underlying Sequenced Packet Protocol carries
//! out of band. The [`WireStream`] trait captures that model:
//!
//! - 8, 16, 32 and 48-bit reads and writes with word-boundary bookkeeping
//! - explicit end-of-message marks and boundary detection
//! - switching the sub-type of outgoing messages
//!
//! Concrete streams adapt the model to different carriers:
//!
//! - [`PacketStream`]: a single fixed-capacity packet
//! - [`BufferStream`]: growable in-memory messages, used to build requests and in tests
//! - [`SppStream`]: a live reliable-stream connection, one segment at a time
//! - [`WordArrayStream`]: read-only view over previously captured words

use thiserror::Error;

mod buffer;
mod packet;
mod spp;
mod words;

pub use buffer::{BufferStream, Message};
pub use packet::PacketStream;
pub use spp::{SppSegment, SppStream, MAX_SEGMENT_DATA_LEN};
pub use words::WordArrayStream;

/// Sub-type of regular Courier messages.
pub const SST_RPC: u8 = 0;
/// Sub-type of bulk data transferred inside or after a call.
pub const SST_BULK_DATA: u8 = 1;
/// Sender-initiated stream shutdown.
pub const SST_END: u8 = 254;
/// Receiver acknowledgement of [`SST_END`].
pub const SST_END_REPLY: u8 = 255;

/// Failures raised while reading or writing a wire stream.
#[derive(Error, Debug)]
pub enum WireError {
    /// A message boundary (or the closure of the transport) was reached
    /// before the requested data was available.
    #[error("end of message")]
    EndOfMessage,

    /// The sink is full or closed.
    #[error("no more write space")]
    NoMoreWriteSpace,

    /// The data on the wire (or in a JSON document) does not fit the expected type.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WireResult<T> = Result<T, WireError>;

/// Pending half-word state of a stream.
///
/// Two consecutive single-byte operations share one word, high byte first.
/// Any wider operation first completes a pending half-word with a padding byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WordAlignment {
    /// A byte was written and the low half of its word is still open.
    pub write_half: bool,
    /// A byte was read and the low half of its word has not been consumed.
    pub read_half: bool,
}

/// Bidirectional byte/word codec with explicit message boundaries.
///
/// Implementors provide raw byte transfer and message framing; the provided
/// methods layer the word alignment rules on top of them.
pub trait WireStream {
    /// Alignment flags of this stream.
    fn alignment(&mut self) -> &mut WordAlignment;

    /// Appends one raw byte to the current outgoing message.
    fn put_byte(&mut self, byte: u8) -> WireResult<()>;

    /// Takes one raw byte from the current incoming message.
    ///
    /// Fails with [`WireError::EndOfMessage`] at a boundary without consuming it.
    fn get_byte(&mut self) -> WireResult<u8>;

    /// Closes the current outgoing message.
    fn write_end_of_message(&mut self) -> WireResult<()>;

    /// Forces a word boundary and transmits pending data without closing the message.
    fn flush(&mut self) -> WireResult<()>;

    /// Sub-type of outgoing messages.
    fn sub_type(&self) -> u8;

    /// Switches the sub-type of outgoing messages.
    ///
    /// When the tag differs from the active one and data is pending, the current
    /// message is closed first. Re-selecting the active tag does nothing.
    fn begin_stream_sub_type(&mut self, sub_type: u8) -> WireResult<()>;

    /// Sub-type of the incoming message currently being read.
    fn inbound_sub_type(&mut self) -> WireResult<u8>;

    /// Checks for a message boundary without consuming it.
    fn peek_at_end(&mut self) -> WireResult<bool>;

    /// Checks for a message boundary and consumes it when present.
    fn is_at_end(&mut self) -> WireResult<bool>;

    /// Discards the rest of the incoming message including its boundary.
    fn drop_to_end_of_message(&mut self, required_sub_type: u8) -> WireResult<()>;

    /// True once the underlying transport is known to be gone.
    fn is_closed(&self) -> bool {
        false
    }

    /// Clears pending half-word state, e.g. after raw byte-level bulk transfer.
    fn reset_alignment(&mut self) {
        *self.alignment() = WordAlignment::default();
    }

    /// Completes a pending outgoing half-word with a zero byte.
    fn align_write(&mut self) -> WireResult<()> {
        if self.alignment().write_half {
            self.put_byte(0)?;
            self.alignment().write_half = false;
        }
        Ok(())
    }

    /// Skips the unread low half of the current incoming word.
    fn align_read(&mut self) -> WireResult<()> {
        if self.alignment().read_half {
            self.get_byte()?;
            self.alignment().read_half = false;
        }
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> WireResult<()> {
        self.put_byte(value)?;
        let alignment = self.alignment();
        alignment.write_half = !alignment.write_half;
        Ok(())
    }

    fn read_u8(&mut self) -> WireResult<u8> {
        let value = self.get_byte()?;
        let alignment = self.alignment();
        alignment.read_half = !alignment.read_half;
        Ok(value)
    }

    fn write_u16(&mut self, value: u16) -> WireResult<()> {
        self.align_write()?;
        value.to_be_bytes().into_iter().try_for_each(|b| self.put_byte(b))
    }

    fn read_u16(&mut self) -> WireResult<u16> {
        self.align_read()?;
        Ok(u16::from_be_bytes([self.get_byte()?, self.get_byte()?]))
    }

    fn write_i16(&mut self, value: i16) -> WireResult<()> {
        self.write_u16(value as u16)
    }

    fn read_i16(&mut self) -> WireResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    fn write_u32(&mut self, value: u32) -> WireResult<()> {
        self.align_write()?;
        value.to_be_bytes().into_iter().try_for_each(|b| self.put_byte(b))
    }

    fn read_u32(&mut self) -> WireResult<u32> {
        self.align_read()?;
        let mut buf = [0_u8; 4];
        for b in buf.iter_mut() {
            *b = self.get_byte()?;
        }
        Ok(u32::from_be_bytes(buf))
    }

    fn write_i32(&mut self, value: i32) -> WireResult<()> {
        self.write_u32(value as u32)
    }

    fn read_i32(&mut self) -> WireResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Writes the low 48 bits of `value` as three words (host numbers).
    fn write_u48(&mut self, value: u64) -> WireResult<()> {
        self.align_write()?;
        value.to_be_bytes()[2..].iter().try_for_each(|b| self.put_byte(*b))
    }

    fn read_u48(&mut self) -> WireResult<u64> {
        self.align_read()?;
        let mut buf = [0_u8; 8];
        for b in buf[2..].iter_mut() {
            *b = self.get_byte()?;
        }
        Ok(u64::from_be_bytes(buf))
    }

    /// Writes raw bytes with byte-level alignment tracking.
    fn write_bytes(&mut self, bytes: &[u8]) -> WireResult<()> {
        bytes.iter().try_for_each(|b| self.write_u8(*b))
    }

    /// Reads `len` raw bytes with byte-level alignment tracking.
    fn read_bytes(&mut self, len: usize) -> WireResult<Vec<u8>> {
        (0..len).map(|_| self.read_u8()).collect()
    }
}
