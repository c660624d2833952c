//! Read-only stream over captured 16-bit words.
//!
//! Lets data that was stored as opaque words (e.g. a SEQUENCE OF UNSPECIFIED
//! embedded in another message) be parsed again as typed values.

use byteorder::{BigEndian, ByteOrder};

use super::{PacketStream, WireError, WireResult, WireStream, WordAlignment};

#[derive(Debug)]
pub struct WordArrayStream {
    inner: PacketStream,
}

impl WordArrayStream {
    pub fn new(words: &[u16]) -> Self {
        let mut bytes = vec![0_u8; words.len() * 2];
        BigEndian::write_u16_into(words, &mut bytes);
        Self { inner: PacketStream::from_packet(bytes) }
    }
}

impl WireStream for WordArrayStream {
    fn alignment(&mut self) -> &mut WordAlignment {
        self.inner.alignment()
    }

    fn put_byte(&mut self, _byte: u8) -> WireResult<()> {
        Err(WireError::NoMoreWriteSpace)
    }

    fn get_byte(&mut self) -> WireResult<u8> {
        self.inner.get_byte()
    }

    fn write_end_of_message(&mut self) -> WireResult<()> {
        Err(WireError::NoMoreWriteSpace)
    }

    fn flush(&mut self) -> WireResult<()> {
        Ok(())
    }

    fn sub_type(&self) -> u8 {
        self.inner.sub_type()
    }

    fn begin_stream_sub_type(&mut self, _sub_type: u8) -> WireResult<()> {
        Err(WireError::NoMoreWriteSpace)
    }

    fn inbound_sub_type(&mut self) -> WireResult<u8> {
        self.inner.inbound_sub_type()
    }

    fn peek_at_end(&mut self) -> WireResult<bool> {
        self.inner.peek_at_end()
    }

    fn is_at_end(&mut self) -> WireResult<bool> {
        self.inner.is_at_end()
    }

    fn drop_to_end_of_message(&mut self, required_sub_type: u8) -> WireResult<()> {
        self.inner.drop_to_end_of_message(required_sub_type)
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
