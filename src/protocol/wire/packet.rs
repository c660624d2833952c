//! Stream over a single fixed-capacity packet.
//!
//! Used where a complete request or response travels in one datagram, e.g. the
//! Packet Exchange flavour of Courier. The packet is exactly one message.

use tracing::warn;

use super::{WireError, WireResult, WireStream, WordAlignment, SST_RPC};

/// Data capacity of one IDP packet.
pub const DEFAULT_PACKET_CAPACITY: usize = 546;

#[derive(Debug)]
pub struct PacketStream {
    alignment: WordAlignment,
    data: Vec<u8>,
    capacity: usize,
    read_pos: usize,
    /// The end of the packet has been read past with [`WireStream::is_at_end`].
    boundary_consumed: bool,
    /// The outgoing message has been closed.
    sealed: bool,
    sub_type: u8,
}

impl PacketStream {
    /// Creates an empty packet for writing up to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alignment: WordAlignment::default(),
            data: Vec::with_capacity(capacity),
            capacity,
            read_pos: 0,
            boundary_consumed: false,
            sealed: false,
            sub_type: SST_RPC,
        }
    }

    /// Wraps a received packet for reading.
    pub fn from_packet(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Self { data, sealed: true, ..Self::with_capacity(capacity) }
    }

    /// True once the packet content is complete.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Default for PacketStream {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PACKET_CAPACITY)
    }
}

impl WireStream for PacketStream {
    fn alignment(&mut self) -> &mut WordAlignment {
        &mut self.alignment
    }

    fn put_byte(&mut self, byte: u8) -> WireResult<()> {
        if self.sealed || self.data.len() >= self.capacity {
            return Err(WireError::NoMoreWriteSpace);
        }
        self.data.push(byte);
        Ok(())
    }

    fn get_byte(&mut self) -> WireResult<u8> {
        if self.boundary_consumed {
            return Err(WireError::EndOfMessage);
        }
        let byte = *self.data.get(self.read_pos).ok_or(WireError::EndOfMessage)?;
        self.read_pos += 1;
        Ok(byte)
    }

    fn write_end_of_message(&mut self) -> WireResult<()> {
        self.sealed = true;
        self.alignment.write_half = false;
        Ok(())
    }

    fn flush(&mut self) -> WireResult<()> {
        self.align_write()
    }

    fn sub_type(&self) -> u8 {
        self.sub_type
    }

    fn begin_stream_sub_type(&mut self, sub_type: u8) -> WireResult<()> {
        if sub_type == self.sub_type {
            return Ok(());
        }
        if !self.data.is_empty() && !self.sealed {
            self.write_end_of_message()?;
        }
        self.sub_type = sub_type;
        Ok(())
    }

    fn inbound_sub_type(&mut self) -> WireResult<u8> {
        Ok(self.sub_type)
    }

    fn peek_at_end(&mut self) -> WireResult<bool> {
        Ok(self.boundary_consumed || self.read_pos >= self.data.len())
    }

    fn is_at_end(&mut self) -> WireResult<bool> {
        if !self.peek_at_end()? {
            return Ok(false);
        }
        self.boundary_consumed = true;
        self.alignment.read_half = false;
        Ok(true)
    }

    fn drop_to_end_of_message(&mut self, required_sub_type: u8) -> WireResult<()> {
        if self.boundary_consumed {
            return Err(WireError::EndOfMessage);
        }
        if self.sub_type != required_sub_type {
            warn!(
                "dropping packet with sub-type {} (expected {})",
                self.sub_type, required_sub_type
            );
        }
        self.read_pos = self.data.len();
        self.boundary_consumed = true;
        self.alignment.read_half = false;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.boundary_consumed
    }
}
