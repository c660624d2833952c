//! Growable in-memory stream.
//!
//! Incoming data is a queue of complete messages, outgoing data is collected
//! into messages as they are closed. Requests are built here before they are
//! handed to a transport, and tests drive whole connections through it.

use std::collections::VecDeque;

use super::{WireError, WireResult, WireStream, WordAlignment, SST_RPC};

/// One complete message together with its stream sub-type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub sub_type: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(sub_type: u8, data: Vec<u8>) -> Self {
        Self { sub_type, data }
    }
}

#[derive(Debug, Default)]
pub struct BufferStream {
    alignment: WordAlignment,
    inbound: VecDeque<Message>,
    read_pos: usize,
    outbound: Vec<Message>,
    pending: Vec<u8>,
    sub_type: u8,
}

impl BufferStream {
    /// Creates an empty stream writing [`SST_RPC`] messages.
    pub fn new() -> Self {
        Self { sub_type: SST_RPC, ..Default::default() }
    }

    /// Creates a stream whose reads are served from `messages` in order.
    pub fn with_inbound(messages: impl IntoIterator<Item = Message>) -> Self {
        Self { inbound: messages.into_iter().collect(), ..Self::new() }
    }

    /// Queues another message for reading.
    pub fn push_inbound(&mut self, message: Message) {
        self.inbound.push_back(message);
    }

    /// Messages closed so far.
    pub fn outbound(&self) -> &[Message] {
        &self.outbound
    }

    /// Takes the closed messages; data of an unclosed message stays pending.
    pub fn take_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbound)
    }

    /// Bytes written to the message that is not closed yet.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    fn current(&self) -> WireResult<&Message> {
        self.inbound.front().ok_or(WireError::EndOfMessage)
    }

    fn consume_boundary(&mut self) {
        self.inbound.pop_front();
        self.read_pos = 0;
        self.alignment.read_half = false;
    }
}

impl WireStream for BufferStream {
    fn alignment(&mut self) -> &mut WordAlignment {
        &mut self.alignment
    }

    fn put_byte(&mut self, byte: u8) -> WireResult<()> {
        self.pending.push(byte);
        Ok(())
    }

    fn get_byte(&mut self) -> WireResult<u8> {
        let byte = self.current()?.data.get(self.read_pos).copied();
        match byte {
            Some(byte) => {
                self.read_pos += 1;
                Ok(byte)
            }
            None => Err(WireError::EndOfMessage),
        }
    }

    fn write_end_of_message(&mut self) -> WireResult<()> {
        let data = std::mem::take(&mut self.pending);
        self.outbound.push(Message { sub_type: self.sub_type, data });
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
        if !self.pending.is_empty() {
            self.write_end_of_message()?;
        }
        self.sub_type = sub_type;
        Ok(())
    }

    fn inbound_sub_type(&mut self) -> WireResult<u8> {
        Ok(self.current()?.sub_type)
    }

    fn peek_at_end(&mut self) -> WireResult<bool> {
        match self.inbound.front() {
            Some(message) => Ok(self.read_pos >= message.data.len()),
            None => Ok(true),
        }
    }

    fn is_at_end(&mut self) -> WireResult<bool> {
        if !self.peek_at_end()? {
            return Ok(false);
        }
        if !self.inbound.is_empty() {
            self.consume_boundary();
        }
        Ok(true)
    }

    fn drop_to_end_of_message(&mut self, required_sub_type: u8) -> WireResult<()> {
        let sub_type = self.current()?.sub_type;
        if sub_type != required_sub_type {
            tracing::warn!(
                "dropping message with sub-type {} (expected {})",
                sub_type,
                required_sub_type
            );
        }
        self.consume_boundary();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inbound.is_empty()
    }
}
