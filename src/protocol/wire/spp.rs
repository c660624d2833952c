//! Stream backed by a live Sequenced Packet Protocol connection.
//!
//! The reliability engine (retransmission, windowing) lives outside this crate;
//! it hands in-order segments over an inbound channel and accepts outgoing
//! segments on an outbound channel. Reads and writes block the calling thread,
//! so an `SppStream` must be driven from a blocking context such as
//! `tokio::task::spawn_blocking`.
//!
//! Closure of either channel surfaces as [`WireError::EndOfMessage`] on reads
//! and [`WireError::NoMoreWriteSpace`] on writes, so a dropped connection never
//! leaves a reader hanging.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{WireError, WireResult, WireStream, WordAlignment, SST_END, SST_END_REPLY, SST_RPC};

/// Largest data payload of one SPP segment.
pub const MAX_SEGMENT_DATA_LEN: usize = 534;

/// One unit of data exchanged with the reliable-stream transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SppSegment {
    pub sub_type: u8,
    pub end_of_message: bool,
    pub data: Bytes,
}

impl SppSegment {
    pub fn new(sub_type: u8, end_of_message: bool, data: impl Into<Bytes>) -> Self {
        Self { sub_type, end_of_message, data: data.into() }
    }
}

#[derive(Debug)]
pub struct SppStream {
    alignment: WordAlignment,
    inbound: mpsc::Receiver<SppSegment>,
    outbound: mpsc::Sender<SppSegment>,
    current: Option<SppSegment>,
    read_pos: usize,
    pending: BytesMut,
    sub_type: u8,
    max_segment_len: usize,
    closed: bool,
}

impl SppStream {
    pub fn new(inbound: mpsc::Receiver<SppSegment>, outbound: mpsc::Sender<SppSegment>) -> Self {
        Self::with_max_segment_len(inbound, outbound, MAX_SEGMENT_DATA_LEN)
    }

    pub fn with_max_segment_len(
        inbound: mpsc::Receiver<SppSegment>,
        outbound: mpsc::Sender<SppSegment>,
        max_segment_len: usize,
    ) -> Self {
        Self {
            alignment: WordAlignment::default(),
            inbound,
            outbound,
            current: None,
            read_pos: 0,
            pending: BytesMut::with_capacity(max_segment_len),
            sub_type: SST_RPC,
            max_segment_len: max_segment_len.max(2),
            closed: false,
        }
    }

    /// Starts the cooperative shutdown by sending an "end" segment.
    pub fn close(&mut self) -> WireResult<()> {
        if self.closed {
            return Ok(());
        }
        self.send(SppSegment::new(SST_END, true, Bytes::new()))?;
        self.closed = true;
        Ok(())
    }

    fn send(&mut self, segment: SppSegment) -> WireResult<()> {
        if self.closed {
            return Err(WireError::NoMoreWriteSpace);
        }
        trace!(
            "sending segment sst:{} eom:{} len:{}",
            segment.sub_type,
            segment.end_of_message,
            segment.data.len()
        );
        self.outbound.blocking_send(segment).map_err(|_| {
            self.closed = true;
            WireError::NoMoreWriteSpace
        })
    }

    fn send_pending(&mut self, end_of_message: bool) -> WireResult<()> {
        let data = self.pending.split().freeze();
        self.send(SppSegment { sub_type: self.sub_type, end_of_message, data })
    }

    /// Makes sure an inbound segment is available, waiting for the transport if needed.
    fn fill(&mut self) -> WireResult<()> {
        if self.current.is_none() {
            if self.closed {
                return Err(WireError::EndOfMessage);
            }
            let Some(segment) = self.inbound.blocking_recv() else {
                debug!("transport closed while waiting for data");
                self.closed = true;
                return Err(WireError::EndOfMessage);
            };
            trace!(
                "received segment sst:{} eom:{} len:{}",
                segment.sub_type,
                segment.end_of_message,
                segment.data.len()
            );
            match segment.sub_type {
                SST_END => {
                    debug!("peer requested end of stream");
                    // best effort, the peer may already be gone
                    let _ = self.send(SppSegment::new(SST_END_REPLY, true, Bytes::new()));
                    self.closed = true;
                    return Err(WireError::EndOfMessage);
                }
                SST_END_REPLY => {
                    self.closed = true;
                    return Err(WireError::EndOfMessage);
                }
                _ => {}
            }
            self.current = Some(segment);
            self.read_pos = 0;
        }
        Ok(())
    }

    fn segment(&self) -> WireResult<&SppSegment> {
        self.current.as_ref().ok_or(WireError::EndOfMessage)
    }

    fn next_segment(&mut self) {
        self.current = None;
        self.read_pos = 0;
    }

    fn consume_boundary(&mut self) {
        self.next_segment();
        self.alignment.read_half = false;
    }
}

impl WireStream for SppStream {
    fn alignment(&mut self) -> &mut WordAlignment {
        &mut self.alignment
    }

    fn put_byte(&mut self, byte: u8) -> WireResult<()> {
        if self.closed {
            return Err(WireError::NoMoreWriteSpace);
        }
        if self.pending.len() >= self.max_segment_len {
            self.send_pending(false)?;
        }
        self.pending.extend_from_slice(&[byte]);
        Ok(())
    }

    fn get_byte(&mut self) -> WireResult<u8> {
        loop {
            self.fill()?;
            let segment = self.segment()?;
            if let Some(byte) = segment.data.get(self.read_pos).copied() {
                self.read_pos += 1;
                return Ok(byte);
            }
            if segment.end_of_message {
                return Err(WireError::EndOfMessage);
            }
            self.next_segment();
        }
    }

    fn write_end_of_message(&mut self) -> WireResult<()> {
        self.send_pending(true)?;
        self.alignment.write_half = false;
        Ok(())
    }

    fn flush(&mut self) -> WireResult<()> {
        self.align_write()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        self.send_pending(false)
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
        self.fill()?;
        Ok(self.segment()?.sub_type)
    }

    fn peek_at_end(&mut self) -> WireResult<bool> {
        loop {
            match self.fill() {
                Ok(()) => {}
                Err(WireError::EndOfMessage) if self.closed => return Ok(true),
                Err(e) => return Err(e),
            }
            let segment = self.segment()?;
            if self.read_pos < segment.data.len() {
                return Ok(false);
            }
            if segment.end_of_message {
                return Ok(true);
            }
            self.next_segment();
        }
    }

    fn is_at_end(&mut self) -> WireResult<bool> {
        if !self.peek_at_end()? {
            return Ok(false);
        }
        if !self.closed {
            self.consume_boundary();
        }
        Ok(true)
    }

    fn drop_to_end_of_message(&mut self, required_sub_type: u8) -> WireResult<()> {
        loop {
            self.fill()?;
            let segment = self.segment()?;
            if segment.sub_type != required_sub_type {
                warn!(
                    "dropping segment with sub-type {} (expected {})",
                    segment.sub_type, required_sub_type
                );
            }
            let end_of_message = segment.end_of_message;
            self.next_segment();
            if end_of_message {
                self.alignment.read_half = false;
                return Ok(());
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
