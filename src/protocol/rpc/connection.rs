//! Server side of one Courier connection.
//!
//! A connection starts with the exchange of supported Courier versions. The
//! caller's range is read once; the negotiated version is the highest one both
//! sides support and is echoed back as a one-version range in front of the
//! first reply. After that every message is a call that is routed through the
//! [`Registry`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::{ConnectionClient, Transaction};
use super::registry::Registry;
use crate::protocol::courier::message::{
    self, MessageType, RejectCode, VersionRange, COURIER_VERSION_HIGH,
};
use crate::protocol::wire::{WireError, WireResult, WireStream, SST_RPC};

pub struct CourierConnection {
    registry: Arc<Registry>,
    connection_id: Arc<str>,
    courier_version: u16,
    /// The caller's version range has not been read yet.
    needs_versions: bool,
    /// The negotiated version has not been echoed yet.
    must_send_versions: bool,
}

impl CourierConnection {
    pub fn new(registry: Arc<Registry>, connection_id: impl Into<Arc<str>>) -> Self {
        Self {
            registry,
            connection_id: connection_id.into(),
            courier_version: COURIER_VERSION_HIGH,
            needs_versions: true,
            must_send_versions: true,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Negotiated Courier version, once the version exchange succeeded.
    pub fn courier_version(&self) -> Option<u16> {
        (!self.needs_versions).then_some(self.courier_version)
    }

    /// Reads one call from `stream` and writes its reply.
    ///
    /// Protocol violations are answered with a reject and leave the connection
    /// usable. Errors are failures of the stream itself.
    ///
    /// # Returns
    ///
    /// The client a procedure handed the transport to, if any.
    pub fn process_single_call(
        &mut self,
        stream: &mut dyn WireStream,
    ) -> WireResult<Option<Box<dyn ConnectionClient>>> {
        stream.begin_stream_sub_type(SST_RPC)?;

        let mut negotiated = false;
        if self.needs_versions {
            let offered = message::read_versions(stream)?;
            let supported = VersionRange::supported();
            if !offered.overlaps(&supported) {
                skip_empty_message(stream)?;
                let _message_type = stream.read_u16()?;
                let transaction = stream.read_u16()?;
                warn!(
                    "{}: offered Courier versions {}..={} are not supported",
                    self.connection_id, offered.low, offered.high
                );
                stream.drop_to_end_of_message(SST_RPC)?;
                message::write_reject(stream, transaction, RejectCode::NoSuchProgram, None)?;
                return Ok(None);
            }
            self.courier_version = offered.high.min(supported.high);
            self.needs_versions = false;
            negotiated = true;
            debug!("{}: negotiated Courier version {}", self.connection_id, self.courier_version);
        }

        if self.must_send_versions {
            let echo = VersionRange::new(self.courier_version, self.courier_version);
            message::write_versions(stream, echo)?;
            stream.flush()?;
            self.must_send_versions = false;
        }
        if negotiated {
            skip_empty_message(stream)?;
        }

        let message_type = stream.read_u16()?;
        let id = stream.read_u16()?;
        if message_type != MessageType::Call as u16 {
            warn!(
                "{}: expected a call, found message type {} (transaction {})",
                self.connection_id, message_type, id
            );
            stream.drop_to_end_of_message(SST_RPC)?;
            message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
            return Ok(None);
        }

        let transaction = Transaction {
            courier_version: self.courier_version,
            id,
            connection_id: self.connection_id.clone(),
        };
        self.registry.dispatch(&transaction, stream)
    }

    /// Serves calls until the transport closes.
    ///
    /// A truncated message is dropped and serving continues. When a procedure
    /// hands the transport off, the client runs to completion before the next
    /// call is read.
    pub fn serve(&mut self, stream: &mut dyn WireStream) -> anyhow::Result<()> {
        info!("{}: serving Courier connection", self.connection_id);
        while !stream.is_closed() {
            match self.process_single_call(stream) {
                Ok(None) => {}
                Ok(Some(client)) => {
                    debug!("{}: transport handed off", self.connection_id);
                    client.take_over(stream)?;
                    stream.reset_alignment();
                }
                Err(_) if stream.is_closed() => break,
                Err(WireError::EndOfMessage) => {
                    warn!("{}: message ended early, dropping it", self.connection_id);
                    stream.drop_to_end_of_message(SST_RPC)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!("{}: Courier connection closed", self.connection_id);
        Ok(())
    }
}

/// Consumes the end of a version range sent as a message of its own.
///
/// Some clients follow such a range with an empty message, which is
/// discarded as well.
fn skip_empty_message(stream: &mut dyn WireStream) -> WireResult<()> {
    if !at_open_boundary(stream)? {
        return Ok(());
    }
    stream.is_at_end()?;
    if at_open_boundary(stream)? {
        debug!("skipping empty message after version exchange");
        stream.is_at_end()?;
    }
    Ok(())
}

fn at_open_boundary(stream: &mut dyn WireStream) -> WireResult<bool> {
    Ok(stream.peek_at_end()? && !stream.is_closed())
}
