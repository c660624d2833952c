//! Per-call state handed to procedure implementations.
//!
//! A [`CallContext`] lives for the duration of one procedure invocation. Besides
//! identifying the call it gives the implementation controlled access to the
//! transport:
//!
//! - bulk data can be sent or received on the bulk data sub-type while the call
//!   is in progress
//! - a [`ConnectionClient`] can be registered to take the transport over once
//!   the reply has been sent

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::protocol::courier::utils::invalid_data;
use crate::protocol::wire::{WireResult, WireStream, SST_BULK_DATA, SST_RPC};

/// Identity of one call on a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Courier version negotiated for the connection
    pub courier_version: u16,
    /// Transaction id chosen by the caller, echoed in the reply
    pub id: u16,
    /// Diagnostic name of the connection (usually the peer address)
    pub connection_id: Arc<str>,
}

/// A subsystem that takes over a transport after a call has been answered.
///
/// While `take_over` runs, the connection does not read Courier messages from
/// the stream. When it returns, the connection resumes with the next call.
pub trait ConnectionClient: Send {
    fn take_over(self: Box<Self>, stream: &mut dyn WireStream) -> anyhow::Result<()>;
}

/// Execution context of a single procedure call
pub struct CallContext<'a> {
    transaction: &'a Transaction,
    stream: &'a mut dyn WireStream,
    hand_off: Option<Box<dyn ConnectionClient>>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(transaction: &'a Transaction, stream: &'a mut dyn WireStream) -> Self {
        Self { transaction, stream, hand_off: None }
    }

    pub fn courier_version(&self) -> u16 {
        self.transaction.courier_version
    }

    pub fn transaction_id(&self) -> u16 {
        self.transaction.id
    }

    pub fn connection_id(&self) -> &str {
        &self.transaction.connection_id
    }

    /// Hands the transport to `client` once the reply has been sent.
    ///
    /// The hand-off only happens when the procedure returns normally. A later
    /// call replaces an earlier registration.
    pub fn hand_off(&mut self, client: impl ConnectionClient + 'static) {
        self.hand_off = Some(Box::new(client));
    }

    pub(crate) fn take_hand_off(&mut self) -> Option<Box<dyn ConnectionClient>> {
        self.hand_off.take()
    }

    /// Sends `data` as one bulk data message, then switches back to the RPC
    /// sub-type so the reply can follow.
    pub fn send_bulk_data(&mut self, data: &[u8]) -> WireResult<()> {
        debug!("{}: sending {} bytes of bulk data", self.transaction.connection_id, data.len());
        self.stream.begin_stream_sub_type(SST_BULK_DATA)?;
        self.stream.write_bytes(data)?;
        self.stream.write_end_of_message()?;
        self.stream.begin_stream_sub_type(SST_RPC)?;
        self.stream.reset_alignment();
        Ok(())
    }

    /// Receives the bulk data message the caller sent after the call message.
    pub fn receive_bulk_data(&mut self) -> WireResult<Vec<u8>> {
        let sub_type = self.stream.inbound_sub_type()?;
        if sub_type != SST_BULK_DATA {
            return Err(invalid_data(format!("expected bulk data, found sub-type {sub_type}")));
        }
        let mut data = Vec::new();
        while !self.stream.is_at_end()? {
            data.push(self.stream.get_byte()?);
        }
        self.stream.reset_alignment();
        debug!("{}: received {} bytes of bulk data", self.transaction.connection_id, data.len());
        Ok(data)
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::CallContext")
            .field("transaction", &self.transaction)
            .field("hand_off", &self.hand_off.is_some())
            .finish()
    }
}
