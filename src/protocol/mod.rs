//! Protocol module implements the Courier remote procedure call protocol of the
//! Xerox Network Systems.
//!
//! This module contains three main components:
//!
//! - `wire`: streams of 16-bit words grouped into messages, each tagged with a
//!   stream sub-type, over packets, in-memory buffers or a live connection.
//!
//! - `courier`: Courier data types and their serialization, the XNS string
//!   codec and the call/return/abort/reject message headers.
//!
//! - `rpc`: server side of the protocol: version negotiation, the registry of
//!   programs and the dispatch of calls to bound procedures.

pub mod courier;
pub mod rpc;
pub mod wire;
