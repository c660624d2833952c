//! Server side of the Courier remote procedure call protocol.
//!
//! A client opens a reliable stream to the server and exchanges the range of
//! Courier versions both sides support. Every following message is a call
//! naming a program, its version and a procedure. The server answers each call
//! with exactly one message:
//!
//! 1. return: the procedure completed and its results follow
//! 2. abort: the procedure raised one of its declared errors
//! 3. reject: the call could not be served (unknown program, version or
//!    procedure, or arguments that do not match the declared shape)
//!
//! This module implements:
//!
//! - [`CourierConnection`]: version negotiation and the per-connection loop
//! - [`Registry`]: programs keyed by number and version
//! - [`Program`]: procedures bound to Rust closures with declared errors
//! - [`CallContext`]: per-call state, bulk data transfer and transport hand-off
//! - segment framing over TCP and the socket handler used by the server

mod connection;
mod context;
mod program;
mod registry;
mod wire;

pub use connection::CourierConnection;
pub use context::{CallContext, ConnectionClient, Transaction};
pub use program::{
    BoundProcedure, DeclaredError, Procedure, ProcedureBuilder, ProcedureError, ProcedureResult,
    Program,
};
pub use registry::Registry;
pub use wire::{process_socket, read_segment, write_segment, FLAG_END_OF_MESSAGE};
