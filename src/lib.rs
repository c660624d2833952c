//! XNS Courier - the remote procedure call engine of the Xerox Network Systems
//! protocol family, implemented in Rust
//!
//! This library lets a Rust application serve Courier programs to XNS clients.
//! It covers the Courier protocol versions 2 and 3 as described in the Xerox
//! System Integration Standard XSIS 038112.
//!
//! ## Supported Features
//!
//! - Typed Courier values (records, enumerations, choices, sequences, arrays,
//!   strings and streams) with wire, JSON and text representations
//! - Reversible transcoding of XNS character strings into Rust strings
//! - Version negotiation, call dispatch and the reject/abort reply semantics
//! - Bulk data transfer and hand-off of the transport after a call
//! - Asynchronous TCP session server on the Tokio runtime
//!
//! ## Main Components
//!
//! - `wire`: word-oriented streams with message boundaries and stream sub-types.
//!
//! - `courier`: the Courier value type system, the string codec and the message
//!   headers.
//!
//! - `rpc`: connection state machine, program registry and procedure binding.
//!
//! - `tcp`: TCP-based server that accepts connections and drives one Courier
//!   connection per client.
//!
//! ## Usage
//!
//! Declare a [`rpc::Program`], bind its procedures, register it in a
//! [`rpc::Registry`] and hand the registry to a [`tcp::CourierTcpListener`].

pub mod protocol;
pub mod tcp;

pub use protocol::{courier, rpc, wire};

#[doc(hidden)]
pub mod __macro_support {
    pub use num_traits;
    pub use serde_json;
}
