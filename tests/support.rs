#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use xns_courier::courier::message::{self, CallHeader, ReplyHeader, VersionRange};
use xns_courier::courier::{CourierError, CourierRecord, CourierString, Serialize};
use xns_courier::rpc::{ConnectionClient, CourierConnection, ProcedureError, Program, Registry};
use xns_courier::wire::{BufferStream, Message, WireStream, SST_BULK_DATA, SST_RPC};

pub const COUNTER_PROGRAM: u32 = 10;
pub const ARITH_PROGRAM: u32 = 1;

pub const ADD: u16 = 5;
pub const RAISE_UNDECLARED: u16 = 6;
pub const FAIL: u16 = 7;
pub const PANIC: u16 = 8;
pub const BULK_ECHO: u16 = 9;
pub const HAND_OFF: u16 = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddArgs {
    pub a: u32,
    pub b: u32,
}
CourierRecord!(AddArgs, a, b);

/// Declared by `Add`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overflow {
    pub a: u32,
    pub b: u32,
}
CourierRecord!(Overflow, a, b);
CourierError!(Overflow, 7);

/// Never declared by any procedure.
#[derive(Clone, Debug, Default)]
pub struct Undeclared {
    pub reason: CourierString,
}
CourierRecord!(Undeclared, reason);
CourierError!(Undeclared, 9);

/// Reads one bulk data message and sends it back.
pub struct EchoClient;

impl ConnectionClient for EchoClient {
    fn take_over(self: Box<Self>, stream: &mut dyn WireStream) -> anyhow::Result<()> {
        let mut data = Vec::new();
        while !stream.is_at_end()? {
            data.push(stream.get_byte()?);
        }
        stream.begin_stream_sub_type(SST_BULK_DATA)?;
        stream.write_bytes(&data)?;
        stream.write_end_of_message()?;
        stream.begin_stream_sub_type(SST_RPC)?;
        Ok(())
    }
}

/// Program 10 version 1: procedure 0 returns its CARDINAL argument plus one.
pub fn counter_program() -> Program {
    let mut program = Program::new("Counter", COUNTER_PROGRAM, 1);
    program.procedure::<u16, u16>(0, "Increment").bind(|value, result, _| {
        *result = value.wrapping_add(1);
        Ok(())
    });
    program
}

/// Program 1 version 1 with procedures covering every reply kind.
/// `calls` counts the invocations of `Add`.
pub fn arith_program(calls: Arc<AtomicUsize>) -> Program {
    let mut program = Program::new("Arith", ARITH_PROGRAM, 1);
    program
        .procedure::<AddArgs, u32>(ADD, "Add")
        .error::<Overflow>()
        .bind(move |args, result, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            *result = args
                .a
                .checked_add(args.b)
                .ok_or_else(|| ProcedureError::abort(Overflow { a: args.a, b: args.b }))?;
            Ok(())
        });
    program.procedure::<(), ()>(RAISE_UNDECLARED, "RaiseUndeclared").bind(|_, _, _| {
        Err(ProcedureError::abort(Undeclared { reason: "not declared".into() }))
    });
    program
        .procedure::<(), ()>(FAIL, "Fail")
        .bind(|_, _, _| Err(anyhow!("backing store unavailable").into()));
    program.procedure::<(), ()>(PANIC, "Panic").bind(|_, _, _| panic!("procedure bug"));
    program.procedure::<(), u16>(BULK_ECHO, "BulkEcho").bind(|_, result, context| {
        let mut data = context.receive_bulk_data()?;
        data.reverse();
        context.send_bulk_data(&data)?;
        *result = data.len() as u16;
        Ok(())
    });
    program.procedure::<(), ()>(HAND_OFF, "HandOff").bind(|_, _, context| {
        context.hand_off(EchoClient);
        Ok(())
    });
    program
}

/// Registry with the counter program, arith versions 1 and 3.
pub fn test_registry() -> (Arc<Registry>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    registry.register(counter_program());
    registry.register(arith_program(calls.clone()));
    let mut v3 = Program::new("Arith", ARITH_PROGRAM, 3);
    v3.procedure::<(), ()>(0, "Noop").bind(|_, _, _| Ok(()));
    registry.register(v3);
    (Arc::new(registry), calls)
}

pub fn header(transaction: u16, program: u32, version: u16, procedure: u16) -> CallHeader {
    CallHeader { transaction, program, version, procedure }
}

/// Builds a call message, optionally preceded by a Courier version offer.
pub fn call_message(
    offer: Option<(u16, u16)>,
    courier_version: u16,
    header: CallHeader,
    args: &impl Serialize,
) -> Message {
    let mut stream = BufferStream::new();
    if let Some((low, high)) = offer {
        message::write_versions(&mut stream, VersionRange::new(low, high)).expect("write versions");
    }
    message::write_call_header(&mut stream, courier_version, &header).expect("write header");
    args.serialize(&mut stream).expect("write arguments");
    stream.write_end_of_message().expect("end message");
    stream.take_outbound().remove(0)
}

/// Serves `inbound` on a fresh connection and returns everything it wrote.
pub fn serve(registry: Arc<Registry>, inbound: Vec<Message>) -> Vec<Message> {
    let mut stream = BufferStream::with_inbound(inbound);
    CourierConnection::new(registry, "test").serve(&mut stream).expect("serve connection");
    assert!(stream.pending().is_empty(), "unterminated reply data");
    stream.take_outbound()
}

pub struct Reply {
    pub echo: Option<VersionRange>,
    pub header: ReplyHeader,
    pub stream: BufferStream,
}

/// Parses a reply; `with_echo` when the message starts with the version echo.
pub fn parse_reply(message: &Message, courier_version: u16, with_echo: bool) -> Reply {
    assert_eq!(message.sub_type, SST_RPC);
    let mut stream = BufferStream::with_inbound([message.clone()]);
    let echo = with_echo.then(|| message::read_versions(&mut stream).expect("read echo"));
    let header = message::read_reply_header(&mut stream, courier_version).expect("read header");
    Reply { echo, header, stream }
}

impl Reply {
    pub fn assert_finished(&mut self) {
        assert!(self.stream.is_at_end().expect("check end"), "unread reply data");
    }
}
