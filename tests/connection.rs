use std::sync::atomic::Ordering;
use std::sync::Arc;

mod support;

use xns_courier::courier::message::{self, ReplyHeader, RejectCode, VersionRange};
use xns_courier::courier::{deserialize, CourierString};
use xns_courier::rpc::{CourierConnection, Program, Registry};
use xns_courier::wire::{BufferStream, Message, WireStream, SST_BULK_DATA, SST_RPC};

use support::*;

#[test]
fn increment_returns_incremented_cardinal() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 2)), 2, header(1, COUNTER_PROGRAM, 1, 0), &41_u16);

    let replies = serve(registry, vec![call]);
    assert_eq!(replies.len(), 1);

    let mut reply = parse_reply(&replies[0], 2, true);
    assert_eq!(reply.echo, Some(VersionRange::new(2, 2)));
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 1 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 42);
    reply.assert_finished();
}

#[test]
fn negotiates_highest_common_version() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(9, COUNTER_PROGRAM, 1, 0), &1_u16);

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.echo, Some(VersionRange::new(3, 3)));
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 9 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 2);
    reply.assert_finished();
}

#[test]
fn negotiated_version_is_exposed() {
    let (registry, _) = test_registry();
    let mut stream = BufferStream::with_inbound([call_message(
        Some((1, 2)),
        2,
        header(1, COUNTER_PROGRAM, 1, 0),
        &1_u16,
    )]);
    let mut connection = CourierConnection::new(registry, "versions");
    assert_eq!(connection.courier_version(), None);

    let hand_off = connection.process_single_call(&mut stream).expect("process call");
    assert!(hand_off.is_none());
    assert_eq!(connection.courier_version(), Some(2));
    assert_eq!(connection.connection_id(), "versions");
}

#[test]
fn unsupported_versions_are_rejected_and_connection_stays_usable() {
    let (registry, _) = test_registry();
    let bad = call_message(Some((4, 5)), 3, header(1, COUNTER_PROGRAM, 1, 0), &41_u16);
    let good = call_message(Some((2, 3)), 3, header(2, COUNTER_PROGRAM, 1, 0), &41_u16);

    let replies = serve(registry, vec![bad, good]);
    assert_eq!(replies.len(), 2);

    let mut reject = parse_reply(&replies[0], 3, false);
    assert_eq!(
        reject.header,
        ReplyHeader::Reject { transaction: 1, code: RejectCode::NoSuchProgram, range: None }
    );
    reject.assert_finished();

    let mut reply = parse_reply(&replies[1], 3, true);
    assert_eq!(reply.echo, Some(VersionRange::new(3, 3)));
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 2 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 42);
    reply.assert_finished();
}

#[test]
fn versions_are_echoed_once_per_connection() {
    let (registry, _) = test_registry();
    let first = call_message(Some((2, 3)), 3, header(1, COUNTER_PROGRAM, 1, 0), &1_u16);
    let second = call_message(None, 3, header(2, COUNTER_PROGRAM, 1, 0), &2_u16);

    let replies = serve(registry, vec![first, second]);
    assert_eq!(replies.len(), 2);

    let mut reply = parse_reply(&replies[1], 3, false);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 2 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 3);
    reply.assert_finished();
}

#[test]
fn versions_in_their_own_message_are_accepted() {
    let (registry, _) = test_registry();
    let mut versions = BufferStream::new();
    message::write_versions(&mut versions, VersionRange::new(2, 3)).expect("versions");
    versions.write_end_of_message().expect("end");
    let versions = versions.take_outbound().remove(0);
    let call = call_message(None, 3, header(4, COUNTER_PROGRAM, 1, 0), &10_u16);

    let replies = serve(registry, vec![versions, call]);
    assert_eq!(replies.len(), 1);

    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 4 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 11);
    reply.assert_finished();
}

#[test]
fn spurious_empty_message_after_versions_is_discarded() {
    let (registry, _) = test_registry();
    let mut versions = BufferStream::new();
    message::write_versions(&mut versions, VersionRange::new(2, 3)).expect("versions");
    versions.write_end_of_message().expect("end");
    let versions = versions.take_outbound().remove(0);
    let empty = Message::new(SST_RPC, Vec::new());
    let call = call_message(None, 3, header(4, COUNTER_PROGRAM, 1, 0), &10_u16);

    let mut stream = BufferStream::with_inbound([versions, empty, call]);
    let mut connection = CourierConnection::new(registry, "empty");
    let hand_off = connection.process_single_call(&mut stream).expect("process call");
    assert!(hand_off.is_none());
    assert!(stream.is_at_end().expect("cannot check end"));
    assert!(stream.is_closed());

    let replies = stream.take_outbound();
    assert_eq!(replies.len(), 1);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 4 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 11);
    reply.assert_finished();
}

#[test]
fn add_invokes_implementation_once() {
    let (registry, calls) = test_registry();
    let call =
        call_message(Some((2, 3)), 3, header(3, ARITH_PROGRAM, 1, ADD), &AddArgs { a: 5, b: 6 });

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 3 });
    assert_eq!(deserialize::<u32>(&mut reply.stream).expect("result"), 11);
    reply.assert_finished();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_program_is_rejected() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(5, 99, 1, 0), &());

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 5, code: RejectCode::NoSuchProgram, range: None }
    );
    reply.assert_finished();
}

#[test]
fn unknown_version_reports_registered_range_under_courier_3() {
    let (registry, _) = test_registry();
    let call = call_message(Some((3, 3)), 3, header(6, ARITH_PROGRAM, 2, 0), &());

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject {
            transaction: 6,
            code: RejectCode::NoSuchVersion,
            range: Some(VersionRange::new(1, 3)),
        }
    );
    reply.assert_finished();
}

#[test]
fn unknown_version_has_no_range_under_courier_2() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 2)), 2, header(7, ARITH_PROGRAM, 2, 0), &());

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 2, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 7, code: RejectCode::NoSuchVersion, range: None }
    );
    reply.assert_finished();
}

#[test]
fn unknown_procedure_is_rejected() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(8, COUNTER_PROGRAM, 1, 4), &1_u16);

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 8, code: RejectCode::NoSuchProcedure, range: None }
    );
    reply.assert_finished();
}

#[test]
fn trailing_arguments_are_rejected() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(10, COUNTER_PROGRAM, 1, 0), &[41_u16, 7]);

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 10, code: RejectCode::InvalidArguments, range: None }
    );
    reply.assert_finished();
}

#[test]
fn missing_arguments_are_rejected() {
    let (registry, calls) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(11, ARITH_PROGRAM, 1, ADD), &5_u32);

    let replies = serve(registry, vec![call]);
    let reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 11, code: RejectCode::InvalidArguments, range: None }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn declared_error_is_sent_as_abort() {
    let (registry, _) = test_registry();
    let args = AddArgs { a: u32::MAX, b: 1 };
    let call = call_message(Some((2, 3)), 3, header(12, ARITH_PROGRAM, 1, ADD), &args);

    let replies = serve(registry, vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Abort { transaction: 12, error: 7 });
    let error = deserialize::<Overflow>(&mut reply.stream).expect("error arguments");
    assert_eq!(error, Overflow { a: u32::MAX, b: 1 });
    reply.assert_finished();
}

#[test]
fn undeclared_failures_are_rejected() {
    for (transaction, procedure) in [(20, RAISE_UNDECLARED), (21, FAIL), (22, PANIC)] {
        let (registry, _) = test_registry();
        let call =
            call_message(Some((2, 3)), 3, header(transaction, ARITH_PROGRAM, 1, procedure), &());
        let after = call_message(None, 3, header(99, COUNTER_PROGRAM, 1, 0), &1_u16);

        let replies = serve(registry, vec![call, after]);
        assert_eq!(replies.len(), 2, "procedure {procedure}");

        let mut reply = parse_reply(&replies[0], 3, true);
        assert_eq!(
            reply.header,
            ReplyHeader::Reject { transaction, code: RejectCode::InvalidArguments, range: None },
            "procedure {procedure}"
        );
        reply.assert_finished();

        let reply = parse_reply(&replies[1], 3, false);
        assert_eq!(reply.header, ReplyHeader::Return { transaction: 99 });
    }
}

#[test]
fn non_call_message_is_rejected() {
    let (registry, _) = test_registry();
    let mut stream = BufferStream::new();
    message::write_versions(&mut stream, VersionRange::new(2, 3)).expect("versions");
    message::write_return_header(&mut stream, 13).expect("header");
    stream.write_end_of_message().expect("end");
    let bogus = stream.take_outbound().remove(0);

    let replies = serve(registry, vec![bogus]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 13, code: RejectCode::InvalidArguments, range: None }
    );
    reply.assert_finished();
}

#[test]
fn truncated_call_is_dropped() {
    let (registry, _) = test_registry();
    let mut stream = BufferStream::new();
    message::write_versions(&mut stream, VersionRange::new(2, 3)).expect("versions");
    stream.write_u16(0).expect("message type");
    stream.write_end_of_message().expect("end");
    let truncated = stream.take_outbound().remove(0);
    let call = call_message(None, 3, header(14, COUNTER_PROGRAM, 1, 0), &5_u16);

    let replies = serve(registry, vec![truncated, call]);
    assert_eq!(replies.len(), 1);

    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 14 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 6);
    reply.assert_finished();
}

#[test]
fn bulk_data_is_transferred_during_call() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(15, ARITH_PROGRAM, 1, BULK_ECHO), &());
    let bulk = Message::new(SST_BULK_DATA, b"abcde".to_vec());

    let replies = serve(registry, vec![call, bulk]);
    assert_eq!(replies.len(), 3);

    // switching to bulk data closes the message holding the version echo
    let mut echo = BufferStream::with_inbound([replies[0].clone()]);
    assert_eq!(message::read_versions(&mut echo).expect("echo"), VersionRange::new(3, 3));
    assert!(echo.is_at_end().expect("end"));

    assert_eq!(replies[1], Message::new(SST_BULK_DATA, b"edcba".to_vec()));

    let mut reply = parse_reply(&replies[2], 3, false);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 15 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 5);
    reply.assert_finished();
}

#[test]
fn bulk_data_of_wrong_sub_type_fails_the_call() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(16, ARITH_PROGRAM, 1, BULK_ECHO), &());
    let next = call_message(None, 3, header(17, COUNTER_PROGRAM, 1, 0), &1_u16);

    let replies = serve(registry, vec![call, next]);
    assert_eq!(replies.len(), 2);

    let reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 16, code: RejectCode::InvalidArguments, range: None }
    );
    let reply = parse_reply(&replies[1], 3, false);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 17 });
}

#[test]
fn transport_is_handed_off_after_reply() {
    let (registry, _) = test_registry();
    let call = call_message(Some((2, 3)), 3, header(18, ARITH_PROGRAM, 1, HAND_OFF), &());
    let bulk = Message::new(SST_BULK_DATA, b"ping".to_vec());
    let next = call_message(None, 3, header(19, COUNTER_PROGRAM, 1, 0), &41_u16);

    let replies = serve(registry, vec![call, bulk, next]);
    assert_eq!(replies.len(), 3);

    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 18 });
    reply.assert_finished();

    assert_eq!(replies[1], Message::new(SST_BULK_DATA, b"ping".to_vec()));

    let mut reply = parse_reply(&replies[2], 3, false);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 19 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 42);
    reply.assert_finished();
}

#[test]
fn process_single_call_returns_hand_off() {
    let (registry, _) = test_registry();
    let mut stream = BufferStream::with_inbound([call_message(
        Some((2, 3)),
        3,
        header(1, ARITH_PROGRAM, 1, HAND_OFF),
        &(),
    )]);
    let mut connection = CourierConnection::new(registry, "hand-off");
    let client = connection.process_single_call(&mut stream).expect("process call");
    assert!(client.is_some());
    assert_eq!(stream.outbound().len(), 1);
    assert_eq!(stream.outbound()[0].sub_type, SST_RPC);
}

#[test]
fn string_arguments_round_trip_through_a_call() {
    let registry = Registry::new();
    let mut program = Program::new("Names", 40, 1);
    program
        .procedure::<CourierString, CourierString>(0, "Shout")
        .bind(|name, result, _| {
            *result = CourierString::new(name.as_str().to_uppercase());
            Ok(())
        });
    registry.register(program);

    let call = call_message(
        Some((2, 3)),
        3,
        header(1, 40, 1, 0),
        &CourierString::<65535>::new("courier"),
    );
    let replies = serve(Arc::new(registry), vec![call]);
    let mut reply = parse_reply(&replies[0], 3, true);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 1 });
    let result = deserialize::<CourierString>(&mut reply.stream).expect("result");
    assert_eq!(result.as_str(), "COURIER");
    reply.assert_finished();
}

#[test]
fn registry_tracks_programs_and_versions() {
    let (registry, _) = test_registry();
    assert!(registry.is_registered(ARITH_PROGRAM, 1));
    assert!(registry.is_registered(ARITH_PROGRAM, 3));
    assert!(!registry.is_registered(ARITH_PROGRAM, 2));
    assert_eq!(registry.version_range(ARITH_PROGRAM), Some(VersionRange::new(1, 3)));
    assert_eq!(registry.version_range(99), None);

    let listed: Vec<_> =
        registry.programs().iter().map(|p| (p.number(), p.version())).collect();
    assert_eq!(listed, vec![(ARITH_PROGRAM, 1), (ARITH_PROGRAM, 3), (COUNTER_PROGRAM, 1)]);

    let arith = registry.lookup(ARITH_PROGRAM, 1).expect("arith registered");
    assert_eq!(arith.name(), "Arith");
    assert!(arith.has_procedure(ADD));
    assert!(!arith.has_procedure(0));
    let names: Vec<_> = arith.procedures().map(|(_, name)| name.to_string()).collect();
    assert_eq!(
        names,
        ["Add", "RaiseUndeclared", "Fail", "Panic", "BulkEcho", "HandOff"].map(String::from)
    );

    let replaced = registry.register(counter_program());
    assert!(replaced.is_some());

    assert!(registry.unregister_version(ARITH_PROGRAM, 3).is_some());
    assert!(registry.unregister_version(ARITH_PROGRAM, 3).is_none());
    assert_eq!(registry.version_range(ARITH_PROGRAM), Some(VersionRange::new(1, 1)));
    assert_eq!(registry.unregister(ARITH_PROGRAM), 1);
    assert_eq!(registry.unregister(ARITH_PROGRAM), 0);
    assert!(!registry.is_registered(ARITH_PROGRAM, 1));
}

#[test]
fn unregistered_program_is_rejected() {
    let (registry, _) = test_registry();
    registry.unregister(COUNTER_PROGRAM);
    let call = call_message(Some((2, 3)), 3, header(30, COUNTER_PROGRAM, 1, 0), &1_u16);

    let replies = serve(registry, vec![call]);
    let reply = parse_reply(&replies[0], 3, true);
    assert_eq!(
        reply.header,
        ReplyHeader::Reject { transaction: 30, code: RejectCode::NoSuchProgram, range: None }
    );
}
