use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

mod support;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use xns_courier::courier::deserialize;
use xns_courier::courier::message::{ReplyHeader, VersionRange};
use xns_courier::rpc::{read_segment, write_segment, FLAG_END_OF_MESSAGE};
use xns_courier::tcp::{loopback_address, CourierTcp, CourierTcpListener};
use xns_courier::wire::{Message, SppSegment, MAX_SEGMENT_DATA_LEN, SST_RPC};

use support::*;

const WAIT: Duration = Duration::from_secs(5);

/// Reads segments until one carries the end-of-message flag.
async fn read_message(socket: &mut TcpStream) -> Message {
    let mut message = Message::default();
    loop {
        let segment = timeout(WAIT, read_segment(socket, MAX_SEGMENT_DATA_LEN))
            .await
            .expect("timed out waiting for a segment")
            .expect("read segment")
            .expect("connection closed");
        message.sub_type = segment.sub_type;
        message.data.extend_from_slice(&segment.data);
        if segment.end_of_message {
            return message;
        }
    }
}

async fn send_message(socket: &mut TcpStream, message: Message) {
    let segment = SppSegment::new(message.sub_type, true, message.data);
    write_segment(socket, &segment).await.expect("write segment");
}

async fn start_server() -> (Arc<CourierTcpListener>, JoinHandle<std::io::Result<()>>) {
    let (registry, _) = test_registry();
    let listener =
        Arc::new(CourierTcpListener::bind("127.0.0.1:0", registry).await.expect("bind listener"));
    let server = tokio::spawn({
        let listener = listener.clone();
        async move { listener.handle_forever().await }
    });
    (listener, server)
}

async fn wait_for_connections(listener: &CourierTcpListener, expected: usize) {
    timeout(WAIT, async {
        while listener.active_connections() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count did not settle");
}

#[tokio::test]
async fn serves_calls_over_tcp() {
    let (listener, server) = start_server().await;
    assert_ne!(listener.get_listen_port(), 0);

    let mut socket =
        TcpStream::connect(("127.0.0.1", listener.get_listen_port())).await.expect("connect");
    send_message(
        &mut socket,
        call_message(Some((2, 3)), 3, header(1, COUNTER_PROGRAM, 1, 0), &41_u16),
    )
    .await;

    let mut reply = parse_reply(&read_message(&mut socket).await, 3, true);
    assert_eq!(reply.echo, Some(VersionRange::new(3, 3)));
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 1 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 42);
    reply.assert_finished();

    send_message(&mut socket, call_message(None, 3, header(2, COUNTER_PROGRAM, 1, 0), &1_u16))
        .await;
    let mut reply = parse_reply(&read_message(&mut socket).await, 3, false);
    assert_eq!(reply.header, ReplyHeader::Return { transaction: 2 });
    assert_eq!(deserialize::<u16>(&mut reply.stream).expect("result"), 2);
    reply.assert_finished();

    assert_eq!(listener.active_connections(), 1);
    drop(socket);
    wait_for_connections(&listener, 0).await;

    listener.shutdown().await;
    timeout(WAIT, server).await.expect("server did not stop").expect("join").expect("serve");
}

#[tokio::test]
async fn shutdown_closes_active_connections() {
    let (listener, server) = start_server().await;

    let mut sockets = Vec::new();
    for transaction in 0..2 {
        let mut socket =
            TcpStream::connect(("127.0.0.1", listener.get_listen_port())).await.expect("connect");
        send_message(
            &mut socket,
            call_message(Some((2, 2)), 2, header(transaction, COUNTER_PROGRAM, 1, 0), &0_u16),
        )
        .await;
        let reply = parse_reply(&read_message(&mut socket).await, 2, true);
        assert_eq!(reply.header, ReplyHeader::Return { transaction });
        sockets.push(socket);
    }
    assert_eq!(listener.active_connections(), 2);

    timeout(WAIT, listener.shutdown()).await.expect("shutdown did not finish");
    assert_eq!(listener.active_connections(), 0);
    timeout(WAIT, server).await.expect("server did not stop").expect("join").expect("serve");

    for socket in &mut sockets {
        let next = timeout(WAIT, read_segment(socket, MAX_SEGMENT_DATA_LEN))
            .await
            .expect("timed out waiting for close");
        assert!(matches!(next, Ok(None)), "connection still open");
    }
}

#[tokio::test]
async fn segments_are_framed() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let segment = SppSegment::new(SST_RPC, true, b"courier".to_vec());
    write_segment(&mut client, &segment).await.expect("write segment");
    write_segment(&mut client, &SppSegment::new(1, false, Vec::<u8>::new()))
        .await
        .expect("write segment");
    drop(client);

    let mut header = [0_u8; 4];
    tokio::io::AsyncReadExt::read_exact(&mut server, &mut header).await.expect("read header");
    assert_eq!(header, [SST_RPC, FLAG_END_OF_MESSAGE, 0, 7]);
    let mut data = [0_u8; 7];
    tokio::io::AsyncReadExt::read_exact(&mut server, &mut data).await.expect("read data");
    assert_eq!(&data, b"courier");

    let next = read_segment(&mut server, MAX_SEGMENT_DATA_LEN).await.expect("read segment");
    assert_eq!(next, Some(SppSegment::new(1, false, Vec::<u8>::new())));
    assert_eq!(read_segment(&mut server, MAX_SEGMENT_DATA_LEN).await.expect("read eof"), None);
}

#[tokio::test]
async fn rejects_oversized_segment() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let oversized = (MAX_SEGMENT_DATA_LEN + 1) as u16;
    let mut header = vec![SST_RPC, FLAG_END_OF_MESSAGE];
    header.extend_from_slice(&oversized.to_be_bytes());
    client.write_all(&header).await.expect("write header");

    let err = read_segment(&mut server, MAX_SEGMENT_DATA_LEN)
        .await
        .expect_err("expected oversize error");
    assert!(err.to_string().contains("exceeds max"), "unexpected error: {err:?}");
}

#[test]
fn loopback_addresses_split_the_host_number() {
    assert_eq!(loopback_address(1), Ipv4Addr::new(127, 88, 0, 1));
    assert_eq!(loopback_address(0x0102), Ipv4Addr::new(127, 88, 1, 2));
}

#[tokio::test]
async fn auto_bind_picks_a_private_loopback_address() {
    let (registry, _) = test_registry();
    let listener = CourierTcpListener::bind("auto:0", registry).await.expect("bind listener");
    let IpAddr::V4(ip) = listener.get_listen_ip() else {
        panic!("expected an IPv4 address, got {}", listener.get_listen_ip());
    };
    assert_eq!(ip.octets()[..2], [127, 88]);
    assert_ne!(listener.get_listen_port(), 0);

    let (registry, _) = test_registry();
    let err = CourierTcpListener::bind("auto", registry)
        .await
        .err()
        .expect("address without port");
    assert_eq!(err.kind(), std::io::ErrorKind::AddrNotAvailable);
}
