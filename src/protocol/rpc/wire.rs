//! Segment framing for carrying Courier over TCP.
//!
//! The Sequenced Packet Protocol delivers data as segments, each tagged with a
//! stream sub-type and an end-of-message flag. Over TCP every segment is sent
//! as one frame:
//!
//! ```text
//! +---------+---------+----------------+------------------+
//! | u8 sst  | u8 flags| u16 length (BE)| length data bytes|
//! +---------+---------+----------------+------------------+
//! ```
//!
//! `flags` uses the SPP attention bits; only `0x10` (end of message) is
//! interpreted.
//!
//! [`process_socket`] drives one connection: an async task reads frames into
//! an inbound channel, the Courier handler runs on the blocking thread pool
//! with an [`SppStream`] over the channels, and the socket task writes the
//! segments the handler produces.

use std::sync::Arc;

use anyhow::anyhow;
use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::connection::CourierConnection;
use super::registry::Registry;
use crate::protocol::wire::{SppSegment, SppStream};

/// Frame flag marking the last segment of a message.
pub const FLAG_END_OF_MESSAGE: u8 = 0x10;
/// Size of a frame header.
const FRAME_HEADER_LEN: usize = 4;
/// Segments buffered between the socket and the handler in each direction.
const SEGMENT_QUEUE_LEN: usize = 64;

/// Reads one frame from `socket`.
///
/// # Returns
///
/// `Ok(None)` when the peer closed the connection between frames.
pub async fn read_segment<S>(
    socket: &mut S,
    max_segment_len: usize,
) -> anyhow::Result<Option<SppSegment>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0_u8; FRAME_HEADER_LEN];
    match socket.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let length = BigEndian::read_u16(&header[2..]) as usize;
    if length > max_segment_len {
        return Err(anyhow!("segment length {} exceeds max {}", length, max_segment_len));
    }
    let mut data = vec![0_u8; length];
    socket.read_exact(&mut data).await?;
    let segment = SppSegment::new(header[0], header[1] & FLAG_END_OF_MESSAGE != 0, data);
    trace!(
        "read segment sst:{} eom:{} len:{}",
        segment.sub_type,
        segment.end_of_message,
        length
    );
    Ok(Some(segment))
}

/// Writes one segment as a frame.
pub async fn write_segment<S>(socket: &mut S, segment: &SppSegment) -> anyhow::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let length = u16::try_from(segment.data.len())
        .map_err(|_| anyhow!("segment of {} bytes cannot be framed", segment.data.len()))?;
    let mut header = [0_u8; FRAME_HEADER_LEN];
    header[0] = segment.sub_type;
    header[1] = if segment.end_of_message { FLAG_END_OF_MESSAGE } else { 0 };
    BigEndian::write_u16(&mut header[2..], length);
    socket.write_all(&header).await?;
    socket.write_all(&segment.data).await?;
    trace!("wrote segment sst:{} eom:{} len:{}", segment.sub_type, segment.end_of_message, length);
    Ok(())
}

/// Serves one Courier connection over an established TCP socket.
///
/// Returns when the peer closes the connection, the handler finishes or
/// `cancel` is triggered.
///
/// # Arguments
///
/// * `socket` - The established TCP connection to the client
/// * `registry` - Programs served on this connection
/// * `connection_id` - Name used in diagnostics, usually the peer address
/// * `cancel` - Token that terminates the connection from the server side
/// * `max_segment_len` - Largest segment payload accepted and produced
pub async fn process_socket(
    socket: TcpStream,
    registry: Arc<Registry>,
    connection_id: String,
    cancel: CancellationToken,
    max_segment_len: usize,
) -> anyhow::Result<()> {
    let _ = socket.set_nodelay(true);
    let max_segment_len = max_segment_len.clamp(2, u16::MAX as usize);
    let (mut reader, mut writer) = socket.into_split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<SppSegment>(SEGMENT_QUEUE_LEN);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<SppSegment>(SEGMENT_QUEUE_LEN);

    let reader_id = connection_id.clone();
    let reader_task = tokio::spawn(async move {
        loop {
            match read_segment(&mut reader, max_segment_len).await {
                Ok(Some(segment)) => {
                    if inbound_tx.send(segment).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("{}: peer closed the connection", reader_id);
                    break;
                }
                Err(e) => {
                    warn!("{}: cannot read segment: {:?}", reader_id, e);
                    break;
                }
            }
        }
    });

    let handler_id = connection_id.clone();
    let handler = tokio::task::spawn_blocking(move || {
        let mut stream = SppStream::with_max_segment_len(inbound_rx, outbound_tx, max_segment_len);
        CourierConnection::new(registry, handler_id).serve(&mut stream)
    });

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("{}: connection cancelled", connection_id);
                break Ok(());
            }
            segment = outbound_rx.recv() => match segment {
                Some(segment) => {
                    if let Err(e) = write_segment(&mut writer, &segment).await {
                        error!("{}: write error {:?}", connection_id, e);
                        break Err(e);
                    }
                }
                // handler finished and dropped its sender
                None => break Ok(()),
            }
        }
    };

    // Stopping the reader drops the inbound sender, which unblocks the handler
    // with an end of message; dropping the receiver fails its writes.
    reader_task.abort();
    drop(outbound_rx);
    match handler.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("{}: handler ended with {:?}", connection_id, e),
        Err(e) => error!("{}: handler task failed: {}", connection_id, e),
    }
    let _ = writer.shutdown().await;
    result
}
