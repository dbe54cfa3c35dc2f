// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection tasks.
//!
//! Every accepted socket is split in two. The reader task decodes lines and
//! forwards them to the dispatcher; the writer task owns the write half and
//! drains a bounded queue, so frames to one peer never interleave. When the
//! writer exits it drops a oneshot sender, which unblocks the reader.
//!
//! The dispatcher can abort a connection it has evicted: the writer stops at
//! once, even in the middle of a blocked write, and the reader follows.

use super::codec::{LineCodec, LineCodecError};
use super::dispatcher::{Event, LeaveReason};
use super::protocol::{split_first_word, Command, ServerFrame};
use super::registry::ConnId;
use super::shutdown_requested;
use crate::config::ServerConfig;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

/// Instruction for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterCommand {
    Send(ServerFrame),
    /// Flush what is queued, then close the socket.
    Close,
}

/// Outbound delivery failures, reported back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,
    #[error("writer closed")]
    Closed,
}

/// Dispatcher-side handle to one connection's writer.
///
/// Sends never wait: a slow peer must not stall the dispatcher.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
    abort: Arc<watch::Sender<bool>>,
}

impl WriterHandle {
    pub fn new(tx: mpsc::Sender<WriterCommand>, abort: watch::Sender<bool>) -> Self {
        Self {
            tx,
            abort: Arc::new(abort),
        }
    }

    /// Create a handle along with the queue its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WriterCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (abort, _) = watch::channel(false);
        (Self::new(tx, abort), rx)
    }

    /// Tear the connection down without flushing what is queued.
    pub fn abort(&self) {
        self.abort.send_replace(true);
    }

    /// Queue one frame for the peer.
    pub fn deliver(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        self.push(WriterCommand::Send(frame))
    }

    /// Ask the writer to flush and close the socket.
    pub fn close(&self) -> Result<(), DeliveryError> {
        self.push(WriterCommand::Close)
    }

    fn push(&self, command: WriterCommand) -> Result<(), DeliveryError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Wire up a freshly accepted socket.
///
/// Announces the connection to the dispatcher before any of its frames can
/// be read, then spawns the reader and writer tasks. Returns `false` if the
/// dispatcher is gone.
pub(crate) async fn open(
    id: ConnId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: &ServerConfig,
    events: &mpsc::Sender<Event>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    if config.tcp_nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
    }

    let (read_half, write_half) = stream.into_split();
    let (tx, commands) = mpsc::channel(config.outbound_queue_capacity);
    let (abort_tx, abort_rx) = watch::channel(false);
    let writer = WriterHandle::new(tx, abort_tx);
    let (closed_tx, closed_rx) = oneshot::channel();

    if events
        .send(Event::ClientJoined {
            id,
            peer_addr,
            writer,
        })
        .await
        .is_err()
    {
        return false;
    }

    tokio::spawn(write_loop(
        id,
        peer_addr,
        write_half,
        commands,
        LineCodec::new(config.max_line_length),
        events.clone(),
        abort_rx,
        closed_tx,
    ));
    tokio::spawn(read_loop(
        id,
        peer_addr,
        read_half,
        LineCodec::new(config.max_line_length),
        events.clone(),
        shutdown.clone(),
        closed_rx,
    ));
    true
}

/// Reader task: decode lines and forward them in arrival order.
async fn read_loop(
    id: ConnId,
    peer_addr: SocketAddr,
    read_half: OwnedReadHalf,
    codec: LineCodec,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
    mut writer_closed: oneshot::Receiver<()>,
) {
    let mut frames = FramedRead::new(read_half, codec);

    let reason = loop {
        tokio::select! {
            next = frames.next() => match next {
                Some(Ok(line)) => {
                    let (command, tail) = split_first_word(&line);
                    let exit = Command::parse(command) == Some(Command::Exit);
                    let frame = Event::Frame {
                        id,
                        command: command.to_owned(),
                        tail: tail.to_owned(),
                    };
                    if events.send(frame).await.is_err() {
                        break LeaveReason::Shutdown;
                    }
                    if exit {
                        break LeaveReason::Exited;
                    }
                }
                Some(Err(LineCodecError::LineTooLong(max))) => {
                    warn!("Dropping {}: line exceeds {} bytes", peer_addr, max);
                    break LeaveReason::ProtocolViolation;
                }
                Some(Err(LineCodecError::Io(e))) => {
                    warn!("Read error from {}: {}", peer_addr, e);
                    break LeaveReason::ReadFailed;
                }
                None => {
                    info!("Connection closed: {}", peer_addr);
                    break LeaveReason::PeerClosed;
                }
            },
            _ = &mut writer_closed => {
                debug!("Writer for {} finished, stopping reader", peer_addr);
                break LeaveReason::WriterClosed;
            }
            _ = shutdown_requested(&mut shutdown) => {
                debug!("Reader shutting down: {}", peer_addr);
                break LeaveReason::Shutdown;
            }
        }
    };

    // the dispatcher may already be gone during shutdown
    let _ = events.send(Event::ClientLeft { id, reason }).await;
}

/// Resolves once the dispatcher aborts the connection.
///
/// Never resolves if the handle is merely dropped; the writer then drains
/// its queue and closes normally.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    let requested = abort.wait_for(|abort| *abort).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

/// Writer task: the only writer of this peer's socket.
#[allow(clippy::too_many_arguments)]
async fn write_loop<W>(
    id: ConnId,
    peer_addr: SocketAddr,
    write_half: W,
    mut commands: mpsc::Receiver<WriterCommand>,
    codec: LineCodec,
    events: mpsc::Sender<Event>,
    mut abort: watch::Receiver<bool>,
    _closed: oneshot::Sender<()>,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(write_half, codec);

    let result = tokio::select! {
        result = pump(&mut sink, &mut commands) => result,
        _ = aborted(&mut abort) => {
            info!("Connection {} to {} aborted", id, peer_addr);
            return;
        }
    };

    if let Err(e) = result {
        warn!("Write error to {}: {}", peer_addr, e);
        let _ = events
            .send(Event::ClientLeft {
                id,
                reason: LeaveReason::WriteFailed,
            })
            .await;
        return;
    }

    if let Err(e) = sink.close().await {
        debug!("Close error for {}: {}", peer_addr, e);
    }
}

/// Write queued frames until `Close` or until every handle is gone.
async fn pump<W>(
    sink: &mut FramedWrite<W, LineCodec>,
    commands: &mut mpsc::Receiver<WriterCommand>,
) -> Result<(), LineCodecError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send(frame) => sink.send(frame).await?,
            WriterCommand::Close => break,
        }
    }
    Ok(())
}
