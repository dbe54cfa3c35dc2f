// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The dispatcher: single consumer of the event queue and sole owner of the
//! connection registry.
//!
//! Readers and the acceptor only ever post events. Every registry mutation,
//! every roster snapshot and every routing decision happens here, one event
//! at a time, so concurrent clients are linearized by the queue.
//!
//! Outbound frames are handed to per-connection writers without waiting. A
//! writer whose queue is full is evicted once the current event is done.

use super::connection::{DeliveryError, WriterHandle};
use super::protocol::{split_first_word, validate_name, Command, ErrorCode, ServerFrame};
use super::registry::{BindError, ConnId, ConnectionRegistry, SessionState};
use super::shutdown_requested;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Why a connection is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Peer closed its socket.
    PeerClosed,
    ReadFailed,
    WriteFailed,
    /// Framing overflow.
    ProtocolViolation,
    /// Reader stopped after forwarding `EXIT`.
    Exited,
    /// The writer task ended first.
    WriterClosed,
    /// Outbound queue overflowed.
    SlowConsumer,
    Shutdown,
}

/// Inbound event for the dispatcher.
#[derive(Debug)]
pub enum Event {
    /// A connection was accepted; posted before any of its frames.
    ClientJoined {
        id: ConnId,
        peer_addr: SocketAddr,
        writer: WriterHandle,
    },
    /// One decoded line.
    Frame {
        id: ConnId,
        command: String,
        tail: String,
    },
    /// The connection's reader or writer is done.
    ClientLeft { id: ConnId, reason: LeaveReason },
    /// Snapshot request.
    Stats { reply: oneshot::Sender<ServerStats> },
}

/// Server statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerStats {
    /// Live connections, registered or not.
    pub connections: usize,
    /// Connections bound to a display name.
    pub registered: usize,
    /// Frames processed.
    pub frames_dispatched: u64,
    /// Accepted `MESG` broadcasts.
    pub broadcasts: u64,
    /// Delivered private messages.
    pub private_messages: u64,
    /// `ERR` replies sent.
    pub errors_sent: u64,
    /// Connections removed from the registry.
    pub departures: u64,
}

/// Central routing task.
pub struct Dispatcher {
    registry: ConnectionRegistry<WriterHandle>,
    events: mpsc::Receiver<Event>,
    shutdown: watch::Receiver<bool>,
    stats: ServerStats,
    /// Slow consumers found while handling the current event.
    evicted: Vec<ConnId>,
}

impl Dispatcher {
    /// Create a dispatcher draining `events` until `shutdown` flips.
    pub fn new(events: mpsc::Receiver<Event>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            events,
            shutdown,
            stats: ServerStats::default(),
            evicted: Vec::new(),
        }
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &ConnectionRegistry<WriterHandle> {
        &self.registry
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.registry.connection_count(),
            registered: self.registry.registered_count(),
            ..self.stats.clone()
        }
    }

    /// Run until shutdown is signalled or every producer is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("Event queue closed");
                        break;
                    }
                },
                _ = shutdown_requested(&mut self.shutdown) => {
                    debug!("Dispatcher received shutdown");
                    break;
                }
            }
        }

        // stop accepting events, then finish what is already queued
        self.events.close();
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }

        let mut closed = 0;
        for session in self.registry.drain() {
            let _ = session.writer().close();
            closed += 1;
        }
        info!("Dispatcher stopped, closed {} connections", closed);
    }

    /// Apply one event atomically with respect to the registry.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::ClientJoined {
                id,
                peer_addr,
                writer,
            } => {
                if self.registry.insert(id, peer_addr, writer) {
                    debug!("Connection {} from {} awaiting registration", id, peer_addr);
                } else {
                    warn!("Duplicate connection handle {} from {}", id, peer_addr);
                }
            }
            Event::Frame { id, command, tail } => {
                self.stats.frames_dispatched += 1;
                self.handle_frame(id, &command, &tail);
            }
            Event::ClientLeft { id, reason } => self.depart(id, reason),
            Event::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }

        while let Some(id) = self.evicted.pop() {
            self.depart(id, LeaveReason::SlowConsumer);
        }
    }

    fn handle_frame(&mut self, id: ConnId, command: &str, tail: &str) {
        let state = match self.registry.state(id) {
            Some(SessionState::Closed) => {
                debug!("Ignoring {} from closed connection {}", command, id);
                return;
            }
            Some(state) => state,
            None => {
                debug!("Ignoring {} from unknown connection {}", command, id);
                return;
            }
        };

        debug!("Dispatching {:?} from connection {}", command, id);

        match Command::parse(command) {
            Some(Command::Reg) => self.register(id, state, tail),
            Some(Command::Mesg) => self.public_message(id, state, tail),
            Some(Command::Pmsg) => self.private_message(id, state, tail),
            Some(Command::Exit) => self.exit(id, state),
            None => self.reply_error(id, ErrorCode::InvalidCommand),
        }
    }

    fn register(&mut self, id: ConnId, state: SessionState, tail: &str) {
        if state != SessionState::Unregistered {
            self.reply_error(id, ErrorCode::InvalidCommand);
            return;
        }

        let name = tail.trim();
        if let Err(code) = validate_name(name) {
            self.reply_error(id, code);
            return;
        }

        match self.registry.bind(id, name) {
            Ok(()) => {}
            Err(BindError::NameTaken) => {
                self.reply_error(id, ErrorCode::NameTaken);
                return;
            }
            Err(e) => {
                warn!("Bind failed for connection {}: {}", id, e);
                self.reply_error(id, ErrorCode::InvalidCommand);
                return;
            }
        }

        info!(
            "Registered {:?} on connection {} ({} online)",
            name,
            id,
            self.registry.registered_count()
        );

        self.send_to(id, ServerFrame::Roster(self.registry.roster()));
        self.broadcast(id, ServerFrame::Joined(name.to_owned()));
    }

    fn public_message(&mut self, id: ConnId, state: SessionState, body: &str) {
        let from = match self.sender_name(id, state) {
            Some(name) if !body.is_empty() => name,
            _ => {
                self.reply_error(id, ErrorCode::InvalidCommand);
                return;
            }
        };

        self.stats.broadcasts += 1;
        let sent = self.broadcast(
            id,
            ServerFrame::Public {
                from,
                body: body.to_owned(),
            },
        );
        debug!("Broadcast from connection {} reached {} peers", id, sent);
    }

    fn private_message(&mut self, id: ConnId, state: SessionState, tail: &str) {
        let (recipient, body) = split_first_word(tail);
        let from = match self.sender_name(id, state) {
            Some(name) if !recipient.is_empty() && !body.is_empty() => name,
            _ => {
                self.reply_error(id, ErrorCode::InvalidCommand);
                return;
            }
        };

        let Some(target) = self.registry.lookup(recipient) else {
            debug!("Private message from {:?} to unknown {:?}", from, recipient);
            self.reply_error(id, ErrorCode::UnknownRecipient);
            return;
        };

        self.stats.private_messages += 1;
        self.send_to(
            target,
            ServerFrame::Private {
                from,
                body: body.to_owned(),
            },
        );
    }

    fn exit(&mut self, id: ConnId, state: SessionState) {
        match self.registry.close(id) {
            Some(name) => {
                info!("{:?} left via EXIT (connection {})", name, id);
                self.send_to(id, ServerFrame::Roster(self.registry.roster()));
                self.broadcast(id, ServerFrame::Left(name));
            }
            None => debug!("Connection {} exited while {:?}", id, state),
        }

        if let Some(session) = self.registry.get(id) {
            // a full queue still drains once the record is removed
            let _ = session.writer().close();
        }
    }

    /// Forget a connection and announce the departure if it had a name.
    ///
    /// Safe to call more than once for the same handle.
    fn depart(&mut self, id: ConnId, reason: LeaveReason) {
        let Some(session) = self.registry.remove(id) else {
            debug!("Connection {} already released ({:?})", id, reason);
            return;
        };
        self.stats.departures += 1;
        if reason == LeaveReason::SlowConsumer {
            // its reader is still running and the writer may be stuck
            session.writer().abort();
        }

        match (session.state(), session.name()) {
            (SessionState::Registered, Some(name)) => {
                info!(
                    "{:?} disconnected after {:?}: {:?}",
                    name,
                    session.connected_at().elapsed(),
                    reason
                );
                let name = name.to_owned();
                self.broadcast(id, ServerFrame::Left(name));
            }
            (state, _) => debug!(
                "Connection {} from {} released while {:?}: {:?}",
                id,
                session.peer_addr(),
                state,
                reason
            ),
        }
    }

    fn sender_name(&self, id: ConnId, state: SessionState) -> Option<String> {
        if state != SessionState::Registered {
            return None;
        }
        self.registry
            .get(id)
            .and_then(|s| s.name())
            .map(str::to_owned)
    }

    fn reply_error(&mut self, id: ConnId, code: ErrorCode) {
        debug!("Replying {} to connection {}", code, id);
        self.stats.errors_sent += 1;
        self.send_to(id, ServerFrame::Error(code));
    }

    fn send_to(&mut self, id: ConnId, frame: ServerFrame) {
        let result = match self.registry.get(id) {
            Some(session) => session.writer().deliver(frame),
            None => return,
        };
        if let Err(e) = result {
            self.delivery_failed(id, e);
        }
    }

    /// Deliver `frame` to every registered connection except `exclude`.
    fn broadcast(&mut self, exclude: ConnId, frame: ServerFrame) -> usize {
        let mut sent = 0;
        let mut failed = Vec::new();
        for session in self.registry.registered() {
            if session.id() == exclude {
                continue;
            }
            match session.writer().deliver(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => failed.push((session.id(), e)),
            }
        }
        for (id, e) in failed {
            self.delivery_failed(id, e);
        }
        sent
    }

    fn delivery_failed(&mut self, id: ConnId, error: DeliveryError) {
        match error {
            DeliveryError::Full => {
                if !self.evicted.contains(&id) {
                    warn!("Connection {} is not keeping up, disconnecting", id);
                    self.evicted.push(id);
                }
            }
            // its ClientLeft is already on the way
            DeliveryError::Closed => debug!("Writer for connection {} already gone", id),
        }
    }
}
