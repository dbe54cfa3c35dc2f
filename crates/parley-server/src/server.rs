// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chat server core: acceptor, dispatcher wiring and control handle.

use crate::config::{ConfigError, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod registry;

pub use codec::{LineCodec, LineCodecError};
pub use connection::{DeliveryError, WriterCommand, WriterHandle};
pub use dispatcher::{Dispatcher, Event, LeaveReason, ServerStats};
pub use protocol::{Command, ErrorCode, ServerFrame};
pub use registry::{ConnId, ConnectionRegistry, Session, SessionState};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Resolves once shutdown is signalled or the signal's sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Chat server bound to its listening socket.
pub struct ChatServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    local_addr: SocketAddr,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ChatServer {
    /// Validate `config` and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (shutdown, _) = watch::channel(false);

        info!("Chat server listening on {}", local_addr);

        Ok(Self {
            config: Arc::new(config),
            listener,
            local_addr,
            events_tx,
            events_rx,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Control handle usable from other tasks.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            events: self.events_tx.clone(),
            local_addr: self.local_addr,
        }
    }

    /// Accept and serve clients until shutdown.
    ///
    /// Returns an error only when the listener itself fails; that also
    /// signals shutdown to every task.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            config,
            listener,
            local_addr,
            events_tx,
            events_rx,
            shutdown,
        } = self;

        let dispatcher = tokio::spawn(Dispatcher::new(events_rx, shutdown.subscribe()).run());

        let result = accept_loop(&listener, &config, &events_tx, shutdown.subscribe()).await;
        if let Err(e) = &result {
            error!("Listener on {} failed: {}", local_addr, e);
            shutdown.send_replace(true);
        }
        drop(listener);
        drop(events_tx);

        if let Err(e) = dispatcher.await {
            error!("Dispatcher task failed: {}", e);
        }

        info!("Chat server on {} stopped", local_addr);
        result
    }
}

/// Acceptor loop: hand each socket to its reader and writer tasks.
async fn accept_loop(
    listener: &TcpListener,
    config: &ServerConfig,
    events: &mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let mut next_id: ConnId = 1;
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    consecutive_errors = 0;
                    let id = next_id;
                    next_id += 1;
                    info!("New connection {} from {}", id, peer_addr);

                    if !connection::open(id, stream, peer_addr, config, events, &shutdown).await {
                        debug!("Dispatcher gone, acceptor stopping");
                        return Ok(());
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        "Accept error ({}/{}): {}",
                        consecutive_errors, config.max_accept_errors, e
                    );
                    if consecutive_errors >= config.max_accept_errors {
                        return Err(ServerError::Listener(e));
                    }
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            _ = shutdown_requested(&mut shutdown) => {
                info!("Shutdown signal received");
                return Ok(());
            }
        }
    }
}

/// Cloneable control handle for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    events: mpsc::Sender<Event>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Signal the server to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the dispatcher for a statistics snapshot.
    pub async fn stats(&self) -> Result<ServerStats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Stats { reply })
            .await
            .map_err(|_| ServerError::NotRunning)?;
        rx.await.map_err(|_| ServerError::NotRunning)
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener error: {0}")]
    Listener(#[source] std::io::Error),

    #[error("Server not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
