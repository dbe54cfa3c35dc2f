// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection and display-name registries.
//!
//! Two indexes kept in lockstep: connection handle to session, and display
//! name to connection handle. A name is present in `by_name` exactly when its
//! session is `Registered` and carries that name. The registry is owned by the
//! dispatcher task and needs no locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;

/// Opaque connection handle, assigned monotonically by the acceptor.
pub type ConnId = u64;

/// Session lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no name yet; only `REG` is valid.
    Unregistered,
    /// Bound to a display name.
    Registered,
    /// Exited; waiting for the reader to release the socket.
    Closed,
}

/// Per-connection record.
#[derive(Debug)]
pub struct Session<W> {
    id: ConnId,
    peer_addr: SocketAddr,
    state: SessionState,
    name: Option<String>,
    writer: W,
    connected_at: Instant,
}

impl<W> Session<W> {
    fn new(id: ConnId, peer_addr: SocketAddr, writer: W) -> Self {
        Self {
            id,
            peer_addr,
            state: SessionState::Unregistered,
            name: None,
            writer,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound display name, if registered.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

/// Reasons a bind is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("unknown connection")]
    UnknownConnection,
    #[error("connection is not awaiting registration")]
    NotUnregistered,
    #[error("name already taken")]
    NameTaken,
}

/// Registry of all live connections and their bound names.
#[derive(Debug)]
pub struct ConnectionRegistry<W> {
    /// Sessions indexed by connection handle
    by_handle: HashMap<ConnId, Session<W>>,

    /// Connection handles indexed by display name
    by_name: HashMap<String, ConnId>,
}

impl<W> ConnectionRegistry<W> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            by_handle: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Track a freshly accepted connection in state `Unregistered`.
    ///
    /// Returns `false` and leaves the registry untouched if the handle is
    /// already known.
    pub fn insert(&mut self, id: ConnId, peer_addr: SocketAddr, writer: W) -> bool {
        if self.by_handle.contains_key(&id) {
            return false;
        }
        self.by_handle.insert(id, Session::new(id, peer_addr, writer));
        true
    }

    /// Bind `name` to an `Unregistered` connection and mark it `Registered`.
    pub fn bind(&mut self, id: ConnId, name: &str) -> Result<(), BindError> {
        let session = self
            .by_handle
            .get_mut(&id)
            .ok_or(BindError::UnknownConnection)?;
        if session.state != SessionState::Unregistered {
            return Err(BindError::NotUnregistered);
        }
        if self.by_name.contains_key(name) {
            return Err(BindError::NameTaken);
        }

        session.state = SessionState::Registered;
        session.name = Some(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        Ok(())
    }

    /// Mark a connection `Closed`, unbinding its name.
    ///
    /// Returns the name that was released, if the connection was registered.
    pub fn close(&mut self, id: ConnId) -> Option<String> {
        let session = self.by_handle.get_mut(&id)?;
        session.state = SessionState::Closed;
        let name = session.name.take()?;
        self.by_name.remove(&name);
        Some(name)
    }

    /// Forget a connection entirely, unbinding its name if still bound.
    pub fn remove(&mut self, id: ConnId) -> Option<Session<W>> {
        let session = self.by_handle.remove(&id)?;
        if let Some(name) = &session.name {
            if self.by_name.get(name) == Some(&id) {
                self.by_name.remove(name);
            }
        }
        Some(session)
    }

    /// Get a session by handle.
    pub fn get(&self, id: ConnId) -> Option<&Session<W>> {
        self.by_handle.get(&id)
    }

    /// Current state of a connection, `None` if unknown.
    pub fn state(&self, id: ConnId) -> Option<SessionState> {
        self.by_handle.get(&id).map(|s| s.state)
    }

    /// Resolve a display name to its connection.
    pub fn lookup(&self, name: &str) -> Option<ConnId> {
        self.by_name.get(name).copied()
    }

    /// Registered session for a display name.
    pub fn session_by_name(&self, name: &str) -> Option<&Session<W>> {
        self.lookup(name).and_then(|id| self.by_handle.get(&id))
    }

    /// All bound display names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Roster of registered names, sorted for stable output.
    pub fn roster(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// All registered sessions.
    pub fn registered(&self) -> impl Iterator<Item = &Session<W>> {
        self.by_name
            .values()
            .filter_map(|id| self.by_handle.get(id))
    }

    /// All sessions regardless of state.
    pub fn sessions(&self) -> impl Iterator<Item = &Session<W>> {
        self.by_handle.values()
    }

    /// Get connection count.
    pub fn connection_count(&self) -> usize {
        self.by_handle.len()
    }

    /// Get registered-name count.
    pub fn registered_count(&self) -> usize {
        self.by_name.len()
    }

    /// Remove every session, yielding them for teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Session<W>> + '_ {
        self.by_name.clear();
        self.by_handle.drain().map(|(_, session)| session)
    }
}

impl<W> Default for ConnectionRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}
