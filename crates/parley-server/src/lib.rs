// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parley chat server
//!
//! A multi-user text chat service on a single TCP endpoint. Clients register
//! a unique display name, then exchange broadcast and private messages using
//! a line-oriented protocol (see [`server::protocol`]).
//!
//! # Architecture
//!
//! - **Acceptor**: owns the listener, assigns each connection a handle and
//!   spawns its reader and writer tasks
//! - **Reader** (one per connection): frames the byte stream into lines and
//!   posts them to the dispatcher's bounded queue
//! - **Dispatcher** (single task): the only owner of the name and connection
//!   registries; decides routing for every event in queue order
//! - **Writer** (one per connection): serializes outbound lines to its peer
//!
//! # Quick Start
//!
//! ```no_run
//! use parley_server::{ChatServer, ServerConfig};
//!
//! # async fn example() -> Result<(), parley_server::ServerError> {
//! let server = ChatServer::bind(ServerConfig::default()).await?;
//! let handle = server.handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.shutdown();
//! });
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use server::{ChatServer, ServerError, ServerHandle, ServerStats};
