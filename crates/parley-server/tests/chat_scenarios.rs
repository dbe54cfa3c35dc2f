// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end chat scenarios over real TCP connections.
//!
//! "Receives nothing" is checked without sleeping: the client sends a command
//! with a known reply and expects that reply as its very next line. Each
//! writer preserves dispatch order, so nothing else was routed in between.

use parley_server::{ChatServer, ServerConfig, ServerHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<Result<(), parley_server::ServerError>>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(mut config: ServerConfig) -> Self {
        config.set_listen_addr("127.0.0.1:0".parse().unwrap());
        let server = ChatServer::bind(config).await.unwrap();
        let addr = server.local_addr();
        let handle = server.handle();
        let task = tokio::spawn(server.run());
        Self { addr, handle, task }
    }

    async fn stop(self) {
        self.handle.shutdown();
        timeout(IO_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    /// Connect and register, returning the client and its roster reply.
    async fn register(addr: SocketAddr, name: &str) -> (Self, String) {
        let mut client = Self::connect(addr).await;
        client.send(&format!("REG {}", name)).await;
        let roster = client.recv().await;
        (client, roster)
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{}\n", line).as_bytes()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(IO_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed while waiting for a line")
    }

    /// Wait for the server to close the connection.
    async fn expect_eof(&mut self) {
        let next = timeout(IO_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for close");
        match next {
            Ok(None) | Err(_) => {}
            Ok(Some(line)) => panic!("expected close, got {:?}", line),
        }
    }

    /// Assert no line was routed to this registered client before now.
    async fn expect_quiet(&mut self) {
        self.send("PMSG no-such-user ping").await;
        assert_eq!(self.recv().await, "ERR 3");
    }

    /// Same check for a connection that has not registered.
    async fn expect_quiet_unregistered(&mut self) {
        self.send("PING").await;
        assert_eq!(self.recv().await, "ERR 4");
    }
}

/// Parse `<N> [<names...>]`, returning names sorted.
fn parse_roster(line: &str) -> Vec<String> {
    let (count, rest) = line.split_once(' ').expect("roster has a count");
    let inner = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .expect("roster is bracketed");
    let mut names: Vec<String> = inner.split_whitespace().map(str::to_owned).collect();
    assert_eq!(count.parse::<usize>().unwrap(), names.len());
    names.sort();
    names
}

#[tokio::test]
async fn test_happy_registration() {
    let server = TestServer::start().await;

    let (mut alice, roster) = Client::register(server.addr, "alice").await;
    assert_eq!(roster, "1 [alice]");

    let (_bob, roster) = Client::register(server.addr, "bob").await;
    assert!(roster == "2 [alice bob]" || roster == "2 [bob alice]");
    assert_eq!(alice.recv().await, "bob has joined the chat");

    server.stop().await;
}

#[tokio::test]
async fn test_name_collision() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");

    let mut carol = Client::connect(server.addr).await;
    carol.send("REG alice").await;
    assert_eq!(carol.recv().await, "ERR 0");

    alice.expect_quiet().await;
    bob.expect_quiet().await;

    // still unregistered, a retry succeeds
    carol.send("REG carol").await;
    assert_eq!(
        parse_roster(&carol.recv().await),
        vec!["alice", "bob", "carol"]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_names() {
    let server = TestServer::start().await;
    let mut dave = Client::connect(server.addr).await;

    dave.send("REG john doe").await;
    assert_eq!(dave.recv().await, "ERR 2");

    dave.send("REG abcdefghijklmnopqrstuvwxyz").await;
    assert_eq!(dave.recv().await, "ERR 1");

    dave.send("REG").await;
    assert_eq!(dave.recv().await, "ERR 4");

    dave.send("MESG not yet").await;
    assert_eq!(dave.recv().await, "ERR 4");

    server.stop().await;
}

#[tokio::test]
async fn test_broadcast() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");

    alice.send("MESG hi all").await;
    assert_eq!(bob.recv().await, "alice: hi all");
    alice.expect_quiet().await;

    server.stop().await;
}

#[tokio::test]
async fn test_private_message() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    let (mut carol, _) = Client::register(server.addr, "carol").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");
    assert_eq!(alice.recv().await, "carol has joined the chat");
    assert_eq!(bob.recv().await, "carol has joined the chat");

    alice.send("PMSG bob sshh").await;
    assert_eq!(bob.recv().await, "Private message from alice: sshh");
    carol.expect_quiet().await;

    alice.send("PMSG dave hello").await;
    assert_eq!(alice.recv().await, "ERR 3");

    server.stop().await;
}

#[tokio::test]
async fn test_clean_exit() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");

    alice.send("EXIT").await;
    assert_eq!(alice.recv().await, "1 [bob]");
    alice.expect_eof().await;

    assert_eq!(bob.recv().await, "alice has left the chat");
    bob.send("PMSG alice x").await;
    assert_eq!(bob.recv().await, "ERR 3");

    // the name is free again
    let (_alice2, roster) = Client::register(server.addr, "alice").await;
    assert_eq!(parse_roster(&roster), vec!["alice", "bob"]);
    assert_eq!(bob.recv().await, "alice has joined the chat");

    server.stop().await;
}

#[tokio::test]
async fn test_exit_reaches_every_peer_once() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    let (mut carol, _) = Client::register(server.addr, "carol").await;
    let (mut dave, _) = Client::register(server.addr, "dave").await;
    let mut lurker = Client::connect(server.addr).await;
    for (client, joins) in [
        (&mut alice, &["bob", "carol", "dave"][..]),
        (&mut bob, &["carol", "dave"][..]),
        (&mut carol, &["dave"][..]),
    ] {
        for name in joins {
            assert_eq!(client.recv().await, format!("{} has joined the chat", name));
        }
    }

    bob.send("EXIT").await;
    assert_eq!(bob.recv().await, "3 [alice carol dave]");
    bob.expect_eof().await;

    for peer in [&mut alice, &mut carol, &mut dave] {
        assert_eq!(peer.recv().await, "bob has left the chat");
        peer.expect_quiet().await;
    }
    lurker.expect_quiet_unregistered().await;

    server.stop().await;
}

#[tokio::test]
async fn test_drop_without_exit_announces_leave() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (bob, _) = Client::register(server.addr, "bob").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");

    drop(bob);
    assert_eq!(alice.recv().await, "bob has left the chat");
    alice.send("PMSG bob still there?").await;
    assert_eq!(alice.recv().await, "ERR 3");

    server.stop().await;
}

#[tokio::test]
async fn test_exit_then_drop_leaves_once() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");

    // EXIT and the socket close race each other in the dispatcher
    bob.send("EXIT").await;
    drop(bob);

    assert_eq!(alice.recv().await, "bob has left the chat");
    alice.expect_quiet().await;
    assert_eq!(server.handle.stats().await.unwrap().registered, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_join_seen_before_messages() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;

    let (mut bob, _) = Client::register(server.addr, "bob").await;
    bob.send("MESG first").await;
    bob.send("MESG second").await;

    assert_eq!(alice.recv().await, "bob has joined the chat");
    assert_eq!(alice.recv().await, "bob: first");
    assert_eq!(alice.recv().await, "bob: second");

    server.stop().await;
}

#[tokio::test]
async fn test_per_sender_fifo() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    let (mut carol, _) = Client::register(server.addr, "carol").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");
    assert_eq!(alice.recv().await, "carol has joined the chat");

    for i in 0..50 {
        bob.send(&format!("MESG b{}", i)).await;
        carol.send(&format!("MESG c{}", i)).await;
    }

    let mut from_bob = Vec::new();
    let mut from_carol = Vec::new();
    for _ in 0..100 {
        let line = alice.recv().await;
        if let Some(body) = line.strip_prefix("bob: ") {
            from_bob.push(body.to_owned());
        } else if let Some(body) = line.strip_prefix("carol: ") {
            from_carol.push(body.to_owned());
        } else {
            panic!("unexpected line {:?}", line);
        }
    }

    let expected_bob: Vec<String> = (0..50).map(|i| format!("b{}", i)).collect();
    let expected_carol: Vec<String> = (0..50).map(|i| format!("c{}", i)).collect();
    assert_eq!(from_bob, expected_bob);
    assert_eq!(from_carol, expected_carol);

    server.stop().await;
}

#[tokio::test]
async fn test_split_and_coalesced_frames() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;

    let mut bob = Client::connect(server.addr).await;
    bob.send_raw(b"REG b").await;
    bob.send_raw(b"ob\r").await;
    bob.send_raw(b"\nMESG one\r\nMESG two\nMESG thr").await;
    bob.send_raw(b"ee\n").await;

    assert_eq!(parse_roster(&bob.recv().await), vec!["alice", "bob"]);
    assert_eq!(alice.recv().await, "bob has joined the chat");
    assert_eq!(alice.recv().await, "bob: one");
    assert_eq!(alice.recv().await, "bob: two");
    assert_eq!(alice.recv().await, "bob: three");

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_line_drops_connection() {
    let config = ServerConfig {
        max_line_length: 128,
        ..Default::default()
    };
    let server = TestServer::start_with(config).await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let (mut bob, _) = Client::register(server.addr, "bob").await;
    assert_eq!(alice.recv().await, "bob has joined the chat");

    bob.send_raw(&[b'x'; 1024]).await;
    bob.expect_eof().await;
    assert_eq!(alice.recv().await, "bob has left the chat");

    server.stop().await;
}

#[tokio::test]
async fn test_stats() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let mut lurker = Client::connect(server.addr).await;
    lurker.send("HELLO").await;
    assert_eq!(lurker.recv().await, "ERR 4");

    alice.send("MESG anyone?").await;
    alice.expect_quiet().await;

    let stats = server.handle.stats().await.unwrap();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.registered, 1);
    assert_eq!(stats.broadcasts, 1);
    assert_eq!(stats.errors_sent, 2);
    assert_eq!(stats.frames_dispatched, 4);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::start().await;
    let (mut alice, _) = Client::register(server.addr, "alice").await;
    let mut lurker = Client::connect(server.addr).await;
    lurker.send("EXIT now").await;
    lurker.expect_eof().await;

    server.stop().await;
    alice.expect_eof().await;
}
