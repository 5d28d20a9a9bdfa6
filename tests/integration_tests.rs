//! End-to-end tests: real server, real clients, loopback TCP.

use assert_approx_eq::assert_approx_eq;
use client::bot::{self, BotConfig};
use client::input::InputScript;
use client::network::{ClientConfig, ConnectError, ConnectionManager, ConnectionState};
use server::connection::ConnectionConfig;
use server::network::{Server, ServerConfig};
use server::registry::World;
use shared::protocol::{encode, read_message, write_message, Message, HEADER_SIZE};
use shared::{InputState, PlayerState, Snapshot, PLAYER_SPEED, SPAWN_X, SPAWN_Y};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Server running on its own runtime thread; shuts down when dropped.
struct TestServer {
    addr: SocketAddr,
    world: Arc<World>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with(ConnectionConfig::default())
    }

    fn start_with(connection: ConnectionConfig) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let config = ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            connection,
            ..ServerConfig::default()
        };
        let server = runtime.block_on(Server::bind(config)).unwrap();
        let addr = server.local_addr().unwrap();
        let world = server.world();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let thread = thread::spawn(move || {
            runtime
                .block_on(server.run_until(async {
                    let _ = stop_rx.await;
                }))
                .unwrap();
        });

        Self {
            addr,
            world,
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }

    fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn find_by_name<'a>(snapshot: &'a Snapshot, name: &str) -> Option<&'a PlayerState> {
    snapshot.values().find(|player| player.name == name)
}

fn right() -> InputState {
    InputState {
        right: true,
        ..InputState::default()
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[test]
    fn unreachable_server_is_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = ConnectionManager::default();
        let result = client.connect("127.0.0.1", port, "lonely");

        assert!(matches!(
            result,
            Err(ConnectError::Refused) | Err(ConnectError::Timeout)
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.snapshot().is_empty());
        client.disconnect();
    }

    #[test]
    fn connect_registers_player_and_disconnect_removes_it() {
        let server = TestServer::start();
        let mut client = ConnectionManager::default();

        client.connect("127.0.0.1", server.port(), "alice").unwrap();
        assert!(eventually(|| server.world.player_count() == 1));

        client.disconnect();
        assert!(!client.is_connected());
        assert!(eventually(|| server.world.player_count() == 0));
    }

    #[test]
    fn disconnect_while_receiver_blocked_returns_promptly() {
        let server = TestServer::start();
        let mut client = ConnectionManager::default();
        client.connect("127.0.0.1", server.port(), "idle").unwrap();

        assert!(client.send_input(InputState::default()));
        assert!(eventually(|| !client.snapshot().is_empty()));

        // no further input: the receive thread is parked on a read
        let started = Instant::now();
        client.disconnect();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.snapshot().is_empty());
        assert!(client.last_error().is_none());
        assert!(!client.send_input(InputState::default()));
    }

    #[test]
    fn server_shutdown_surfaces_as_client_error() {
        let server = TestServer::start();
        let mut client = ConnectionManager::default();
        client.connect("127.0.0.1", server.port(), "alice").unwrap();
        assert!(eventually(|| server.world.player_count() == 1));

        drop(server);

        assert!(eventually(|| !client.is_connected()));
        assert!(client.last_error().is_some());
    }

    #[test]
    fn idle_client_is_dropped_by_server() {
        let server = TestServer::start_with(ConnectionConfig {
            idle_timeout: Some(Duration::from_millis(200)),
            ..ConnectionConfig::default()
        });
        let mut client = ConnectionManager::default();
        client.connect("127.0.0.1", server.port(), "sleepy").unwrap();
        assert!(eventually(|| server.world.player_count() == 1));

        assert!(eventually(|| server.world.player_count() == 0));
        assert!(eventually(|| !client.is_connected()));
        assert_eq!(
            client.last_error().as_deref(),
            Some("Server closed connection")
        );
    }
}

/// SYNCHRONIZATION TESTS
mod sync_tests {
    use super::*;

    #[test]
    fn movement_is_visible_to_other_clients() {
        let server = TestServer::start();

        let mut alice = ConnectionManager::default();
        let mut bob = ConnectionManager::default();
        alice.connect("127.0.0.1", server.port(), "alice").unwrap();
        bob.connect("127.0.0.1", server.port(), "bob").unwrap();

        for _ in 0..10 {
            assert!(alice.send_input(right()));
        }

        let target = SPAWN_X + 10.0 * PLAYER_SPEED;
        assert!(eventually(|| {
            find_by_name(&alice.snapshot(), "alice").map_or(false, |p| p.x == target)
        }));

        // bob only learns about alice's moves in the reply to bob's own input
        assert!(bob.send_input(InputState::default()));
        assert!(eventually(|| {
            find_by_name(&bob.snapshot(), "alice").is_some()
        }));

        let snapshot = bob.snapshot();
        let seen = find_by_name(&snapshot, "alice").unwrap();
        assert_approx_eq!(seen.x, target);
        assert_approx_eq!(seen.y, SPAWN_Y);

        let me = find_by_name(&snapshot, "bob").unwrap();
        assert_approx_eq!(me.x, SPAWN_X);
    }

    #[test]
    fn dropped_peer_disappears_from_other_snapshots() {
        let server = TestServer::start();

        let mut observer = ConnectionManager::default();
        observer.connect("127.0.0.1", server.port(), "observer").unwrap();

        let mut raw = TcpStream::connect(server.addr).unwrap();
        let named = InputState {
            name: "ghost".to_string(),
            ..InputState::default()
        };
        write_message(&mut raw, &Message::Input(named)).unwrap();
        let reply = read_message(&mut raw).unwrap().into_snapshot().unwrap();
        assert!(find_by_name(&reply, "ghost").is_some());

        assert!(observer.send_input(InputState::default()));
        assert!(eventually(|| find_by_name(&observer.snapshot(), "ghost").is_some()));

        drop(raw);
        assert!(eventually(|| server.world.player_count() == 1));

        assert!(observer.send_input(InputState::default()));
        assert!(eventually(|| {
            let snapshot = observer.snapshot();
            snapshot.len() == 1 && find_by_name(&snapshot, "observer").is_some()
        }));
    }

    #[test]
    fn identities_are_never_reused() {
        let server = TestServer::start();

        let mut first = TcpStream::connect(server.addr).unwrap();
        write_message(&mut first, &Message::Input(InputState::default())).unwrap();
        let first_id = *read_message(&mut first)
            .unwrap()
            .into_snapshot()
            .unwrap()
            .keys()
            .next()
            .unwrap();
        drop(first);
        assert!(eventually(|| server.world.player_count() == 0));

        let mut second = TcpStream::connect(server.addr).unwrap();
        write_message(&mut second, &Message::Input(InputState::default())).unwrap();
        let snapshot = read_message(&mut second).unwrap().into_snapshot().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains_key(&first_id));
        assert!(*snapshot.keys().next().unwrap() > first_id);
    }

    #[test]
    fn bot_walks_its_pattern() {
        let server = TestServer::start();

        let config = BotConfig {
            host: "127.0.0.1".to_string(),
            port: server.port(),
            name: "walker".to_string(),
            ticks: Some(6),
            tick_interval: Duration::from_millis(20),
            client: ClientConfig::default(),
        };
        let script = InputScript::new("right,down".parse().unwrap());

        let summary = bot::run(&config, script).unwrap();

        assert_eq!(summary.ticks_sent, 6);
        assert_eq!(summary.replies_received, 6);
        assert!(summary.error.is_none());
        let me = find_by_name(&summary.last_snapshot, "walker").unwrap();
        assert_approx_eq!(me.x, SPAWN_X + 3.0 * PLAYER_SPEED);
        assert_approx_eq!(me.y, SPAWN_Y + 3.0 * PLAYER_SPEED);
    }
}

/// MALFORMED INPUT TESTS
mod protocol_tests {
    use super::*;

    fn expect_closed(stream: &mut TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 64];
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("expected the server to close, got {} bytes", n),
        }
    }

    #[test]
    fn oversized_frame_closes_connection() {
        let server = TestServer::start();
        let mut raw = TcpStream::connect(server.addr).unwrap();
        raw.write_all(&u32::MAX.to_be_bytes()).unwrap();

        expect_closed(&mut raw);
        assert!(eventually(|| server.world.player_count() == 0));
    }

    #[test]
    fn unsupported_version_closes_connection() {
        let server = TestServer::start();
        let mut raw = TcpStream::connect(server.addr).unwrap();

        let mut frame = encode(&Message::Input(InputState::default())).unwrap();
        frame[HEADER_SIZE] = 99;
        raw.write_all(&frame).unwrap();

        expect_closed(&mut raw);
        assert!(eventually(|| server.world.player_count() == 0));
    }

    #[test]
    fn body_that_is_not_an_input_closes_connection() {
        let server = TestServer::start();
        let mut raw = TcpStream::connect(server.addr).unwrap();

        let body = bincode::serialize(&"definitely not an input").unwrap();
        let mut frame = ((body.len() + 1) as u32).to_be_bytes().to_vec();
        frame.push(shared::protocol::PROTOCOL_VERSION);
        frame.extend_from_slice(&body);
        raw.write_all(&frame).unwrap();

        expect_closed(&mut raw);
        assert!(eventually(|| server.world.player_count() == 0));
    }

    #[test]
    fn frames_split_across_writes_are_reassembled() {
        let server = TestServer::start();
        let mut raw = TcpStream::connect(server.addr).unwrap();
        raw.set_nodelay(true).unwrap();

        let frame = encode(&Message::Input(right())).unwrap();
        for byte in &frame {
            raw.write_all(std::slice::from_ref(byte)).unwrap();
            thread::sleep(Duration::from_millis(1));
        }

        let snapshot = read_message(&mut raw).unwrap().into_snapshot().unwrap();
        let me = snapshot.values().next().unwrap();
        assert_approx_eq!(me.x, SPAWN_X + PLAYER_SPEED);
    }

    #[test]
    fn back_to_back_frames_each_get_a_reply() {
        let server = TestServer::start();
        let mut raw = TcpStream::connect(server.addr).unwrap();

        let mut burst = Vec::new();
        for _ in 0..3 {
            burst.extend(encode(&Message::Input(right())).unwrap());
        }
        raw.write_all(&burst).unwrap();

        let mut last_x = SPAWN_X;
        for tick in 1..=3 {
            let snapshot = read_message(&mut raw).unwrap().into_snapshot().unwrap();
            last_x = snapshot.values().next().unwrap().x;
            assert_approx_eq!(last_x, SPAWN_X + tick as f32 * PLAYER_SPEED);
        }
        assert_approx_eq!(last_x, SPAWN_X + 3.0 * PLAYER_SPEED);
    }
}
