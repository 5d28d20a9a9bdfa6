//! Client connection manager
//!
//! Owns one TCP connection to the server and a background thread that keeps
//! decoding snapshots from it. The caller's thread never blocks on the
//! network except inside `connect`, `send_input` (socket write) and the
//! bounded wait in `disconnect`.

use log::{debug, info, warn};
use shared::protocol::{read_message, write_message, Message, WireError};
use shared::{InputState, Snapshot};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connection timeout - server not responding")]
    Timeout,

    #[error("connection refused - server not running")]
    Refused,

    #[error("connection error: {0}")]
    Other(String),
}

impl From<io::Error> for ConnectError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::Timeout,
            io::ErrorKind::ConnectionRefused => ConnectError::Refused,
            _ => ConnectError::Other(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Bound on a single input write once connected.
    pub write_timeout: Option<Duration>,
    /// How long `disconnect` waits for the receive thread.
    pub join_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            write_timeout: Some(Duration::from_secs(5)),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// State shared with the receive thread.
struct Session {
    state: ConnectionState,
    last_error: Option<String>,
    snapshot: Arc<Snapshot>,
    /// Snapshots published on the current connection.
    received: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            snapshot: Arc::new(Snapshot::new()),
            received: 0,
        }
    }

    fn fail(&mut self, message: String) {
        self.state = ConnectionState::Disconnected;
        self.last_error = Some(message);
    }
}

type SharedSession = Arc<Mutex<Session>>;

// The session lock guards plain field swaps; a poisoned lock still holds
// consistent data.
fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Receiver {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

pub struct ConnectionManager {
    config: ClientConfig,
    session: SharedSession,
    stream: Option<TcpStream>,
    receiver: Option<Receiver>,
    running: Arc<AtomicBool>,
    player_name: String,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(Session::new())),
            stream: None,
            receiver: None,
            running: Arc::new(AtomicBool::new(false)),
            player_name: String::new(),
        }
    }

    /// Opens a connection and starts the receive thread.
    ///
    /// An existing connection is closed first. On failure no socket is left
    /// open and the state stays `Disconnected`.
    pub fn connect(&mut self, host: &str, port: u16, name: &str) -> Result<(), ConnectError> {
        if self.stream.is_some() || self.receiver.is_some() {
            self.disconnect();
        }

        lock(&self.session).state = ConnectionState::Connecting;
        info!("Connecting to {}:{}...", host, port);

        let (stream, reader) = match self.open(host, port) {
            Ok(streams) => streams,
            Err(e) => {
                warn!("Connection failed: {}", e);
                lock(&self.session).fail(e.to_string());
                return Err(e);
            }
        };

        // Fresh flag per connection so a detached thread from an earlier
        // connection can never observe this one as running.
        self.running = Arc::new(AtomicBool::new(true));
        {
            let mut session = lock(&self.session);
            session.state = ConnectionState::Connected;
            session.last_error = None;
            session.snapshot = Arc::new(Snapshot::new());
            session.received = 0;
        }

        let (done_tx, done_rx) = mpsc::channel();
        let session = Arc::clone(&self.session);
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name("snapshot-receiver".to_string())
            .spawn(move || {
                receive_loop(reader, session, running);
                drop(done_tx);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = stream.shutdown(Shutdown::Both);
                let err = ConnectError::Other(e.to_string());
                lock(&self.session).fail(err.to_string());
                return Err(err);
            }
        };

        self.receiver = Some(Receiver {
            handle,
            done: done_rx,
        });
        self.stream = Some(stream);
        self.player_name = name.to_string();

        info!("Connected to server at {}:{}", host, port);
        Ok(())
    }

    fn open(&self, host: &str, port: u16) -> Result<(TcpStream, TcpStream), ConnectError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::Other(e.to_string()))?
            .collect();

        let mut last_err = ConnectError::Other(format!("no addresses for {}", host));
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => return Self::prepare(stream),
                Err(e) => last_err = e.into(),
            }
        }
        Err(last_err)
    }

    // Steady-state traffic has no read timeout; the receive thread blocks
    // until the server replies or the socket is shut down.
    fn prepare(stream: TcpStream) -> Result<(TcpStream, TcpStream), ConnectError> {
        let configured = stream
            .set_read_timeout(None)
            .and_then(|_| stream.set_nodelay(true))
            .and_then(|_| stream.try_clone());

        match configured {
            Ok(reader) => Ok((stream, reader)),
            Err(e) => {
                let _ = stream.shutdown(Shutdown::Both);
                Err(ConnectError::Other(e.to_string()))
            }
        }
    }

    /// Stops the receive thread, closes the socket and clears the snapshot.
    /// Safe to call at any time.
    pub fn disconnect(&mut self) {
        let was_active = self.stream.is_some() || self.receiver.is_some();
        if was_active {
            info!("Disconnecting from server...");
        }

        self.running.store(false, Ordering::SeqCst);

        // Shutting the socket down fails the receive thread's pending read.
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(receiver) = self.receiver.take() {
            match receiver.done.recv_timeout(self.config.join_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = receiver.handle.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Receive thread did not stop within {:?}, detaching it",
                        self.config.join_timeout
                    );
                }
            }
        }

        {
            let mut session = lock(&self.session);
            session.state = ConnectionState::Disconnected;
            session.snapshot = Arc::new(Snapshot::new());
            session.received = 0;
        }

        if was_active {
            info!("Disconnected");
        }
    }

    /// Sends one tick of input, stamped with the connected player's name.
    ///
    /// Returns `false` when not connected or when the write fails; a failed
    /// write also drops the connection. The reply arrives later through the
    /// receive thread.
    pub fn send_input(&mut self, mut input: InputState) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        input.name.clone_from(&self.player_name);

        let sent = match stream.set_write_timeout(self.config.write_timeout) {
            Ok(()) => write_message(stream, &Message::Input(input)),
            Err(e) => Err(WireError::from(e)),
        };

        if let Err(e) = sent {
            warn!("Send error: {}", e);
            self.running.store(false, Ordering::SeqCst);
            let _ = stream.shutdown(Shutdown::Both);
            lock(&self.session).fail("Failed to send data".to_string());
            return false;
        }

        true
    }

    /// Latest snapshot received from the server. Never mutated after it is
    /// published; a new one replaces it wholesale.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&lock(&self.session).snapshot)
    }

    /// Number of snapshots received since the current connection opened.
    /// The server sends exactly one per input.
    pub fn snapshots_received(&self) -> u64 {
        lock(&self.session).received
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.session).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.session).last_error.clone()
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Decodes snapshots until the stream fails. The session lock is only taken
/// to publish a result, never across the blocking read.
fn receive_loop(mut stream: TcpStream, session: SharedSession, running: Arc<AtomicBool>) {
    loop {
        let result = read_message(&mut stream)
            .and_then(|msg| msg.into_snapshot().map_err(WireError::from));

        match result {
            Ok(snapshot) => {
                // Checked under the lock so nothing lands after `disconnect`
                // has cleared the session.
                let mut current = lock(&session);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                debug!("Received snapshot with {} player(s)", snapshot.len());
                current.snapshot = Arc::new(snapshot);
                current.received += 1;
            }
            Err(e) => {
                // After an intentional disconnect the read error is expected.
                if running.swap(false, Ordering::SeqCst) {
                    let message = match e {
                        WireError::PeerClosed => "Server closed connection".to_string(),
                        WireError::PeerReset(_) => "Connection lost".to_string(),
                        other => format!("Network error: {}", other),
                    };
                    warn!("Receive error: {}", message);
                    lock(&session).fail(message);
                }
                break;
            }
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
    debug!("Receive thread stopped");
}
