//! TCP accept loop that hands every connection to its own handler task

use crate::connection::{handle_connection, ConnectionConfig};
use crate::registry::World;
use log::{error, info, warn};
use shared::protocol::MAX_SNAPSHOT_PLAYERS;
use shared::{DEFAULT_HOST, DEFAULT_PORT, PLAYER_SPEED};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    /// Movement applied per direction flag per input.
    pub speed: f32,
    /// Connections past this count are closed right after accept. Capped at
    /// `MAX_SNAPSHOT_PLAYERS` so every reply fits in one frame.
    pub max_connections: usize,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            speed: PLAYER_SPEED,
            max_connections: 64,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Listening server owning the shared [`World`].
///
/// Each accepted connection runs in its own task on the multi-threaded
/// runtime so a slow or silent peer never holds up the accept loop or the
/// other players. On shutdown the listener is closed and every handler is
/// aborted; aborted handlers still deregister their player.
pub struct Server {
    listener: TcpListener,
    world: Arc<World>,
    slots: Arc<Semaphore>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        if config.max_connections > MAX_SNAPSHOT_PLAYERS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "max_connections {} exceeds the snapshot limit of {} players",
                    config.max_connections, MAX_SNAPSHOT_PLAYERS
                ),
            ));
        }

        let listener = TcpListener::bind(&config.addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            world: Arc::new(World::new(config.speed)),
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> Arc<World> {
        Arc::clone(&self.world)
    }

    /// Serves until Ctrl-C.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C");
        })
        .await
    }

    /// Serves until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(&mut handlers, stream, peer),
                    Err(e) => {
                        // Usually per-connection (e.g. aborted handshake) or fd exhaustion.
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Connection handler panicked: {}", e);
                        }
                    }
                }
            }
        }

        info!(
            "Server shutting down, closing {} connection(s)",
            handlers.len()
        );
        drop(self.listener);
        handlers.shutdown().await;
        info!("Server stopped");
        Ok(())
    }

    fn dispatch(&self, handlers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Rejecting {}: server full ({} connections)",
                    peer, self.config.max_connections
                );
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let world = Arc::clone(&self.world);
        let config = self.config.connection;
        handlers.spawn(async move {
            let _permit = permit;
            handle_connection(stream, peer, world, config).await;
        });

        info!(
            "Accepted {} ({} active connection(s))",
            peer,
            self.config.max_connections - self.slots.available_permits()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{read_message_async, write_message_async, Message, WireError};
    use shared::InputState;
    use tokio::sync::oneshot;

    fn local_config() -> ServerConfig {
        ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        }
    }

    async fn wait_for_players(world: &World, count: usize) {
        for _ in 0..200 {
            if world.player_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} players, found {}",
            count,
            world.player_count()
        );
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "127.0.0.1:50000");
        assert_eq!(config.speed, PLAYER_SPEED);
        assert!(config.max_connections > 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_capacity_beyond_snapshot_limit() {
        let config = ServerConfig {
            max_connections: MAX_SNAPSHOT_PLAYERS + 1,
            ..local_config()
        };
        let err = Server::bind(config).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let config = ServerConfig {
            max_connections: MAX_SNAPSHOT_PLAYERS,
            ..local_config()
        };
        assert!(Server::bind(config).await.is_ok());
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let server = Server::bind(local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let world = server.world();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let input = InputState {
            left: true,
            ..InputState::default()
        };
        write_message_async(&mut stream, &Message::Input(input))
            .await
            .unwrap();
        let snapshot = read_message_async(&mut stream)
            .await
            .unwrap()
            .into_snapshot()
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        let me = snapshot.values().next().unwrap();
        assert_eq!(me.x, shared::SPAWN_X - PLAYER_SPEED);

        drop(stream);
        wait_for_players(&world, 0).await;

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connections_past_capacity_are_closed() {
        let config = ServerConfig {
            max_connections: 1,
            ..local_config()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let world = server.world();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let _first = TcpStream::connect(addr).await.unwrap();
        wait_for_players(&world, 1).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let result = read_message_async(&mut second).await;
        assert!(matches!(
            result,
            Err(WireError::PeerClosed) | Err(WireError::PeerReset(_))
        ));
        assert_eq!(world.player_count(), 1);

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_aborts_handlers_and_clears_registry() {
        let server = Server::bind(local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let world = server.world();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        wait_for_players(&world, 2).await;

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(world.player_count(), 0);
        assert!(read_message_async(&mut a).await.is_err());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
