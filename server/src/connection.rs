//! Per-connection handler
//!
//! Each accepted socket goes through `Initializing -> Active -> Closed`:
//! - Initializing: take an identity from the [`World`] and spawn the player.
//! - Active: read one input, apply it, reply with the full registry. Repeat.
//! - Closed: entered on the first read, write or timeout failure. The player
//!   is removed from the registry and the socket is shut down.
//!
//! The server only ever replies to the connection that sent the input, so a
//! client sees other players move when it sends its own next input.

use crate::registry::{RegistryError, World};
use log::{debug, error, info, warn};
use shared::protocol::{read_message_async, write_message_async, Message, WireError};
use shared::InputState;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Disconnect a peer that sends nothing for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on writing one reply to a slow peer.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(30)),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a session ended. Every variant gets the same cleanup.
#[derive(Debug, Error)]
pub enum CloseReason {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("no input for {0:?}")]
    IdleTimeout(Duration),

    #[error("reply not written within {0:?}")]
    WriteTimeout(Duration),

    #[error("registry invariant violated: {0}")]
    Registry(#[from] RegistryError),
}

impl CloseReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseReason::Wire(WireError::PeerClosed))
    }
}

/// Removes the player when dropped, including when the handler task is aborted.
struct Registration {
    world: Arc<World>,
    id: u32,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.world.leave(self.id);
    }
}

/// Runs one connection to completion and reports why it closed.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    world: Arc<World>,
    config: ConnectionConfig,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = match world.join() {
        Ok(id) => id,
        Err(e) => {
            let _ = stream.shutdown().await;
            return e.into();
        }
    };
    let registration = Registration {
        world: Arc::clone(&world),
        id,
    };
    info!("Player {} connected from {}", id, peer);

    let reason = match serve(&mut stream, id, &world, &config).await {
        Ok(never) => match never {},
        Err(reason) => reason,
    };

    drop(registration);
    let _ = stream.shutdown().await;

    match &reason {
        CloseReason::Wire(WireError::PeerClosed) => {
            info!("Player {} disconnected", id)
        }
        CloseReason::Wire(WireError::PeerReset(_)) => {
            info!("Player {} connection reset", id)
        }
        CloseReason::Registry(e) => error!("Player {} dropped: {}", id, e),
        other => warn!("Player {} dropped: {}", id, other),
    }

    reason
}

async fn serve<S>(
    stream: &mut S,
    id: u32,
    world: &World,
    config: &ConnectionConfig,
) -> Result<Infallible, CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let input = next_input(stream, config.idle_timeout).await?;
        debug!("Player {} input: {:?}", id, input);

        let snapshot = world.update(id, &input)?;

        let reply = Message::Snapshot(snapshot);
        timeout(config.write_timeout, write_message_async(stream, &reply))
            .await
            .map_err(|_| CloseReason::WriteTimeout(config.write_timeout))??;
    }
}

async fn next_input<S>(stream: &mut S, idle: Option<Duration>) -> Result<InputState, CloseReason>
where
    S: AsyncRead + Unpin,
{
    let message = match idle {
        Some(limit) => timeout(limit, read_message_async(stream))
            .await
            .map_err(|_| CloseReason::IdleTimeout(limit))??,
        None => read_message_async(stream).await?,
    };

    message
        .into_input()
        .map_err(|e| CloseReason::Wire(WireError::Protocol(e)))
}
