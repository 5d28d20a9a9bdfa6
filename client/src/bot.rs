//! Headless game loop: sends scripted input at a fixed tick rate and logs
//! the world as the server reports it.

use crate::input::InputScript;
use crate::network::{ClientConfig, ConnectError, ConnectionManager};
use log::{info, warn};
use shared::Snapshot;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on waiting for replies to inputs already sent.
const FINAL_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    /// Number of inputs to send; `None` runs until the connection drops.
    pub ticks: Option<u64>,
    pub tick_interval: Duration,
    pub client: ClientConfig,
}

/// How a bot run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct BotSummary {
    pub ticks_sent: u64,
    pub replies_received: u64,
    pub last_snapshot: Arc<Snapshot>,
    pub error: Option<String>,
}

pub fn run(config: &BotConfig, mut script: InputScript) -> Result<BotSummary, ConnectError> {
    let mut manager = ConnectionManager::new(config.client.clone());
    manager.connect(&config.host, config.port, &config.name)?;

    let mut ticks_sent = 0;
    let mut last_seen: Option<Arc<Snapshot>> = None;
    let mut next_tick = Instant::now();

    while config.ticks.map_or(true, |limit| ticks_sent < limit) {
        if !manager.send_input(script.next_input()) {
            break;
        }
        ticks_sent += 1;

        let snapshot = manager.snapshot();
        if last_seen.as_ref().map_or(true, |prev| **prev != *snapshot) {
            log_snapshot(&snapshot);
            last_seen = Some(snapshot);
        }

        next_tick += config.tick_interval;
        if let Some(wait) = next_tick.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        } else {
            next_tick = Instant::now();
        }
    }

    // One reply per input; wait for the outstanding ones before tearing down.
    let deadline = Instant::now() + FINAL_REPLY_TIMEOUT;
    while manager.is_connected()
        && manager.snapshots_received() < ticks_sent
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(1));
    }

    let error = manager.last_error();
    if let Some(e) = &error {
        warn!("Connection ended: {}", e);
    }

    let replies_received = manager.snapshots_received();
    let last_snapshot = manager.snapshot();
    manager.disconnect();

    info!("Sent {} input(s), received {} snapshot(s)", ticks_sent, replies_received);
    Ok(BotSummary {
        ticks_sent,
        replies_received,
        last_snapshot,
        error,
    })
}

fn log_snapshot(snapshot: &Snapshot) {
    info!("{} player(s) online", snapshot.len());
    for player in snapshot.values() {
        info!(
            "  #{} {:<16} ({:>7.1}, {:>7.1})",
            player.id, player.name, player.x, player.y
        );
    }
}
