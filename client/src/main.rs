use clap::Parser;
use client::bot::{self, BotConfig};
use client::input::{InputPattern, InputScript};
use client::network::ClientConfig;
use log::info;
use shared::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name sent with every input
    #[arg(short, long, default_value = "Player")]
    name: String,

    /// Comma-separated moves, e.g. "right,right,up+left,idle"
    #[arg(long, default_value = "idle")]
    pattern: InputPattern,

    /// Ignore the pattern and change direction randomly every N ticks
    #[arg(long)]
    wander: Option<usize>,

    /// Number of inputs to send (runs until disconnected if omitted)
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Milliseconds between inputs
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Seconds to wait for the connection to be established
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let script = match args.wander {
        Some(every) => InputScript::wander(every),
        None => InputScript::new(args.pattern),
    };

    let config = BotConfig {
        host: args.host,
        port: args.port,
        name: args.name,
        ticks: args.ticks,
        tick_interval: Duration::from_millis(args.tick_ms),
        client: ClientConfig {
            connect_timeout: Duration::from_secs(args.connect_timeout),
            ..ClientConfig::default()
        },
    };

    info!("Starting client as {}", config.name);
    let summary = bot::run(&config, script)?;

    if let Some(error) = summary.error {
        return Err(error.into());
    }

    Ok(())
}
