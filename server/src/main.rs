use clap::Parser;
use log::info;
use server::connection::ConnectionConfig;
use server::network::{Server, ServerConfig};
use shared::{DEFAULT_HOST, DEFAULT_PORT, PLAYER_SPEED};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Distance moved per direction flag per input
    #[arg(short, long, default_value_t = PLAYER_SPEED)]
    speed: f32,

    /// Maximum number of simultaneous connections
    #[arg(short, long, default_value_t = 64)]
    max_connections: usize,

    /// Seconds without input before a client is dropped (0 disables)
    #[arg(long, default_value_t = 30)]
    idle_timeout: u64,

    /// Seconds allowed for writing one reply
    #[arg(long, default_value_t = 5)]
    write_timeout: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let idle_timeout = match self.idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        ServerConfig {
            addr: format!("{}:{}", self.host, self.port),
            speed: self.speed,
            max_connections: self.max_connections,
            connection: ConnectionConfig {
                idle_timeout,
                write_timeout: Duration::from_secs(self.write_timeout),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!(
        "Starting server (speed {}, max {} connections)",
        config.speed, config.max_connections
    );

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
