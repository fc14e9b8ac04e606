use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Simulation tick interval in milliseconds (default 60 Hz)
    #[arg(short, long)]
    tick_ms: Option<f64>,

    /// Interval between snapshot broadcasts in milliseconds
    #[arg(short, long, default_value = "200")]
    broadcast_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let mut config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        broadcast_interval: Duration::from_millis(args.broadcast_ms),
        ..ServerConfig::default()
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval = Duration::from_secs_f64(tick_ms.max(0.0) / 1000.0);
    }
    let config = config.validate()?;

    info!(
        "Starting server (tick {:?}, broadcast {:?})",
        config.tick_interval, config.broadcast_interval
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
