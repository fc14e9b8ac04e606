use clap::Parser;
use client::game::{ClientGame, Timing};
use client::input::ScriptedInput;
use client::rendering::LogRenderer;
use client::session::Session;
use client::JoinOutcome;
use log::{info, warn};
use shared::IdentityKey;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8000")]
    server: String,

    /// Host a new lobby
    #[arg(long, conflicts_with = "join")]
    host_lobby: bool,

    /// Join the lobby with this key
    #[arg(short = 'j', long)]
    join: Option<String>,

    /// As host, start the lobby this many milliseconds after creating it
    #[arg(long, default_value = "5000")]
    start_after_ms: u64,

    /// Held-key script, e.g. "D:500,:300,WA:200"
    #[arg(long, default_value = "")]
    script: String,

    /// Stop this many milliseconds after the game starts
    #[arg(long)]
    run_ms: Option<u64>,

    /// Simulation tick interval in milliseconds; must match the server
    #[arg(short, long)]
    tick_ms: Option<f64>,

    /// Snapshot broadcast interval in milliseconds; must match the server
    #[arg(short, long, default_value = "200")]
    broadcast_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let input = ScriptedInput::parse(&args.script)?;

    let mut timing = Timing {
        broadcast_interval: Duration::from_millis(args.broadcast_ms),
        ..Timing::default()
    };
    if let Some(tick_ms) = args.tick_ms {
        timing.tick_interval = Duration::from_secs_f64(tick_ms.max(1.0) / 1000.0);
    }

    info!("Connecting to {}", args.server);
    let mut session = Session::establish(&args.server).await?;

    if let Some(lobby) = args.join.as_deref() {
        let lobby = IdentityKey::new(lobby)?;
        match session.join(&lobby).await? {
            JoinOutcome::Joined => info!("Waiting for the host to start"),
            outcome => {
                warn!("Could not join lobby {}: {:?}", lobby, outcome);
                session.close().await?;
                return Ok(());
            }
        }
    } else if args.host_lobby {
        session.host().await?;
        println!("Lobby key: {}", session.key());
        tokio::time::sleep(Duration::from_millis(args.start_after_ms)).await;
        session.start_game().await?;
    } else {
        warn!("Nothing to do: pass --host-lobby or --join <KEY>");
        session.close().await?;
        return Ok(());
    }

    let start = session.await_start().await?;
    let (server, streams, transport) = session.into_parts();
    let mut game = ClientGame::new(server.clone(), streams, &start, input, LogRenderer::default(), timing);

    let limit = args.run_ms.map(Duration::from_millis);
    tokio::select! {
        result = game.run(limit) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, leaving"),
    }

    server.close(shared::frame::CLOSE_NORMAL, "bye");
    let event = transport.await?;
    info!("Connection closed ({}: {})", event.code, event.reason);

    Ok(())
}
