#![cfg_attr(not(test), deny(clippy::panic))]

use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

use tidepool_server::config::ServerOptions;
use tidepool_server::driver::SharedDriver;
use tidepool_server::matchmaker::{Matchmaker, RoomSettings};
use tidepool_server::presence::{LocalPresence, Presence};
use tidepool_server::rooms::RelayRoom;
use tidepool_server::{http, logging, transport};

/// Tidepool -- distributed room server for real-time multiplayer sessions
#[derive(Parser, Debug)]
#[command(name = "tidepool-server")]
#[command(about = "A distributed, stateful room server for real-time multiplayer sessions")]
#[command(version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, short = 'p', env = "TIDEPOOL_PORT", default_value_t = 2567)]
    port: u16,

    /// Address advertised to clients for direct reconnects.
    #[arg(long, env = "TIDEPOOL_PUBLIC_ADDRESS")]
    public_address: Option<String>,

    /// Enable dev mode: presence snapshot/restore and client-visible
    /// payload errors.
    #[arg(long)]
    dev: bool,

    /// Delta-broadcast cadence in milliseconds.
    #[arg(long, default_value_t = 50)]
    patch_rate_ms: u64,

    /// Skip the room drain on exit.
    #[arg(long)]
    no_graceful_shutdown: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = ServerOptions {
        public_address: cli.public_address.clone(),
        dev_mode: cli.dev,
        gracefully_shutdown: !cli.no_graceful_shutdown,
        patch_rate_ms: cli.patch_rate_ms,
        ..ServerOptions::default()
    };
    logging::init_with_config(&options.logging);

    let presence: Arc<dyn Presence> = if cli.dev {
        Arc::new(LocalPresence::with_snapshot(".tidepool-snapshot.json"))
    } else {
        Arc::new(LocalPresence::new())
    };
    let driver = Arc::new(SharedDriver::new(presence.clone()));
    let matchmaker = Matchmaker::new(presence, driver, options).await;

    // the stock relay room; embedders define their own room types here
    matchmaker.define_with(
        "relay",
        RelayRoom::default,
        RoomSettings {
            default_options: serde_json::json!({ "maxClients": 8 }),
            ..RoomSettings::default()
        },
    );

    let app = Router::new()
        .merge(http::router(matchmaker.clone()))
        .nest("/rooms/connect", transport::ws::router(matchmaker.clone()))
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, process_id = %matchmaker.process_id(), "Tidepool server started");

    let serve = axum::serve(listener, app.into_make_service());
    let shutdown_matchmaker = matchmaker.clone();
    tokio::select! {
        result = serve => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
            if shutdown_matchmaker.is_shutting_down() {
                return Ok(());
            }
            if cli.no_graceful_shutdown {
                return Ok(());
            }
            shutdown_matchmaker.gracefully_shutdown().await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["tidepool-server"]).unwrap();
        assert_eq!(cli.port, 2567);
        assert!(!cli.dev);
        assert!(!cli.no_graceful_shutdown);
        assert_eq!(cli.patch_rate_ms, 50);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "tidepool-server",
            "--port",
            "3000",
            "--dev",
            "--public-address",
            "game.example.net:3000",
        ])
        .unwrap();
        assert_eq!(cli.port, 3000);
        assert!(cli.dev);
        assert_eq!(cli.public_address.as_deref(), Some("game.example.net:3000"));
    }
}
