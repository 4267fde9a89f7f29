//! `lunar-bridge` – serves the rover control page and bridges each
//! WebSocket client to the rover's ZeroMQ bus.
//!
//! Usage: `lunar-bridge [CONFIG]`. The config path may also come from
//! `LUNAR_BRIDGE_CONFIG`; see [`config`] for the file format and overrides.
//!
//! Ctrl-C or SIGTERM publishes a stop signal on the setup topic before
//! exiting, so the rover halts even when a session is still open.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info};

use lunar_cockpit::CockpitServer;
use lunar_middleware::gateway::publish_json;
use lunar_middleware::{BusGateway, ZmqGateway};
use lunar_types::{BridgeError, SessionSignal};

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("lunar-bridge");

    print_banner();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start the async runtime".red());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => {
            println!("{}", "  ✓ Exiting lunar-bridge.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "bridge stopped");
            eprintln!("{}: {e}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BridgeError> {
    let path = config::config_path(
        std::env::args().nth(1),
        std::env::var("LUNAR_BRIDGE_CONFIG").ok(),
    );
    let cfg = config::load(&path)?;
    let addr = cfg.listen_addr().await?;
    let session = cfg.session_config();
    info!(path = %path.display(), sensors = %cfg.sensors_endpoint, motors = %cfg.motors_endpoint, "configuration loaded");

    let gateway: Arc<dyn BusGateway> =
        Arc::new(ZmqGateway::connect(&cfg.sensors_endpoint, &cfg.motors_endpoint).await?);
    println!(
        "  Rover bus: {} (sensors) / {} (motors)",
        cfg.sensors_endpoint.dimmed(),
        cfg.motors_endpoint.dimmed()
    );
    println!("  Control page: {}", format!("http://{addr}/").bold());

    let server = CockpitServer::new(Arc::clone(&gateway), session.clone())
        .with_addr(addr)
        .with_control_page(cfg.control_page.clone());

    tokio::select! {
        served = server.run() => served,
        signal = shutdown_signal() => {
            let signal = signal?;
            println!();
            println!("{}", format!("⚠  {signal} received – stopping the rover …").yellow().bold());
            publish_json(gateway.as_ref(), &session.topics.setup, &SessionSignal::Stop).await?;
            info!(signal, topic = %session.topics.setup, "stop signal published on shutdown");
            println!("{}", "  ✓ Stop signal published.".green());
            Ok(())
        }
    }
}

/// Resolves with the name of the first shutdown signal received.
async fn shutdown_signal() -> Result<&'static str, BridgeError> {
    let ctrl_c = async { tokio::signal::ctrl_c().await.map(|()| "Ctrl-C") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<_, std::io::Error>("SIGTERM")
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<&'static str>>();

    let received = tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    };
    received.map_err(|e| BridgeError::Server(format!("cannot listen for shutdown signals: {e}")))
}

fn print_banner() {
    println!();
    println!("{}", r#"   __                              ___      _     _           "#.bold().cyan());
    println!("{}", r#"  / /  _   _ _ __   __ _ _ __     / __\_ __(_) __| | __ _  ___ "#.bold().cyan());
    println!("{}", r#" / /  | | | | '_ \ / _` | '__|   /__\// '__| |/ _` |/ _` |/ _ \"#.bold().cyan());
    println!("{}", r#"/ /___| |_| | | | | (_| | |     / \/  \ |  | | (_| | (_| |  __/"#.bold().cyan());
    println!("{}", r#"\____/ \__,_|_| |_|\__,_|_|     \_____/_|  |_|\__,_|\__, |\___|"#.bold().cyan());
    println!("{}", r#"                                                    |___/      "#.bold().cyan());
    println!("  {}", "WebSocket ↔ ZeroMQ bridge for the lunar rover".dimmed());
    println!();
}
