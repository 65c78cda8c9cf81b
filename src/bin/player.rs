//! SlimProto Player Application
//!
//! Connects to a media server, plays the PCM streams it sends to a local
//! output device and reports status back until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use slim_pcm_player::{
    audio::{backend_for, list_output_devices, AudioOutput},
    config::{parse_mac, AppConfig},
    constants::FALLBACK_MAX_SAMPLE_RATE,
    network::{discover, Client, ConnectionConfig},
    player::Player,
    protocol::Helo,
};

#[derive(Parser, Debug)]
#[command(name = "slim-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server address (overrides config file, disables discovery).
    #[arg(short = 'S', long, env = "SLIM_SERVER")]
    server: Option<IpAddr>,

    /// Server control port.
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Output device name, `default` or `null`.
    #[arg(short, long)]
    output: Option<String>,

    /// Player MAC address.
    #[arg(short, long)]
    mac: Option<String>,

    /// Do not look for a server on the local network.
    #[arg(long)]
    no_discovery: bool,

    /// Verbose logging.
    #[arg(short, long)]
    debug: bool,

    /// List output devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    tracing::info!("Starting SlimProto player {}", config.player.model_name);

    let server = resolve_server(&config).await?;
    tracing::info!("Using server {}", server);

    let backend = backend_for(&config.audio.device, config.audio.buffer_frames);
    let mut output = AudioOutput::open(backend, &config.audio.device)
        .with_context(|| format!("opening output device {}", config.audio.device))?;
    let max_rate = match output.max_sample_rate() {
        Ok(rate) => rate,
        Err(e) => {
            tracing::warn!("Cannot probe maximum sample rate: {}", e);
            FALLBACK_MAX_SAMPLE_RATE
        }
    };
    tracing::info!("Maximum sample rate {} Hz", max_rate);

    let helo = Helo {
        device_id: config.player.device_id,
        revision: config.player.revision,
        mac: parse_mac(&config.player.mac)?,
        uuid: *config.player.uuid.unwrap_or_else(Uuid::new_v4).as_bytes(),
        wlan_channels: [0, 0],
        bytes_received: 0,
        language: *b"en",
        capabilities: Helo::capabilities(&config.player.model, &config.player.model_name, max_rate),
    };

    let player = Player::new(output, config.stream.clone());
    let client = Client::new(
        player.clone(),
        ConnectionConfig {
            server,
            read_timeout: config.server.read_timeout(),
            reconnect_delay: config.server.reconnect_delay(),
        },
        &helo,
    )?;

    tokio::select! {
        _ = client.run() => {},
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, saying goodbye");
        },
    }

    if let Err(e) = client.say_goodbye().await {
        tracing::warn!("Failed to send BYE!: {}", e);
    }
    player.shutdown();

    tracing::info!("Shutdown complete");
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(server) = args.server {
        config.server.address = Some(server);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(output) = &args.output {
        config.audio.device = output.clone();
    }
    if let Some(mac) = &args.mac {
        config.player.mac = mac.clone();
    }
    if args.no_discovery {
        config.server.discovery = false;
    }
}

async fn resolve_server(config: &AppConfig) -> Result<SocketAddr> {
    if let Some(address) = config.server.address {
        return Ok(SocketAddr::new(address, config.server.port));
    }
    if !config.server.discovery {
        anyhow::bail!("no server address configured and discovery is disabled");
    }

    let found = discover(config.server.discovery_attempts).await?;
    Ok(SocketAddr::new(found.ip(), config.server.port))
}

fn print_devices() {
    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!("  null: discards all audio");
    println!();
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
