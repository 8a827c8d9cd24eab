//! Parent device
//!
//! Finds a child on the network, plays its audio and draws a volume meter.
//! An audible alert sounds if the child drops off.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_child_monitor::{
    audio::{AlertSignal, LogAlert, NullPlayback, PlaybackSink, SpeakerPlayback, ToneAlert},
    config::AppConfig,
    discovery::{system_directory, Discovery},
    network::{ListenEvent, ListenSession, SessionEndpoint, TransportClient},
    volume::{render_meter, VolumeHistory},
};

#[derive(Parser, Debug)]
#[command(name = "parent", about = "Listen to a child device on the local network")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// No speaker output; the alert is only logged
    #[arg(long, global = true)]
    mute: bool,

    /// Skip multicast DNS
    #[arg(long, global = true)]
    no_mdns: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List child devices on the network
    Discover {
        /// How long to browse
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Connect to a child by address
    Connect {
        address: String,
        #[arg(default_value_t = 10000)]
        port: u32,
    },
    /// Connect to the first child discovered
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
    init_logging(&config.log_level);
    let use_mdns = config.discovery.mdns && !args.no_mdns;

    match args.command {
        Command::Discover { seconds } => {
            let directory = system_directory(use_mdns);
            let discovery = Discovery::start(directory, &config.discovery.service_type)?;
            tracing::info!("Browsing for {} s", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;

            let endpoints = discovery.endpoints();
            if endpoints.is_empty() {
                println!("No child devices found");
            }
            for endpoint in endpoints {
                println!("  {}", endpoint);
            }
        }
        Command::Connect { address, port } => {
            let endpoint = SessionEndpoint::manual(&address, port)?;
            listen(endpoint, &config, args.mute).await?;
        }
        Command::Listen => {
            let directory = system_directory(use_mdns);
            let discovery = Discovery::start(directory, &config.discovery.service_type)?;
            let timeout = config.discovery.browse_timeout();
            let first = tokio::task::block_in_place(|| discovery.wait_for_first(timeout));
            drop(discovery);
            let Some(endpoint) = first else {
                bail!("No child device found within {:?}", timeout);
            };
            listen(endpoint, &config, args.mute).await?;
        }
    }
    Ok(())
}

async fn listen(endpoint: SessionEndpoint, config: &AppConfig, mute: bool) -> Result<()> {
    let client = TransportClient::new(
        config.parent.connect_timeout(),
        config.parent.read_timeout(),
    );
    let history = VolumeHistory::with_params(
        config.volume.capacity,
        config.volume.exponent,
        config.volume.floor,
    );
    let (playback, alert) = outputs(config, mute);

    tracing::info!("Connecting to {}", endpoint);
    let mut session = tokio::task::block_in_place(|| {
        ListenSession::start(
            &client,
            endpoint,
            playback,
            alert,
            history.clone(),
            config.read_buffer_bytes(),
        )
    })?;

    let width = config.parent.meter_width;
    let mut ticker = tokio::time::interval(config.parent.render_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut disconnected: Option<String> = None;

    // Runs until Ctrl+C, disconnected or not
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                tokio::task::block_in_place(|| session.stop());
                break;
            }
            _ = ticker.tick() => {
                if disconnected.is_none() {
                    if let Ok(ListenEvent::Disconnected { reason }) = session.events().try_recv() {
                        println!();
                        tracing::warn!("Child disconnected: {}", reason);
                        disconnected = Some(reason);
                    }
                }
                print!("\r{}", status_line(&history, width, disconnected.as_deref()));
                let _ = std::io::stdout().flush();
            }
        }
    }
    Ok(())
}

/// One screen line: the meter while connected, then the disconnect notice
fn status_line(history: &VolumeHistory, width: usize, disconnected: Option<&str>) -> String {
    match disconnected {
        Some(reason) => format!("Disconnected ({}). Press Ctrl+C to exit.", reason),
        None => render_meter(&history.snapshot(width), width),
    }
}

fn outputs(config: &AppConfig, mute: bool) -> (Box<dyn PlaybackSink>, Arc<dyn AlertSignal>) {
    if mute {
        return (Box::new(NullPlayback::new()), Arc::new(LogAlert));
    }

    let device = config.audio.output_device.as_deref();
    let buffer_samples = config.read_buffer_bytes() * 4;
    let playback: Box<dyn PlaybackSink> =
        match SpeakerPlayback::open(device, config.audio.sample_rate, buffer_samples) {
            Ok(playback) => Box::new(playback),
            Err(e) => {
                tracing::warn!("No speaker output, continuing silently: {}", e);
                Box::new(NullPlayback::new())
            }
        };
    let alert: Arc<dyn AlertSignal> = Arc::new(ToneAlert::new(config.audio.output_device.clone()));
    (playback, alert)
}

fn init_logging(fallback: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| fallback.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
