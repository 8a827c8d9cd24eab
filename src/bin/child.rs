//! Child device
//!
//! Captures the room's audio and streams it to the first parent that connects.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_child_monitor::{
    audio::{list_devices, CaptureSource, MicCapture, ToneCapture},
    config::AppConfig,
    discovery::system_directory,
    network::{CaptureFactory, ServerConfig, ServerEvent, TransportServer},
};

#[derive(Parser, Debug)]
#[command(name = "child", about = "Stream this room's audio to a parent device")]
struct Args {
    /// First port to try (overrides config file)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Advertised device name (overrides config file)
    #[arg(short, long)]
    name: Option<String>,

    /// Stream a test tone instead of the microphone
    #[arg(long)]
    tone: bool,

    /// Skip multicast DNS; parents must connect by address
    #[arg(long)]
    no_mdns: bool,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
    init_logging(&config.log_level);
    if let Some(port) = args.port {
        config.child.port = port;
    }
    if let Some(name) = args.name {
        config.child.service_name = Some(name);
    }

    tracing::info!("Starting child monitor");

    let bind_address: IpAddr = config
        .child
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.child.bind_address))?;
    let server_config = ServerConfig {
        bind_address,
        service_name: config.child.service_name(),
        service_type: config.discovery.service_type.clone(),
        frame_samples: config.audio.frame_samples,
    };

    let directory = system_directory(config.discovery.mdns && !args.no_mdns);
    let server = TransportServer::new(server_config, directory, capture_factory(&config, args.tone));

    let events = server.subscribe();
    thread::Builder::new()
        .name("status".to_string())
        .spawn(move || {
            for event in events.iter() {
                report(&event);
            }
        })
        .context("Failed to spawn status thread")?;

    server
        .start(config.child.port)
        .context("Failed to start server")?;
    tracing::info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    tokio::task::block_in_place(|| server.stop());
    Ok(())
}

fn capture_factory(config: &AppConfig, tone: bool) -> CaptureFactory {
    let sample_rate = config.audio.sample_rate;
    let frame_samples = config.audio.frame_samples;
    if tone {
        return Arc::new(move || {
            let source = ToneCapture::new(440.0, 6000, sample_rate, frame_samples).paced(true);
            Ok(Box::new(source) as Box<dyn CaptureSource>)
        });
    }

    let device = config.audio.input_device.clone();
    Arc::new(move || {
        MicCapture::open(device.as_deref(), sample_rate, frame_samples)
            .map(|source| Box::new(source) as Box<dyn CaptureSource>)
    })
}

fn report(event: &ServerEvent) {
    match event {
        ServerEvent::Advertised { name, port } => {
            println!("Advertising \"{}\" on port {}", name, port)
        }
        ServerEvent::AdvertiseFailed { reason } => {
            println!("Not advertised ({}); connect manually", reason)
        }
        ServerEvent::PeerConnected { peer } => println!("Parent connected from {}", peer),
        ServerEvent::PeerDisconnected { peer } => println!("Parent {} disconnected", peer),
        ServerEvent::BindFailed { .. } | ServerEvent::StateChanged(_) => {}
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();
}

fn init_logging(fallback: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| fallback.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
