/// HV Gateway Daemon
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Bridges TCP command sessions onto the high-voltage crate bus: scans the
/// crate at startup, then serves sessions until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};
use tokio::signal;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing_subscriber::filter::LevelFilter;

use voltage_hvlink::{
    BusScanner, BusTransport, CommandTranslator, GatewayConfig, GatewayServer,
    MemoryMappedReadyLine,
};

fn parse_args() -> Result<Option<PathBuf>> {
    let mut config_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args
                    .next()
                    .context("--config requires a file path argument")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("Usage: gateway [--config <file.yaml|file.json>]");
                println!();
                println!("Options:");
                println!("  -c, --config <path>   Configuration file (defaults apply without one)");
                println!("  -h, --help            Show this help");
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
    }
    Ok(config_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args()?;

    let config = match &config_path {
        Some(path) => {
            let config = GatewayConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            config.validate().context("validating configuration")?;
            config
        }
        None => GatewayConfig::default(),
    };

    let level: LevelFilter = config
        .logging
        .level
        .parse()
        .context("parsing log level")?;
    tracing_subscriber::fmt().with_max_level(level).init();

    println!("🚀 {}", voltage_hvlink::info());
    println!("==================================================");
    println!("Started at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    match &config_path {
        Some(path) => println!("Configuration: {}", path.display()),
        None => println!("Configuration: built-in defaults"),
    }
    println!("Serial bus:    {} @ {} baud", config.serial.port, config.serial.baud_rate);
    println!("Ready line:    GPIO {}", config.gpio.ready_line);
    println!();

    // Open the bus and the ready line before touching the network
    let mut bus = BusTransport::open_serial(&config.serial.port, config.serial.baud_rate)
        .with_context(|| format!("opening serial bus on {}", config.serial.port))?;
    bus.set_packet_logging(config.logging.packet_logging);

    let ready = Arc::new(
        MemoryMappedReadyLine::open(config.gpio.ready_line)
            .context("mapping the GPIO ready line")?,
    );

    // Walk the crate before serving: sessions dispatch against this directory
    let directory = BusScanner::new(&mut bus, ready.as_ref())
        .scan()
        .await
        .context("scanning the crate bus")?;
    let directory_stats = directory.get_stats();

    let translator = CommandTranslator::new(
        Arc::new(Mutex::new(bus)),
        ready,
        Arc::new(directory),
    );

    let bind_address = config.network.socket_addr().context("resolving bind address")?;
    let mut server = GatewayServer::new(bind_address, translator)
        .with_max_connections(config.network.max_connections);
    server.start().await.context("starting the session server")?;

    info!("✅ Gateway ready on {}", bind_address);
    info!(
        "📊 Serving {} device(s) in {} occupied slot(s)",
        directory_stats.devices, directory_stats.occupied_slots
    );

    // Periodic statistics report while running
    let session_stats = server.stats_handle();
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = session_stats.lock().await.clone();
            info!(
                "📊 Sessions: {} | Commands: {} ok / {} failed | {} B in, {} B out",
                stats.connections_count,
                stats.successful_requests,
                stats.failed_requests,
                stats.bytes_received,
                stats.bytes_sent
            );
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("🛑 Received interrupt signal, stopping gateway...");
        }
        Err(err) => {
            error!("❌ Failed to listen for interrupt signal: {}", err);
        }
    }

    server.stop().await.context("stopping the session server")?;

    let final_stats = server.get_stats().await;
    info!("📊 Final statistics:");
    info!("   Total connections: {}", final_stats.connections_count);
    info!("   Total commands: {}", final_stats.total_requests);
    info!("   Successful: {}", final_stats.successful_requests);
    info!("   Failed: {}", final_stats.failed_requests);
    info!("   Uptime: {} seconds", final_stats.uptime_seconds);

    println!("\n✅ Gateway stopped safely");
    Ok(())
}
