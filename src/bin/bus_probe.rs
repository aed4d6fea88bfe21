/// HV Bus Probe
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Standalone crate-bus diagnostic. The default mode only raps on each slot
/// and reports who answers, which works without the GPIO ready line. The
/// --scan mode runs the full discovery pass and needs /dev/mem access.

use std::error::Error;

use voltage_hvlink::protocol::{self, TransactionStatus};
use voltage_hvlink::utils::{format, validation};
use voltage_hvlink::{BusScanner, BusTransport, MemoryMappedReadyLine, DEFAULT_READY_LINE};

struct ProbeOptions {
    port: String,
    baud_rate: u32,
    ready_line: u8,
    slot: Option<u8>,
    full_scan: bool,
    json: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 38_400,
            ready_line: DEFAULT_READY_LINE,
            slot: None,
            full_scan: false,
            json: false,
        }
    }
}

fn parse_args() -> Result<ProbeOptions, Box<dyn Error>> {
    let mut options = ProbeOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--baud" => {
                options.baud_rate = args.next().ok_or("--baud requires a value")?.parse()?;
            }
            "--line" => {
                options.ready_line = args.next().ok_or("--line requires a value")?.parse()?;
            }
            "--slot" => {
                let slot = args.next().ok_or("--slot requires a value")?.parse()?;
                validation::validate_slot(slot)?;
                options.slot = Some(slot);
            }
            "--scan" => options.full_scan = true,
            "--json" => options.json = true,
            "-h" | "--help" => {
                println!("Usage: bus_probe [serial-port] [options]");
                println!();
                println!("Options:");
                println!("  --baud <rate>   Serial baud rate (default 38400)");
                println!("  --slot <n>      Probe a single slot instead of all 16");
                println!("  --scan          Run full discovery (needs /dev/mem)");
                println!("  --line <gpio>   Ready line for --scan (default {})", DEFAULT_READY_LINE);
                println!("  --json          Print discovered devices as JSON");
                println!("  -h, --help      Show this help");
                std::process::exit(0);
            }
            other if !other.starts_with('-') => options.port = other.to_string(),
            other => return Err(format!("Unknown argument: {}", other).into()),
        }
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let options = parse_args()?;

    println!("🔍 HV Bus Probe");
    println!("==================================================");
    println!("Serial bus: {} @ {} baud", options.port, options.baud_rate);
    println!();

    let mut bus = BusTransport::open_serial(&options.port, options.baud_rate)?;
    println!("🔌 Serial bus opened");

    if options.full_scan {
        let ready = MemoryMappedReadyLine::open(options.ready_line)?;
        println!("📡 Ready line mapped on GPIO {}", options.ready_line);

        let directory = BusScanner::new(&mut bus, &ready).scan().await?;
        let stats = directory.get_stats();

        println!();
        println!("📊 Discovery results: {} device(s) in {} occupied slot(s)",
            stats.devices, stats.occupied_slots);
        for record in directory.records() {
            println!(
                "   slot {:2} submodule {} | {:9} | {}",
                record.slot, record.submodule, record.device_type, record.identity
            );
        }

        if options.json {
            println!();
            println!("{}", serde_json::to_string_pretty(directory.records())?);
        }
    } else {
        let slots: Vec<u8> = match options.slot {
            Some(slot) => vec![slot],
            None => (0..protocol::SLOT_COUNT).collect(),
        };
        println!("📡 Probing {} slot(s)...", slots.len());
        let mut occupied = Vec::new();
        for slot in slots {
            let frame = protocol::handshake_frame(slot)?;
            let transaction = bus.transact(&frame, protocol::SHORT_READ_CHARS).await?;
            if transaction.status != TransactionStatus::None {
                occupied.push(slot);
            }
            if transaction.payload.is_empty() {
                println!(
                    "   slot {:2}: {} after {} read attempt(s)",
                    slot, transaction.status, transaction.attempts
                );
            } else {
                println!(
                    "   slot {:2}: {} after {} read attempt(s) | raw: {}",
                    slot,
                    transaction.status,
                    transaction.attempts,
                    format::bytes_to_hex(&transaction.payload)
                );
            }
        }

        println!();
        if occupied.is_empty() {
            println!("⚠️ No modules answered the probe");
        } else {
            println!("✅ Occupied slots: {:?}", occupied);
        }
    }

    let stats = bus.get_stats();
    println!();
    println!("📊 Bus statistics:");
    println!("   Frames sent: {}", stats.requests_sent);
    println!("   Replies received: {}", stats.responses_received);
    println!("   Errors: {} | Timeouts: {}", stats.errors, stats.timeouts);
    println!("   Bytes: {} out, {} in", stats.bytes_sent, stats.bytes_received);

    Ok(())
}
