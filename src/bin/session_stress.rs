/// HV Session Stress
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Drives concurrent command sessions against a running gateway and reports
/// throughput and latency. On a bench gateway with an empty crate the device
/// commands come back rejected, so rejections are counted apart from
/// transport failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use voltage_hvlink::error::{HvlinkError, HvlinkResult};
use voltage_hvlink::utils::{format, PerformanceMetrics};
use voltage_hvlink::SESSION_PROMPT;

#[derive(Debug, Clone)]
struct StressConfig {
    server_address: String,
    timeout_ms: u64,
    concurrent_sessions: usize,
    commands_per_session: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:24742".to_string(),
            timeout_ms: 5000,
            concurrent_sessions: 8,
            commands_per_session: 50,
        }
    }
}

#[derive(Debug)]
struct ScenarioResults {
    scenario: String,
    metrics: PerformanceMetrics,
    rejected_commands: u64,
    bytes_received: u64,
    wall_time_ms: u64,
    commands_per_second: f64,
    p99_latency_ms: f64,
}

#[derive(Debug)]
struct SessionOutcome {
    metrics: PerformanceMetrics,
    rejected_commands: u64,
    bytes_received: u64,
    latencies: Vec<f64>,
}

#[tokio::main]
async fn main() -> HvlinkResult<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🚀 HV Gateway Session Stress Suite");
    println!("==================================");

    let mut config = StressConfig::default();
    if let Some(address) = std::env::args().nth(1) {
        config.server_address = address;
    }
    println!("Target gateway: {}", config.server_address);

    let mut all_results = Vec::new();

    println!("\n📊 Scenario 1: Steady Command Mix");
    let result1 = run_scenario(&config, "Steady Mix").await?;
    print_scenario_results(&result1);
    all_results.push(result1);

    println!("\n📊 Scenario 2: High Concurrency");
    let mut high_concurrency_config = config.clone();
    high_concurrency_config.concurrent_sessions = 32;
    high_concurrency_config.commands_per_session = 15;
    let result2 = run_scenario(&high_concurrency_config, "High Concurrency").await?;
    print_scenario_results(&result2);
    all_results.push(result2);

    println!("\n📊 Scenario 3: Single Session Latency");
    let mut latency_config = config.clone();
    latency_config.concurrent_sessions = 1;
    latency_config.commands_per_session = 300;
    let result3 = run_scenario(&latency_config, "Single Session Latency").await?;
    print_scenario_results(&result3);
    all_results.push(result3);

    print_summary(&all_results);

    println!("\n✅ All stress scenarios completed!");
    Ok(())
}

async fn run_scenario(config: &StressConfig, scenario: &str) -> HvlinkResult<ScenarioResults> {
    let start_time = Instant::now();
    let semaphore = Arc::new(Semaphore::new(config.concurrent_sessions));
    let mut handles = Vec::new();

    for session_id in 0..config.concurrent_sessions {
        let config = config.clone();
        let semaphore = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.unwrap();
            run_session(session_id, &config).await
        }));
    }

    let mut metrics = PerformanceMetrics::new();
    let mut rejected_commands = 0u64;
    let mut bytes_received = 0u64;
    let mut latencies = Vec::new();

    for joined in join_all(handles).await {
        match joined {
            Ok(Ok(outcome)) => {
                merge_metrics(&mut metrics, &outcome.metrics);
                rejected_commands += outcome.rejected_commands;
                bytes_received += outcome.bytes_received;
                latencies.extend(outcome.latencies);
            }
            Ok(Err(e)) => {
                eprintln!("Session error: {}", e);
                for _ in 0..config.commands_per_session {
                    metrics.record_failure(Duration::ZERO);
                }
            }
            Err(e) => {
                eprintln!("Task error: {}", e);
                for _ in 0..config.commands_per_session {
                    metrics.record_failure(Duration::ZERO);
                }
            }
        }
    }

    let wall_time_ms = start_time.elapsed().as_millis() as u64;

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p99_latency_ms = if latencies.is_empty() {
        0.0
    } else {
        let index = ((latencies.len() as f64) * 0.99) as usize;
        latencies.get(index).copied().unwrap_or(0.0)
    };

    let commands_per_second = if wall_time_ms > 0 {
        (metrics.successful_requests as f64) / (wall_time_ms as f64 / 1000.0)
    } else {
        0.0
    };

    Ok(ScenarioResults {
        scenario: scenario.to_string(),
        metrics,
        rejected_commands,
        bytes_received,
        wall_time_ms,
        commands_per_second,
        p99_latency_ms,
    })
}

async fn run_session(session_id: usize, config: &StressConfig) -> HvlinkResult<SessionOutcome> {
    let io_timeout = Duration::from_millis(config.timeout_ms);
    let mut stream = timeout(io_timeout, TcpStream::connect(&config.server_address)).await??;

    let mut metrics = PerformanceMetrics::new();
    let mut rejected_commands = 0u64;
    let mut bytes_received = 0u64;
    let mut latencies = Vec::new();

    for sequence in 0..config.commands_per_session {
        let command = pick_command(session_id + sequence);
        let started = Instant::now();

        match exchange(&mut stream, &command, io_timeout).await {
            Ok(reply) => {
                let elapsed = started.elapsed();
                metrics.record_success(elapsed);
                latencies.push(elapsed.as_secs_f64() * 1000.0);
                bytes_received += reply.len() as u64;
                if reply.starts_with('?') {
                    rejected_commands += 1;
                }
            }
            Err(e) => {
                eprintln!("Session {} command {} failed: {}", session_id, sequence, e);
                metrics.record_failure(started.elapsed());
            }
        }
    }

    // Polite close, the gateway drops the socket without a reply
    let _ = stream.write_all(b"_Q\r\n").await;
    let mut sink = [0u8; 64];
    let _ = timeout(Duration::from_millis(500), stream.read(&mut sink)).await;

    Ok(SessionOutcome {
        metrics,
        rejected_commands,
        bytes_received,
        latencies,
    })
}

fn pick_command(slot_hint: usize) -> String {
    let mut rng = rand::thread_rng();
    match rng.gen_range(0..10) {
        0..=5 => "_LL\r\n".to_string(),
        6..=7 => format!("{} 0 ID\r\n", slot_hint % 16),
        8 => "_CLI\r\n".to_string(),
        _ => "PING\r\n".to_string(),
    }
}

/// Send one command and read until the prompt arrives.
async fn exchange(
    stream: &mut TcpStream,
    command: &str,
    io_timeout: Duration,
) -> HvlinkResult<String> {
    timeout(io_timeout, stream.write_all(command.as_bytes())).await??;

    let mut reply = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = timeout(io_timeout, stream.read(&mut chunk)).await??;
        if n == 0 {
            return Err(HvlinkError::connection("session closed by gateway"));
        }
        reply.extend_from_slice(&chunk[..n]);
        if reply.ends_with(SESSION_PROMPT.as_bytes()) {
            return Ok(String::from_utf8_lossy(&reply).into_owned());
        }
    }
}

fn merge_metrics(total: &mut PerformanceMetrics, part: &PerformanceMetrics) {
    total.total_requests += part.total_requests;
    total.successful_requests += part.successful_requests;
    total.failed_requests += part.failed_requests;
    total.total_duration += part.total_duration;
    total.min_duration = match (total.min_duration, part.min_duration) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    total.max_duration = match (total.max_duration, part.max_duration) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    if total.total_requests > 0 {
        total.avg_duration = total.total_duration / total.total_requests as u32;
    }
}

fn print_scenario_results(results: &ScenarioResults) {
    println!("  📈 Results for {}:", results.scenario);
    for line in format::format_metrics(&results.metrics).lines() {
        println!("    {}", line);
    }
    println!("    Rejected Commands: {}", results.rejected_commands);
    println!("    Bytes Received: {}", results.bytes_received);
    println!("    Wall Time: {:.2}s", results.wall_time_ms as f64 / 1000.0);
    println!("    Throughput: {:.1} commands/s", results.commands_per_second);
    println!("    P99 Latency: {:.2}ms", results.p99_latency_ms);
}

fn print_summary(all_results: &[ScenarioResults]) {
    println!("\n📋 Stress Test Summary");
    println!("======================");

    for results in all_results {
        let rating = if results.commands_per_second > 500.0 && results.metrics.success_rate() > 99.0
        {
            "🟢 Excellent"
        } else if results.commands_per_second > 100.0 && results.metrics.success_rate() > 95.0 {
            "🟡 Good"
        } else if results.commands_per_second > 20.0 && results.metrics.success_rate() > 90.0 {
            "🟠 Average"
        } else {
            "🔴 Poor"
        };

        println!(
            "  {} - {:.1} cps, {:.1}% success, p99 {:.2}ms - {}",
            results.scenario,
            results.commands_per_second,
            results.metrics.success_rate(),
            results.p99_latency_ms,
            rating
        );
    }

    let total_commands: u64 = all_results.iter().map(|r| r.metrics.total_requests).sum();
    let total_rejected: u64 = all_results.iter().map(|r| r.rejected_commands).sum();
    println!("\n🎯 Overall: {} commands issued, {} rejected by the gateway",
        total_commands, total_rejected);
}
