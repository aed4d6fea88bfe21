//! # Serial Bus Transport Layer
//!
//! This module provides the serial transport for the multi-drop module bus,
//! together with the response framer that turns paced non-blocking reads
//! into classified transactions.
//!
//! ## Transaction Model
//!
//! Module responses are CR LF terminated byte strings. The framer paces its
//! reads by the expected transfer time of the response, accumulates chunks
//! until the terminator arrives, and classifies the result as one of the
//! five transaction outcomes. A bus that goes quiet mid-frame is reported
//! as `INCOMPLETE` rather than retried, and a bus that never answers is
//! reported as `NONE`; the caller decides what either means.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use voltage_hvlink::transport::BusTransport;
//! use voltage_hvlink::protocol::{submodule_count_query, REPLY_PAD_CHARS};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bus = BusTransport::open_serial("/dev/ttyAMA0", 38_400)?;
//!
//!     let query = submodule_count_query(3)?;
//!     let reply = bus.transact(&query, query.len() + REPLY_PAD_CHARS).await?;
//!     println!("Transaction: {} ({} bytes)", reply.status, reply.payload.len());
//!
//!     let stats = bus.get_stats();
//!     println!("Frames sent: {}", stats.requests_sent);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tokio_serial::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::error::{HvlinkError, HvlinkResult};
use crate::gpio::ReadyLine;
use crate::protocol::{
    classify_frame, ends_with_terminator, Slot, Transaction, TransactionStatus, CHAR_TIME_MICROS,
    READ_ATTEMPTS, REPLY_PAD_CHARS, SHORT_READ_CHARS,
};

/// Chunk size for a single bus read
const READ_CHUNK_SIZE: usize = 256;

/// Timeout for serial writes
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Format raw bytes as hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction and format
fn log_packet(direction: &str, data: &[u8]) {
    info!("[HVBUS] {} {}", direction, format_hex_packet(data));
}

/// Byte-level access to the module bus
///
/// The framer drives any implementation of this trait, so the transaction
/// logic can be exercised against scripted ports as well as real hardware.
///
/// ## Contract
///
/// `read_available` must poll the port exactly once and return `Ok(0)` when
/// no bytes are waiting; it must never block waiting for data. The pacing
/// between polls belongs to the framer, not the port.
#[async_trait]
pub trait BusPort: Send {
    /// Write a complete frame to the bus
    async fn send(&mut self, frame: &[u8]) -> HvlinkResult<()>;

    /// Read whatever bytes are currently waiting, without blocking
    async fn read_available(&mut self, buf: &mut [u8]) -> HvlinkResult<usize>;
}

/// Serial port implementation of [`BusPort`]
///
/// Opens the port in raw 8N1 mode with flow control disabled and the input
/// buffer cleared, matching the fixed configuration of the module bus.
pub struct SerialBusPort {
    port: tokio_serial::SerialStream,
    port_name: String,
}

impl SerialBusPort {
    /// Open a serial port for bus communication
    pub fn open(port_name: &str, baud_rate: u32) -> HvlinkResult<Self> {
        let builder = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(WRITE_TIMEOUT);

        let port = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            HvlinkError::connection(format!("Failed to open serial port {}: {}", port_name, e))
        })?;

        // Discard anything a module pushed out before we were listening
        port.clear(ClearBuffer::Input).map_err(|e| {
            HvlinkError::io(format!(
                "Failed to clear input buffer on {}: {}",
                port_name, e
            ))
        })?;

        Ok(Self {
            port,
            port_name: port_name.to_string(),
        })
    }
}

#[async_trait]
impl BusPort for SerialBusPort {
    async fn send(&mut self, frame: &[u8]) -> HvlinkResult<()> {
        match timeout(WRITE_TIMEOUT, self.port.write_all(frame)).await {
            Ok(Ok(())) => {
                let _ = timeout(WRITE_TIMEOUT, self.port.flush()).await;
                Ok(())
            }
            Ok(Err(e)) => Err(HvlinkError::io(format!(
                "Serial write on {} failed: {}",
                self.port_name, e
            ))),
            Err(_) => Err(HvlinkError::bus_timeout("serial write")),
        }
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> HvlinkResult<usize> {
        // A zero timeout polls the read future exactly once
        match timeout(Duration::ZERO, self.port.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Ok(Err(e)) => Err(HvlinkError::io(format!(
                "Serial read on {} failed: {}",
                self.port_name, e
            ))),
            Err(_) => Ok(0),
        }
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Framing transport over a [`BusPort`]
///
/// Owns the port and applies the paced read/classify loop to every
/// exchange. One instance serves the whole bus; callers serialize access
/// to it because the modules share a single party line.
pub struct BusTransport {
    port: Box<dyn BusPort>,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl BusTransport {
    /// Create a transport over an already-open port
    pub fn new(port: Box<dyn BusPort>) -> Self {
        Self {
            port,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Open a serial port and wrap it in a transport
    pub fn open_serial(port_name: &str, baud_rate: u32) -> HvlinkResult<Self> {
        let port = SerialBusPort::open(port_name, baud_rate)?;
        Ok(Self::new(Box::new(port)))
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Write one frame to the bus
    pub async fn send_frame(&mut self, frame: &[u8]) -> HvlinkResult<()> {
        if self.packet_logging {
            log_packet("send", frame);
        }
        self.port.send(frame).await?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Assemble and classify one module response
    ///
    /// `expected_chars` sizes the pacing delay before each poll: the framer
    /// sleeps one character time per expected character, polls once, and
    /// appends whatever arrived. The loop ends when the CR LF terminator
    /// shows up, when a poll returns nothing, or when the attempt budget
    /// runs out. A quiet poll ends the exchange immediately; the modules
    /// answer in one burst, so silence after the first byte means the
    /// response is as complete as it will ever be.
    pub async fn read_transaction(&mut self, expected_chars: usize) -> HvlinkResult<Transaction> {
        let pacing = Duration::from_micros(CHAR_TIME_MICROS * expected_chars as u64);
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        for attempt in 1..=READ_ATTEMPTS {
            sleep(pacing).await;
            let received = self.port.read_available(&mut chunk).await?;

            if received == 0 {
                return Ok(self.finish_transaction(buffer, attempt));
            }

            buffer.extend_from_slice(&chunk[..received]);
            self.stats.bytes_received += received as u64;

            if ends_with_terminator(&buffer) {
                return Ok(self.finish_transaction(buffer, attempt));
            }
        }

        Ok(self.finish_transaction(buffer, READ_ATTEMPTS))
    }

    /// Send a frame and read the response in one exchange
    pub async fn transact(
        &mut self,
        frame: &[u8],
        expected_chars: usize,
    ) -> HvlinkResult<Transaction> {
        self.send_frame(frame).await?;
        self.read_transaction(expected_chars).await
    }

    /// Run the full accepted-command exchange against one module
    ///
    /// Sends the command frame, requires the handshake sentinel in reply,
    /// waits for the ready line to drop, then sends the acknowledgment and
    /// collects the payload-bearing response. This is the sequence every
    /// module command goes through; discovery queries use it too.
    pub async fn command_exchange(
        &mut self,
        slot: Slot,
        frame: &[u8],
        ack_frame: &[u8],
        ready_line: &dyn ReadyLine,
        ready_timeout: Duration,
    ) -> HvlinkResult<Vec<u8>> {
        let accepted = self.transact(frame, frame.len() + REPLY_PAD_CHARS).await?;
        match accepted.status {
            TransactionStatus::Handshake => {}
            TransactionStatus::None => {
                return Err(HvlinkError::bus_timeout("command accept"));
            }
            TransactionStatus::Incomplete => {
                return Err(HvlinkError::framing_incomplete(
                    "command accept",
                    accepted.payload.len(),
                ));
            }
            _ => {
                return Err(HvlinkError::not_acknowledging(slot, "command accept"));
            }
        }

        ready_line.wait_ready(ready_timeout).await?;

        let reply = self.transact(ack_frame, SHORT_READ_CHARS).await?;
        match reply.status {
            TransactionStatus::Ok => Ok(reply.payload),
            TransactionStatus::None => Err(HvlinkError::bus_timeout("response transfer")),
            TransactionStatus::Incomplete => Err(HvlinkError::framing_incomplete(
                "response transfer",
                reply.payload.len(),
            )),
            _ => Err(HvlinkError::not_acknowledging(slot, "response transfer")),
        }
    }

    /// Get communication statistics
    pub fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn finish_transaction(&mut self, buffer: Vec<u8>, attempts: usize) -> Transaction {
        let status = classify_frame(&buffer);
        match status {
            TransactionStatus::None => {
                self.stats.timeouts += 1;
                debug!("[HVBUS] no response after {} attempt(s)", attempts);
            }
            TransactionStatus::Incomplete => {
                self.stats.errors += 1;
                warn!(
                    "[HVBUS] incomplete frame after {} attempt(s): {}",
                    attempts,
                    hex::encode(&buffer)
                );
            }
            _ => {
                self.stats.responses_received += 1;
                if self.packet_logging {
                    log_packet("recv", &buffer);
                }
            }
        }
        Transaction {
            status,
            payload: buffer,
            attempts,
        }
    }
}

/// Shared log of frames written through a scripted port
#[cfg(test)]
pub(crate) type WrittenLog = std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>;

/// Scripted in-memory port for exercising the framer without hardware
///
/// Each queued chunk is handed out by one poll; an empty chunk scripts a
/// quiet poll and an exhausted queue stays quiet forever. Written frames
/// land in a shared log so tests can inspect them after the port is boxed.
#[cfg(test)]
pub(crate) struct ScriptedPort {
    pub reads: std::collections::VecDeque<Vec<u8>>,
    pub written: WrittenLog,
}

#[cfg(test)]
impl ScriptedPort {
    pub fn new(reads: Vec<Vec<u8>>) -> Self {
        Self {
            reads: reads.into(),
            written: WrittenLog::default(),
        }
    }

    pub fn written_log(&self) -> WrittenLog {
        std::sync::Arc::clone(&self.written)
    }
}

#[cfg(test)]
#[async_trait]
impl BusPort for ScriptedPort {
    async fn send(&mut self, frame: &[u8]) -> HvlinkResult<()> {
        self.written.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> HvlinkResult<usize> {
        match self.reads.pop_front() {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }
}
