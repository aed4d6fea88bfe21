//! # Voltage HVLink - High-Voltage Crate Gateway
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.2.0
//! **License:** MIT
//!
//! A network-to-serial gateway for LeCroy 1461/1469/1471 high-voltage crate
//! modules: text command sessions over TCP on one side, the shared
//! multi-drop module bus and its GPIO ready line on the other.
//!
//! ## Features
//!
//! - **🚀 Async Sessions**: One Tokio task per client, all sharing one bus
//! - **🔌 Whole-Transaction Locking**: Serial exchanges never interleave
//! - **🔍 Startup Discovery**: Probes all sixteen slots and identifies every submodule
//! - **🛡️ Ready-Line Synchronization**: Module responses collected only after the GPIO attention line drops
//! - **📊 Built-in Monitoring**: Transport, server and directory statistics
//!
//! ## Supported Module Types
//!
//! | Signature | Model | Polarity | Submodule |
//! |-----------|-------|----------|-----------|
//! | 1461PS0 | 1461 | positive | 0 |
//! | 1461NS0 | 1461 | negative | 0 |
//! | 1469PS0 | 1469 | positive | 0 |
//! | 1469PS1 | 1469 | positive | 1 |
//! | 1469NS0 | 1469 | negative | 0 |
//! | 1469NS1 | 1469 | negative | 1 |
//! | 1471PS0 | 1471 | positive | 0 |
//! | 1471NS0 | 1471 | negative | 0 |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use voltage_hvlink::{
//!     BusScanner, BusTransport, CommandTranslator, GatewayConfig, GatewayServer,
//!     MemoryMappedReadyLine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::default();
//!
//!     // Open the bus and the ready line
//!     let mut bus = BusTransport::open_serial(&config.serial.port, config.serial.baud_rate)?;
//!     let ready = Arc::new(MemoryMappedReadyLine::open(config.gpio.ready_line)?);
//!
//!     // Find out what the crate holds
//!     let directory = BusScanner::new(&mut bus, ready.as_ref()).scan().await?;
//!
//!     // Serve sessions against the discovered devices
//!     let translator = CommandTranslator::new(
//!         Arc::new(Mutex::new(bus)),
//!         ready,
//!         Arc::new(directory),
//!     );
//!     let mut server = GatewayServer::new(config.network.socket_addr()?, translator);
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Session Protocol
//!
//! A session is line oriented: the client sends one carriage-return
//! terminated command, the gateway replies and appends the `hvpi>` prompt.
//!
//! ```text
//! $ nc crate-controller 24742
//! _LL
//! 3 1461N 0 1 11 12 B51884 -1 1000 1.135
//! hvpi>3 0 MV 1250
//! 3 MV 1250
//! hvpi>_Q
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//! │ TCP Client  │  │ TCP Client  │  │ TCP Client  │
//! └─────────────┘  └─────────────┘  └─────────────┘
//!        │                │                │
//! ┌──────────────────────────────────────────────┐
//! │        Gateway Server (task per session)     │
//! └──────────────────────────────────────────────┘
//!                        │
//! ┌──────────────────────────────────────────────┐
//! │   Command Translator ──► Device Directory    │
//! └──────────────────────────────────────────────┘
//!                        │
//! ┌─────────────────────────┐  ┌─────────────────┐
//! │ Bus Transport (serial)  │  │ GPIO Ready Line │
//! └─────────────────────────┘  └─────────────────┘
//!                        │
//!              16-slot module crate
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Bus protocol definitions and message handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Serial transport and response framing
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// GPIO ready-line monitoring
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod gpio;

/// Device directory built by discovery
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod directory;

/// Crate bus discovery
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod discovery;

/// Session command parsing and translation
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod command;

/// Network session server
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod server;

/// Gateway configuration
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod config;

/// Utility functions and performance monitoring
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod utils;

// Re-export main types for convenience
pub use command::{CommandTranslator, SessionCommand, SessionReply};
pub use config::GatewayConfig;
pub use directory::{DeviceDirectory, DeviceRecord, DirectoryStats};
pub use discovery::BusScanner;
pub use error::{HvlinkError, HvlinkResult};
pub use gpio::{MemoryMappedReadyLine, ReadyLine, DEFAULT_READY_LINE};
pub use protocol::{DeviceType, Transaction, TransactionStatus, DEFAULT_PORT as DEFAULT_TCP_PORT, SESSION_PROMPT};
pub use server::{GatewayServer, ServerStats};
pub use transport::{BusPort, BusTransport, SerialBusPort, TransportStats};
pub use utils::{OperationTimer, PerformanceMetrics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage HVLink v{} - High-voltage crate gateway by Evan Liu", VERSION)
}
