//! # Voltage HVLink Error Handling
//!
//! This module provides comprehensive error handling for the Voltage HVLink
//! gateway, covering serial bus transactions, ready-line synchronization,
//! device discovery, command translation, and configuration errors.
//!
//! ## Overview
//!
//! The error system distinguishes transient bus conditions (a module that
//! never answered, a frame that stopped mid-transfer) from permanent faults
//! (a malformed client command, an unknown device signature). Discovery
//! logs transient errors and keeps scanning; command execution surfaces
//! them to the network client as a generic failure indicator.
//!
//! ## Error Categories
//!
//! ### Bus Errors
//! - **BusTimeout**: no bytes arrived in the attempt window
//! - **FramingIncomplete**: bytes arrived but the CR LF terminator never did
//! - **DeviceNotAcknowledging**: a complete frame arrived without the ACK byte
//! - **ReadySignalTimeout**: the hardware ready line never deasserted in time
//!
//! ### Protocol Errors
//! - **ProtocolMismatch**: a discovery reply echoed the wrong ticket or command
//! - **UnknownDeviceType**: a discovered identity matches no known signature
//!
//! ### Client Errors
//! - **AddressingError**: out-of-range or unmapped slot/submodule
//! - **CommandSyntaxError**: malformed command text
//!
//! ### System Errors
//! - **Io** / **Connection**: serial port and socket failures
//! - **Configuration**: bad configuration file or values
//!
//! ## Error Recovery
//!
//! ```rust
//! use voltage_hvlink::{HvlinkError, HvlinkResult};
//!
//! fn handle_error(result: HvlinkResult<String>) {
//!     match result {
//!         Ok(reply) => println!("Reply: {}", reply),
//!         Err(error) => {
//!             if error.is_recoverable() {
//!                 println!("Transient bus condition: {}", error);
//!                 // The same command may succeed on the next attempt
//!             } else {
//!                 println!("Permanent failure: {}", error);
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Usage Example
//!
//! ```rust
//! use voltage_hvlink::HvlinkError;
//!
//! fn classify(error: &HvlinkError) {
//!     if error.is_bus_error() {
//!         println!("Physical link issue: {}", error);
//!     } else if error.is_client_fault() {
//!         println!("Rejecting client input: {}", error);
//!     } else {
//!         println!("Other issue: {}", error);
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for gateway operations
///
/// This is a convenience type alias that uses `HvlinkError` as the error
/// type for all gateway operations, providing consistent error handling
/// throughout the codebase.
pub type HvlinkResult<T> = Result<T, HvlinkError>;

/// Comprehensive gateway error types
///
/// This enumeration covers all failure conditions the gateway can meet,
/// from byte-level framing problems on the serial bus to malformed client
/// command text.
///
/// Each variant carries the context needed to log the failure at the point
/// where it is skipped (discovery) or surfaced (command execution).
#[derive(Error, Debug, Clone)]
pub enum HvlinkError {
    /// I/O related errors (serial port, sockets)
    ///
    /// Covers low-level I/O failures including serial device errors and
    /// network socket errors.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// Specific to session establishment and maintenance issues that are
    /// distinct from general I/O errors.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No bytes received in the attempt window
    ///
    /// The module never started answering: the framer's first non-blocking
    /// read found nothing. Distinct from `FramingIncomplete`, which means
    /// the module started a frame and went silent.
    #[error("Bus timeout during {operation}: no response")]
    BusTimeout { operation: String },

    /// Bytes received, terminator never found
    ///
    /// The module answered but the CR LF end-of-message sequence did not
    /// arrive within the retry budget.
    #[error("Incomplete frame during {operation}: {received} bytes without terminator")]
    FramingIncomplete { operation: String, received: usize },

    /// A complete frame arrived without the ACK byte
    ///
    /// The first byte of a terminated frame was not 0x06; a busy module
    /// answers with NAK (0x15) in that position.
    #[error("Device at slot {slot} not acknowledging during {operation}")]
    DeviceNotAcknowledging { slot: u8, operation: String },

    /// The hardware ready line never deasserted in time
    ///
    /// The module accepted the command but never signaled a queued
    /// response on its attention line.
    #[error("Ready line GPIO{line} still busy after {timeout_ms}ms")]
    ReadySignalTimeout { line: u8, timeout_ms: u64 },

    /// A discovery reply disagrees with what was sent
    ///
    /// The echoed transaction ticket or command text does not match the
    /// query, or a reported field is outside its valid range.
    #[error("Protocol mismatch: expected {expected}, received {received}")]
    ProtocolMismatch { expected: String, received: String },

    /// A discovered identity matches no known type signature
    #[error("Unknown device type \"{signature}\" at slot {slot}")]
    UnknownDeviceType { signature: String, slot: u8 },

    /// Out-of-range or unmapped slot/submodule
    #[error("Addressing error: {message}")]
    AddressingError { message: String },

    /// Malformed command text
    #[error("Command syntax error: {message}")]
    CommandSyntaxError { message: String },

    /// Configuration errors
    ///
    /// Bad configuration file contents or values that prevent startup.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl HvlinkError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a bus timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the transaction that saw no response
    pub fn bus_timeout<S: Into<String>>(operation: S) -> Self {
        Self::BusTimeout { operation: operation.into() }
    }

    /// Create an incomplete-frame error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the transaction
    /// * `received` - Number of bytes accumulated before the link went quiet
    pub fn framing_incomplete<S: Into<String>>(operation: S, received: usize) -> Self {
        Self::FramingIncomplete {
            operation: operation.into(),
            received,
        }
    }

    /// Create a not-acknowledging error
    pub fn not_acknowledging<S: Into<String>>(slot: u8, operation: S) -> Self {
        Self::DeviceNotAcknowledging {
            slot,
            operation: operation.into(),
        }
    }

    /// Create a ready-signal timeout error
    pub fn ready_timeout(line: u8, timeout_ms: u64) -> Self {
        Self::ReadySignalTimeout { line, timeout_ms }
    }

    /// Create a protocol mismatch error
    pub fn protocol_mismatch<S: Into<String>, R: Into<String>>(expected: S, received: R) -> Self {
        Self::ProtocolMismatch {
            expected: expected.into(),
            received: received.into(),
        }
    }

    /// Create an unknown device type error
    pub fn unknown_device_type<S: Into<String>>(signature: S, slot: u8) -> Self {
        Self::UnknownDeviceType {
            signature: signature.into(),
            slot,
        }
    }

    /// Create an addressing error
    pub fn addressing<S: Into<String>>(message: S) -> Self {
        Self::AddressingError { message: message.into() }
    }

    /// Create a command syntax error
    pub fn syntax<S: Into<String>>(message: S) -> Self {
        Self::CommandSyntaxError { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// Transient bus conditions may clear on the next transaction: a busy
    /// module finishes its previous transfer, a slow frame completes, the
    /// ready line deasserts. Malformed input and unknown signatures will
    /// fail identically every time.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_hvlink::HvlinkError;
    ///
    /// let timeout = HvlinkError::bus_timeout("submodule count query");
    /// assert!(timeout.is_recoverable());
    ///
    /// let syntax = HvlinkError::syntax("missing submodule field");
    /// assert!(!syntax.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::BusTimeout { .. }
                | Self::FramingIncomplete { .. }
                | Self::DeviceNotAcknowledging { .. }
                | Self::ReadySignalTimeout { .. }
        )
    }

    /// Check if the error is a timeout
    ///
    /// Covers both flavors of waiting too long: a module that never sent a
    /// byte and a ready line that never signaled a queued response.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_hvlink::HvlinkError;
    ///
    /// assert!(HvlinkError::bus_timeout("probe").is_timeout());
    /// assert!(HvlinkError::ready_timeout(23, 2000).is_timeout());
    /// assert!(!HvlinkError::syntax("empty command").is_timeout());
    /// ```
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::BusTimeout { .. } | Self::ReadySignalTimeout { .. }
        )
    }

    /// Check if the error originated on the physical link
    ///
    /// Identifies failures of the serial bus or the ready line, as opposed
    /// to protocol-content or client-input problems.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_hvlink::HvlinkError;
    ///
    /// let incomplete = HvlinkError::framing_incomplete("identity query", 7);
    /// assert!(incomplete.is_bus_error());
    ///
    /// let mismatch = HvlinkError::protocol_mismatch("3 SM", "4 SM");
    /// assert!(!mismatch.is_bus_error());
    /// ```
    pub fn is_bus_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::BusTimeout { .. }
                | Self::FramingIncomplete { .. }
                | Self::DeviceNotAcknowledging { .. }
                | Self::ReadySignalTimeout { .. }
        )
    }

    /// Check if the error is the network client's fault
    ///
    /// Client-fault errors are rejected before any serial I/O happens and
    /// are rendered to the session as the generic failure indicator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_hvlink::HvlinkError;
    ///
    /// let addressing = HvlinkError::addressing("no device at (5,0)");
    /// assert!(addressing.is_client_fault());
    ///
    /// let timeout = HvlinkError::bus_timeout("command");
    /// assert!(!timeout.is_client_fault());
    /// ```
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::AddressingError { .. } | Self::CommandSyntaxError { .. }
        )
    }
}

/// Convert from std::io::Error
///
/// Automatically converts standard I/O errors, preserving the original
/// error message for debugging.
impl From<std::io::Error> for HvlinkError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
impl From<tokio::time::error::Elapsed> for HvlinkError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::bus_timeout("timed operation")
    }
}

/// Convert from YAML configuration parse errors
impl From<serde_yaml::Error> for HvlinkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

/// Convert from JSON configuration parse errors
impl From<serde_json::Error> for HvlinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}
