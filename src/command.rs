/// Session command parsing and translation
///
/// This module turns the text commands a network client types into wire
/// exchanges on the module bus. A command line is either one of the
/// gateway's own underscore commands or a device command of the form
/// `<slot> <submodule> <native command>`, which is prefixed with the
/// stored header for that device and run through the full bus exchange.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::directory::DeviceDirectory;
use crate::error::{HvlinkError, HvlinkResult};
use crate::gpio::ReadyLine;
use crate::protocol::{
    build_command_message, Slot, Submodule, READY_WAIT_SECONDS, SHORT_READ_CHARS, SLOT_COUNT,
    SUBMODULE_COUNT,
};
use crate::transport::BusTransport;
use crate::utils::logging::log_exchange;

/// One parsed session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `_Q`: end the session
    Quit,
    /// `_LL`: list the discovered devices
    ListDevices,
    /// `_CLI`: acknowledge every occupied slot to flush stuck responses
    ClearAttention,
    /// `<slot> <submodule> <command>`: forward to a module
    Device {
        slot: Slot,
        submodule: Submodule,
        native: String,
    },
}

impl SessionCommand {
    /// Parse one command line
    ///
    /// The whole input is uppercased and truncated at the first carriage
    /// return; input without a carriage return is rejected. Underscore
    /// commands match by prefix, so `_QUIT` quits and `_LLX` lists. A
    /// device command carries two digit-only address fields, slot then
    /// submodule, each followed by a space; a missing or malformed field
    /// is rejected before anything reaches the bus.
    pub fn parse(input: &str) -> HvlinkResult<Self> {
        let upper = input.to_uppercase();
        let line = match upper.find('\r') {
            Some(pos) => &upper[..pos],
            None => {
                return Err(HvlinkError::syntax("command not terminated by carriage return"));
            }
        };
        let line = line.trim_start_matches(' ');

        if line.starts_with("_Q") {
            return Ok(SessionCommand::Quit);
        }
        if line.starts_with("_LL") {
            return Ok(SessionCommand::ListDevices);
        }
        if line.starts_with("_CLI") {
            return Ok(SessionCommand::ClearAttention);
        }

        let (slot, rest) = parse_address_field(line, SLOT_COUNT, "slot")?;
        let (submodule, rest) = parse_address_field(rest, SUBMODULE_COUNT, "submodule")?;

        if rest.is_empty() {
            return Err(HvlinkError::syntax("empty device command"));
        }

        Ok(SessionCommand::Device {
            slot,
            submodule,
            native: rest.to_string(),
        })
    }
}

/// Scan a leading digit run, check its bound, and require a space after it
fn parse_address_field<'a>(
    text: &'a str,
    bound: u8,
    field: &str,
) -> HvlinkResult<(u8, &'a str)> {
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return Err(HvlinkError::syntax(format!("expected a {} number", field)));
    }

    let value: u32 = text[..digits_end]
        .parse()
        .map_err(|_| HvlinkError::syntax(format!("unreadable {} number", field)))?;

    if !text[digits_end..].starts_with(' ') {
        return Err(HvlinkError::syntax(format!(
            "expected a space after the {} number",
            field
        )));
    }
    if value >= bound as u32 {
        return Err(HvlinkError::addressing(format!(
            "{} {} out of range (0-{})",
            field,
            value,
            bound - 1
        )));
    }

    Ok((value as u8, text[digits_end..].trim_start_matches(' ')))
}

/// Reply produced by one executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    /// Close the connection without replying
    Quit,
    /// Text to send back to the client
    Text(String),
}

/// Executes session commands against the shared bus
///
/// Holds the bus lock for the whole exchange of a device command, so
/// concurrent sessions interleave whole transactions rather than bytes.
pub struct CommandTranslator {
    transport: Arc<Mutex<BusTransport>>,
    ready_line: Arc<dyn ReadyLine>,
    directory: Arc<DeviceDirectory>,
    ready_timeout: Duration,
}

impl CommandTranslator {
    /// Create a translator over the shared bus and directory
    pub fn new(
        transport: Arc<Mutex<BusTransport>>,
        ready_line: Arc<dyn ReadyLine>,
        directory: Arc<DeviceDirectory>,
    ) -> Self {
        Self {
            transport,
            ready_line,
            directory,
            ready_timeout: Duration::from_secs_f32(READY_WAIT_SECONDS),
        }
    }

    /// Override the ready-line wait bound
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// The directory this translator dispatches against
    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    /// Parse and run one command line
    ///
    /// Parsing happens before any bus traffic, so a malformed line never
    /// touches the serial port.
    pub async fn execute(&self, input: &str) -> HvlinkResult<SessionReply> {
        let command = SessionCommand::parse(input)?;
        match command {
            SessionCommand::Quit => Ok(SessionReply::Quit),
            SessionCommand::ListDevices => Ok(SessionReply::Text(self.list_devices())),
            SessionCommand::ClearAttention => {
                self.clear_attention().await?;
                Ok(SessionReply::Text(String::new()))
            }
            SessionCommand::Device {
                slot,
                submodule,
                native,
            } => {
                let started = Instant::now();
                let result = self.execute_device(slot, submodule, &native).await;
                log_exchange(slot, submodule, &native, started.elapsed(), result.is_ok());
                result.map(SessionReply::Text)
            }
        }
    }

    /// One inventory line per discovered device, in scan order
    fn list_devices(&self) -> String {
        let mut listing = String::new();
        for record in self.directory.records() {
            listing.push_str(&format!("{} {}\r\n", record.slot, record.identity));
        }
        listing
    }

    /// Acknowledge every occupied slot, draining whatever it sends back
    ///
    /// Slots that answered the probe but produced no record still hold the
    /// attention line sometimes; slots without a record at submodule 0 have
    /// no stored acknowledgment and are left alone.
    async fn clear_attention(&self) -> HvlinkResult<()> {
        let mut bus = self.transport.lock().await;
        for slot in self.directory.occupied_slots() {
            let record = match self.directory.get(slot, 0) {
                Some(record) => record,
                None => continue,
            };
            bus.send_frame(&record.ack_frame).await?;
            let _ = bus.read_transaction(SHORT_READ_CHARS).await?;
        }
        Ok(())
    }

    async fn execute_device(
        &self,
        slot: Slot,
        submodule: Submodule,
        native: &str,
    ) -> HvlinkResult<String> {
        let record = self.directory.get(slot, submodule).ok_or_else(|| {
            HvlinkError::addressing(format!("no device at {}:{}", slot, submodule))
        })?;

        let wire = build_command_message(&record.command_header, native);

        let mut bus = self.transport.lock().await;
        let payload = bus
            .command_exchange(
                slot,
                &wire,
                &record.ack_frame,
                self.ready_line.as_ref(),
                self.ready_timeout,
            )
            .await?;
        drop(bus);

        // Strip the ACK byte; the terminator stays for the client
        let reply = payload.get(1..).unwrap_or(&[]);
        Ok(String::from_utf8_lossy(reply).into_owned())
    }
}
