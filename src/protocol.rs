/// HV link protocol definitions and data structures
///
/// This module contains the wire-level definitions for the LeCroy-style
/// high-voltage module bus: framing constants, transaction classification,
/// geographic addressing, message builders and reply parsers.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{HvlinkError, HvlinkResult};

/// Crate slot index (0-15)
pub type Slot = u8;

/// Submodule index within a module (0 or 1)
pub type Submodule = u8;

/// Acknowledge byte: first byte of every successful module response
pub const ACK: u8 = 0x06;

/// Negative acknowledge byte: sent in place of ACK by a busy module
pub const NAK: u8 = 0x15;

/// End-of-message terminator, CR LF
pub const FRAME_TERMINATOR: [u8; 2] = [0x0D, 0x0A];

/// Line feed, the last byte of every outbound message
pub const LF: u8 = 0x0A;

/// Length of the handshake sentinel frame (ACK CR LF)
pub const HANDSHAKE_FRAME_LEN: usize = 3;

/// Per-character transfer time at the fixed 38.4 kbaud module rate.
/// The modules only ever run at this rate; the framer paces its reads
/// with this constant rather than deriving it from the configured port.
pub const CHAR_TIME_MICROS: u64 = 260;

/// Maximum read attempts to assemble one complete module response
pub const READ_ATTEMPTS: usize = 10;

/// Number of slots in a crate
pub const SLOT_COUNT: u8 = 16;

/// Maximum number of submodules in a module
pub const SUBMODULE_COUNT: u8 = 2;

/// Expected-length hint for probe and post-acknowledgment reads
/// (50 characters, roughly 13 ms of pacing)
pub const SHORT_READ_CHARS: usize = 50;

/// Padding added to the sent length for handshake reads after a command
pub const REPLY_PAD_CHARS: usize = 50;

/// Bound on waiting for the ready line after a command is accepted
pub const READY_WAIT_SECONDS: f32 = 2.0;

/// Default TCP port for network sessions
pub const DEFAULT_PORT: u16 = 24742;

/// Session prompt appended to every reply, expected by the upstream shim
pub const SESSION_PROMPT: &str = "hvpi>";

/// Reply sent to the client when a command fails
pub const FAILURE_REPLY: &str = "?\r\n";

/// Classification of one serial transaction
///
/// Mirrors the legacy status codes of the module link: a response either
/// never starts, stops short of its terminator, terminates without the ACK
/// byte, terminates normally with a payload, or is the bare 3-byte
/// handshake sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// No bytes ever arrived
    None,
    /// Bytes arrived but the terminator never did
    Incomplete,
    /// Terminated frame without the ACK byte (NAK likely)
    NoAck,
    /// Terminated frame starting with ACK and carrying a payload
    Ok,
    /// The 3-byte ACK CR LF sentinel: accepted, no payload yet
    Handshake,
}

impl TransactionStatus {
    /// Check whether a complete frame was received (terminator found)
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::NoAck | Self::Ok | Self::Handshake)
    }

    /// Check whether the module acknowledged (payload or handshake)
    pub fn is_acknowledged(self) -> bool {
        matches!(self, Self::Ok | Self::Handshake)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::None => "NONE (no response)",
            TransactionStatus::Incomplete => "INCOMPLETE (terminator not found)",
            TransactionStatus::NoAck => "NO_ACK (frame without acknowledge)",
            TransactionStatus::Ok => "OK (complete frame)",
            TransactionStatus::Handshake => "HANDSHAKE (accepted, no payload)",
        };
        write!(f, "{}", name)
    }
}

/// One send/receive exchange on the bus
///
/// Ephemeral: carries the classification, the raw accumulated bytes
/// (terminator included) and the number of read attempts consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub status: TransactionStatus,
    pub payload: Vec<u8>,
    pub attempts: usize,
}

impl Transaction {
    /// An exchange that never received a byte
    pub fn empty(attempts: usize) -> Self {
        Self {
            status: TransactionStatus::None,
            payload: Vec::new(),
            attempts,
        }
    }
}

/// Check whether the accumulation buffer ends with the CR LF terminator
pub fn ends_with_terminator(buffer: &[u8]) -> bool {
    buffer.len() >= FRAME_TERMINATOR.len()
        && buffer[buffer.len() - FRAME_TERMINATOR.len()..] == FRAME_TERMINATOR
}

/// Classify an accumulation buffer
///
/// Total over all inputs: an empty buffer is NONE, a buffer without the
/// terminator is INCOMPLETE, a terminated buffer is NO_ACK unless its first
/// byte is the ACK code, in which case it is OK, upgraded to HANDSHAKE when
/// the whole frame is exactly the 3-byte sentinel.
pub fn classify_frame(buffer: &[u8]) -> TransactionStatus {
    if buffer.is_empty() {
        return TransactionStatus::None;
    }
    if !ends_with_terminator(buffer) {
        return TransactionStatus::Incomplete;
    }
    if buffer[0] != ACK {
        return TransactionStatus::NoAck;
    }
    if buffer.len() == HANDSHAKE_FRAME_LEN {
        TransactionStatus::Handshake
    } else {
        TransactionStatus::Ok
    }
}

/// Compute the geographic address of a slot
///
/// Slot n lives at bus address 255 - n, so a 16-slot crate occupies
/// addresses 255 down to 240.
pub fn geographic_address(slot: Slot) -> HvlinkResult<u8> {
    if slot >= SLOT_COUNT {
        return Err(HvlinkError::addressing(format!(
            "slot {} out of range (0-{})",
            slot,
            SLOT_COUNT - 1
        )));
    }
    Ok(255 - slot)
}

/// Build the 3-byte handshake frame for a slot
///
/// The same bytes serve as the discovery probe and as the transfer
/// acknowledgment: address, ACK, line feed. Sending it also clears a
/// module holding the attention line with an undelivered response.
pub fn handshake_frame(slot: Slot) -> HvlinkResult<Vec<u8>> {
    let address = geographic_address(slot)?;
    Ok(vec![address, ACK, LF])
}

/// Build the submodule-count query for a slot
///
/// The slot number doubles as the transaction ticket, echoed back by the
/// module in its reply.
pub fn submodule_count_query(slot: Slot) -> HvlinkResult<Vec<u8>> {
    let address = geographic_address(slot)?;
    let mut frame = vec![address, ACK];
    frame.extend_from_slice(format!("{} SM\n", slot).as_bytes());
    Ok(frame)
}

/// Build the identity query for a submodule
///
/// Single-submodule modules take commands without a submodule field.
pub fn identity_query(slot: Slot, submodule: Submodule, submodule_count: u8) -> HvlinkResult<Vec<u8>> {
    let address = geographic_address(slot)?;
    let mut frame = vec![address, ACK];
    if submodule_count <= 1 {
        frame.extend_from_slice(format!("{} ID\n", slot).as_bytes());
    } else {
        frame.extend_from_slice(format!("{} {} ID\n", slot, submodule).as_bytes());
    }
    Ok(frame)
}

/// Build the stored command-header template for a device
///
/// Address byte, ACK byte, then the ticket prefix text ending in a space;
/// the native command is appended directly after the template.
pub fn command_header(slot: Slot, submodule: Submodule, submodule_count: u8) -> HvlinkResult<Vec<u8>> {
    let address = geographic_address(slot)?;
    let mut header = vec![address, ACK];
    if submodule_count <= 1 {
        header.extend_from_slice(format!("{} ", slot).as_bytes());
    } else {
        header.extend_from_slice(format!("{} {} ", slot, submodule).as_bytes());
    }
    Ok(header)
}

/// Assemble a full wire message from a stored header and a native command
pub fn build_command_message(header: &[u8], native_command: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(header.len() + native_command.len() + 1);
    message.extend_from_slice(header);
    message.extend_from_slice(native_command.as_bytes());
    message.push(LF);
    message
}

/// Parse a submodule-count reply
///
/// The payload is expected to read `<ACK><ticket> SM <count>\r\n`. The
/// ticket must echo the queried slot, the command text must echo "SM", and
/// the count must be a valid submodule count; anything else is a protocol
/// mismatch.
pub fn parse_count_reply(payload: &[u8], slot: Slot) -> HvlinkResult<u8> {
    let expected = format!("{} SM <count>", slot);
    let mismatch = |received: &str| HvlinkError::protocol_mismatch(expected.clone(), received.to_string());

    if payload.is_empty() {
        return Err(mismatch("<empty>"));
    }
    // Skip the ACK byte, take the text up to the carriage return
    let text = String::from_utf8_lossy(&payload[1..]);
    let line = text.split('\r').next().unwrap_or("");
    let mut fields = line.split_whitespace();

    let ticket: u8 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| mismatch(line))?;
    let command = fields.next().ok_or_else(|| mismatch(line))?;
    let count: u8 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| mismatch(line))?;

    if ticket != slot || command != "SM" {
        return Err(mismatch(line));
    }
    if count == 0 || count > SUBMODULE_COUNT {
        return Err(mismatch(line));
    }
    Ok(count)
}

/// Parse an identity reply
///
/// The payload is expected to read `<ACK><ticket> ID <identity>\r\n`; the
/// ticket digits echo the queried slot, so the preamble length is known
/// from the slot number alone. Returns the full identity string (it may
/// contain spaces: model, channel counts, serial number and limits).
pub fn parse_identity_reply(payload: &[u8], slot: Slot) -> HvlinkResult<String> {
    // ACK byte + ticket digits + " ID "
    let ticket_digits = if slot > 9 { 2 } else { 1 };
    let preamble = 1 + ticket_digits + 4;

    if payload.len() <= preamble {
        return Err(HvlinkError::protocol_mismatch(
            format!("{} ID <identity>", slot),
            format!("<{} bytes>", payload.len()),
        ));
    }
    let text = String::from_utf8_lossy(&payload[preamble..]);
    let identity = text.split('\r').next().unwrap_or("").to_string();
    if identity.trim().is_empty() {
        return Err(HvlinkError::protocol_mismatch(
            format!("{} ID <identity>", slot),
            "<empty identity>",
        ));
    }
    Ok(identity)
}

/// Derive the type signature for a discovered submodule
///
/// The signature is the first whitespace-delimited token of the identity
/// string with an "S<n>" submodule suffix appended, e.g. "1461N" at
/// submodule 0 becomes "1461NS0".
pub fn device_signature(identity: &str, submodule: Submodule) -> String {
    let token = identity.split_whitespace().next().unwrap_or("");
    format!("{}S{}", token, submodule)
}

/// Known high-voltage device types
///
/// One entry per recognized module/submodule signature. Discovery rejects
/// any identity that does not resolve to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// 1461 positive-polarity module, submodule 0
    Hv1461Ps0,
    /// 1461 negative-polarity module, submodule 0
    Hv1461Ns0,
    /// 1469 positive-polarity module, submodule 0
    Hv1469Ps0,
    /// 1469 positive-polarity module, submodule 1
    Hv1469Ps1,
    /// 1469 negative-polarity module, submodule 0
    Hv1469Ns0,
    /// 1469 negative-polarity module, submodule 1
    Hv1469Ns1,
    /// 1471 positive-polarity module, submodule 0
    Hv1471Ps0,
    /// 1471 negative-polarity module, submodule 0
    Hv1471Ns0,
}

impl DeviceType {
    /// The full signature table
    pub const ALL: [DeviceType; 8] = [
        DeviceType::Hv1461Ps0,
        DeviceType::Hv1461Ns0,
        DeviceType::Hv1469Ps0,
        DeviceType::Hv1469Ps1,
        DeviceType::Hv1469Ns0,
        DeviceType::Hv1469Ns1,
        DeviceType::Hv1471Ps0,
        DeviceType::Hv1471Ns0,
    ];

    /// Resolve a signature string to a device type
    pub fn from_signature(signature: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.signature() == signature)
    }

    /// The wire signature of this device type
    pub fn signature(self) -> &'static str {
        match self {
            DeviceType::Hv1461Ps0 => "1461PS0",
            DeviceType::Hv1461Ns0 => "1461NS0",
            DeviceType::Hv1469Ps0 => "1469PS0",
            DeviceType::Hv1469Ps1 => "1469PS1",
            DeviceType::Hv1469Ns0 => "1469NS0",
            DeviceType::Hv1469Ns1 => "1469NS1",
            DeviceType::Hv1471Ps0 => "1471PS0",
            DeviceType::Hv1471Ns0 => "1471NS0",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geographic_addresses() {
        assert_eq!(geographic_address(0).unwrap(), 255);
        assert_eq!(geographic_address(1).unwrap(), 254);
        assert_eq!(geographic_address(15).unwrap(), 240);
        for slot in 0..SLOT_COUNT {
            assert_eq!(geographic_address(slot).unwrap(), 255 - slot);
        }
        assert!(geographic_address(16).is_err());
        assert!(geographic_address(99).is_err());
    }

    #[test]
    fn test_classification_totality() {
        assert_eq!(classify_frame(&[]), TransactionStatus::None);
        assert_eq!(classify_frame(&[ACK]), TransactionStatus::Incomplete);
        assert_eq!(classify_frame(&[ACK, b'3', b' ']), TransactionStatus::Incomplete);
        // Terminated, first byte not ACK
        assert_eq!(classify_frame(&[NAK, 0x0D, 0x0A]), TransactionStatus::NoAck);
        assert_eq!(classify_frame(&[b'x', b'y', 0x0D, 0x0A]), TransactionStatus::NoAck);
        // Bare CR LF: too short to be a handshake, first byte is CR
        assert_eq!(classify_frame(&[0x0D, 0x0A]), TransactionStatus::NoAck);
        // Exactly the sentinel
        assert_eq!(classify_frame(&[ACK, 0x0D, 0x0A]), TransactionStatus::Handshake);
        // Payload-bearing frame
        assert_eq!(
            classify_frame(&[ACK, b'3', b' ', b'S', b'M', b' ', b'1', 0x0D, 0x0A]),
            TransactionStatus::Ok
        );
    }

    #[test]
    fn test_handshake_never_ok() {
        // The 3-byte sentinel must never classify as a payload-bearing frame
        let sentinel = [ACK, 0x0D, 0x0A];
        let status = classify_frame(&sentinel);
        assert_eq!(status, TransactionStatus::Handshake);
        assert_ne!(status, TransactionStatus::Ok);
        assert!(status.is_acknowledged());
    }

    #[test]
    fn test_status_predicates() {
        assert!(!TransactionStatus::None.is_terminated());
        assert!(!TransactionStatus::Incomplete.is_terminated());
        assert!(TransactionStatus::NoAck.is_terminated());
        assert!(!TransactionStatus::NoAck.is_acknowledged());
        assert!(TransactionStatus::Ok.is_acknowledged());
        assert!(TransactionStatus::Handshake.is_acknowledged());
    }

    #[test]
    fn test_handshake_frame() {
        assert_eq!(handshake_frame(0).unwrap(), vec![255, ACK, LF]);
        assert_eq!(handshake_frame(7).unwrap(), vec![248, ACK, LF]);
        assert!(handshake_frame(16).is_err());
    }

    #[test]
    fn test_submodule_count_query() {
        let frame = submodule_count_query(3).unwrap();
        assert_eq!(frame[0], 252);
        assert_eq!(frame[1], ACK);
        assert_eq!(&frame[2..], b"3 SM\n");

        let frame = submodule_count_query(12).unwrap();
        assert_eq!(&frame[2..], b"12 SM\n");
    }

    #[test]
    fn test_identity_query_formats() {
        // Single submodule: no submodule field
        let frame = identity_query(5, 0, 1).unwrap();
        assert_eq!(&frame[2..], b"5 ID\n");
        // Two submodules: the field appears
        let frame = identity_query(5, 1, 2).unwrap();
        assert_eq!(&frame[2..], b"5 1 ID\n");
    }

    #[test]
    fn test_command_header_templates() {
        let header = command_header(4, 0, 1).unwrap();
        assert_eq!(header, [&[251, ACK][..], b"4 "].concat());

        let header = command_header(4, 1, 2).unwrap();
        assert_eq!(header, [&[251, ACK][..], b"4 1 "].concat());

        let header = command_header(12, 0, 1).unwrap();
        assert_eq!(header, [&[243, ACK][..], b"12 "].concat());
    }

    #[test]
    fn test_command_message_assembly() {
        let header = command_header(4, 0, 1).unwrap();
        let message = build_command_message(&header, "MV");
        assert_eq!(message, [&[251, ACK][..], b"4 MV\n"].concat());
        // Byte-identical across repeated builds
        assert_eq!(message, build_command_message(&header, "MV"));
    }

    #[test]
    fn test_parse_count_reply() {
        let payload = b"\x063 SM 2\r\n";
        assert_eq!(parse_count_reply(payload, 3).unwrap(), 2);

        let payload = b"\x0612 SM 1\r\n";
        assert_eq!(parse_count_reply(payload, 12).unwrap(), 1);
    }

    #[test]
    fn test_parse_count_reply_mismatches() {
        // Wrong ticket
        assert!(parse_count_reply(b"\x064 SM 2\r\n", 3).is_err());
        // Wrong command echo
        assert!(parse_count_reply(b"\x063 ID 2\r\n", 3).is_err());
        // Count out of range
        assert!(parse_count_reply(b"\x063 SM 0\r\n", 3).is_err());
        assert!(parse_count_reply(b"\x063 SM 4\r\n", 3).is_err());
        // Garbage and truncation
        assert!(parse_count_reply(b"\x06garbage\r\n", 3).is_err());
        assert!(parse_count_reply(b"", 3).is_err());
    }

    #[test]
    fn test_parse_identity_reply() {
        let payload = b"\x063 ID 1461N 0 1 11 12 B51884 -1 1000 1.135\r\n";
        let identity = parse_identity_reply(payload, 3).unwrap();
        assert_eq!(identity, "1461N 0 1 11 12 B51884 -1 1000 1.135");

        // Two-digit slots shift the preamble
        let payload = b"\x0612 ID 1469P 0 8\r\n";
        let identity = parse_identity_reply(payload, 12).unwrap();
        assert_eq!(identity, "1469P 0 8");
    }

    #[test]
    fn test_parse_identity_reply_short() {
        assert!(parse_identity_reply(b"\x063 ID \r\n", 3).is_err());
        assert!(parse_identity_reply(b"\x06\r\n", 3).is_err());
        assert!(parse_identity_reply(b"", 3).is_err());
    }

    #[test]
    fn test_device_signature() {
        assert_eq!(device_signature("1461N 0 1 11 12 B51884", 0), "1461NS0");
        assert_eq!(device_signature("1469P 0 8", 1), "1469PS1");
        assert_eq!(device_signature("", 0), "S0");
    }

    #[test]
    fn test_device_type_table() {
        assert_eq!(DeviceType::ALL.len(), 8);
        assert_eq!(
            DeviceType::from_signature("1461PS0"),
            Some(DeviceType::Hv1461Ps0)
        );
        assert_eq!(
            DeviceType::from_signature("1471NS0"),
            Some(DeviceType::Hv1471Ns0)
        );
        assert_eq!(DeviceType::from_signature("1462PS0"), None);
        assert_eq!(DeviceType::from_signature(""), None);

        for device_type in DeviceType::ALL {
            assert_eq!(
                DeviceType::from_signature(device_type.signature()),
                Some(device_type)
            );
        }
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Hv1469Ns1), "1469NS1");
    }
}
