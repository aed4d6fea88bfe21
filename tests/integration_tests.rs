//! Integration Tests for Voltage HVLink Library
//!
//! This module contains integration tests that drive the library components
//! together: discovery over a scripted bus, live TCP sessions against the
//! gateway server, and the framing behavior visible through the public API.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_test::assert_ok;

use voltage_hvlink::*;

/// Shared log of frames written through a scripted port
type FrameLog = Arc<StdMutex<Vec<Vec<u8>>>>;

/// Scripted bus port for testing without crate hardware
///
/// Each queued chunk is handed out by one poll: an empty chunk scripts a
/// quiet poll and an exhausted queue stays quiet forever. Written frames
/// land in a shared log for inspection after the port is boxed.
pub struct ScriptedBusPort {
    reads: VecDeque<Vec<u8>>,
    written: FrameLog,
}

impl ScriptedBusPort {
    pub fn new(reads: Vec<Vec<u8>>) -> Self {
        Self {
            reads: reads.into(),
            written: FrameLog::default(),
        }
    }

    pub fn written_log(&self) -> FrameLog {
        Arc::clone(&self.written)
    }
}

#[async_trait]
impl BusPort for ScriptedBusPort {
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

/// Ready line stub pinned to one state
pub struct StaticReadyLine {
    ready: bool,
}

#[async_trait]
impl ReadyLine for StaticReadyLine {
    fn line(&self) -> u8 {
        23
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Test a full discovery pass over a scripted bus
#[tokio::test(start_paused = true)]
async fn test_discovery_over_scripted_bus() {
    utils::logging::init_test_logger();

    let identity = "1469P 0 1 21 22 B18739 -1 3000 2.001";
    let port = ScriptedBusPort::new(single_module_script(3, identity));
    let written = port.written_log();
    let mut bus = BusTransport::new(Box::new(port));
    let ready = StaticReadyLine { ready: true };

    let directory = tokio_test::assert_ok!(BusScanner::new(&mut bus, &ready).scan().await);

    assert_eq!(directory.len(), 1);
    assert!(directory.is_occupied(3));
    let record = directory.get(3, 0).unwrap();
    assert_eq!(record.device_type, DeviceType::Hv1469Ps0);
    assert_eq!(record.identity, identity);

    // Single-submodule module: the stored header carries no submodule field
    assert_eq!(record.command_header, vec![252, 0x06, b'3', b' ']);
    assert_eq!(record.ack_frame, vec![252, 0x06, 0x0A]);

    // 16 probes, then a query/acknowledge pair for the count and identity
    let writes = written.lock().unwrap();
    assert_eq!(writes.len(), 20);
    assert_eq!(writes[0], vec![255, 0x06, 0x0A]);
    assert_eq!(writes[3], vec![252, 0x06, 0x0A]);
    assert_eq!(writes[16], frame(&[252, 0x06], b"3 SM\n"));
    assert_eq!(writes[17], vec![252, 0x06, 0x0A]);
    assert_eq!(writes[18], frame(&[252, 0x06], b"3 ID\n"));
    assert_eq!(writes[19], vec![252, 0x06, 0x0A]);
    drop(writes);

    // 15 silent probes are timeouts, 5 terminated frames came back
    let stats = bus.get_stats();
    assert_eq!(stats.requests_sent, 20);
    assert_eq!(stats.responses_received, 5);
    assert_eq!(stats.timeouts, 15);
    assert_eq!(stats.errors, 0);
}

/// Test a mixed scan: one slot rejects its count query, another maps a
/// two-submodule module with submodule-bearing headers
#[tokio::test(start_paused = true)]
async fn test_mixed_discovery_with_failing_slot() {
    let identity = "1469P 0 8 21 22 23 24 B18739 -1 3000 2.001";
    let mut script = probe_script(&[2, 5]);
    // Slot 2 answers the probe but rejects the count query with NAK
    script.push(vec![0x15, 0x0D, 0x0A]);
    // Slot 5: two submodules, one identity ladder per submodule; the
    // module echoes only its slot ticket in the replies
    script.push(handshake_chunk());
    script.push(reply_chunk("5 SM 2"));
    script.push(handshake_chunk());
    script.push(reply_chunk(&format!("5 ID {}", identity)));
    script.push(handshake_chunk());
    script.push(reply_chunk(&format!("5 ID {}", identity)));

    let port = ScriptedBusPort::new(script);
    let written = port.written_log();
    let mut bus = BusTransport::new(Box::new(port));
    let ready = StaticReadyLine { ready: true };

    let directory = tokio_test::assert_ok!(BusScanner::new(&mut bus, &ready).scan().await);

    // Slot 2 stays occupied but unmapped; slot 5 contributes both records
    assert_eq!(directory.occupied_slots(), vec![2, 5]);
    assert_eq!(directory.len(), 2);
    assert!(directory.get(2, 0).is_none());
    let first = directory.get(5, 0).unwrap();
    let second = directory.get(5, 1).unwrap();
    assert_eq!(first.device_type, DeviceType::Hv1469Ps0);
    assert_eq!(second.device_type, DeviceType::Hv1469Ps1);
    assert_eq!(first.geographic_address, 250);
    assert_eq!(first.submodule_count, 2);

    // Multi-submodule addressing keeps the submodule field in the header
    assert_eq!(first.command_header, frame(&[250, 0x06], b"5 0 "));
    assert_eq!(second.command_header, frame(&[250, 0x06], b"5 1 "));

    let writes = written.lock().unwrap();
    // 16 probes, slot 2's rejected count query, then slot 5's count
    // ladder and an identity ladder per submodule
    assert_eq!(writes.len(), 23);
    assert_eq!(writes[16], frame(&[253, 0x06], b"2 SM\n"));
    assert_eq!(writes[17], frame(&[250, 0x06], b"5 SM\n"));
    assert_eq!(writes[19], frame(&[250, 0x06], b"5 0 ID\n"));
    assert_eq!(writes[21], frame(&[250, 0x06], b"5 1 ID\n"));
}

/// Test a live TCP session: list, device command, rejection, quit
#[tokio::test(start_paused = true)]
async fn test_session_flow_end_to_end() {
    utils::logging::init_test_logger();

    let identity = "1461P 0 1 11 12 B51884 -1 1000 1.135";
    let mut script = single_module_script(3, identity);
    // Session-phase device command: accepted, then answered after the ack
    script.push(handshake_chunk());
    script.push(reply_chunk("3 1000"));

    let port = ScriptedBusPort::new(script);
    let written = port.written_log();
    let mut bus = BusTransport::new(Box::new(port));
    let ready: Arc<dyn ReadyLine> = Arc::new(StaticReadyLine { ready: true });

    let directory = BusScanner::new(&mut bus, ready.as_ref()).scan().await.unwrap();
    let translator = CommandTranslator::new(
        Arc::new(Mutex::new(bus)),
        Arc::clone(&ready),
        Arc::new(directory),
    );

    let address: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut server = GatewayServer::new(address, translator);
    tokio_test::assert_ok!(server.start().await);
    let bound = server.local_addr().unwrap();

    let mut client = TcpStream::connect(bound).await.unwrap();

    // Device list in discovery order
    client.write_all(b"_LL\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert_eq!(reply, format!("3 {}\r\nhvpi>", identity));

    // Device command, lowercase input is accepted
    client.write_all(b"3 0 dv 1000\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert_eq!(reply, "3 1000\r\nhvpi>");

    // The exchange added the command frame and its acknowledgment
    assert_eq!(written.lock().unwrap().len(), 22);

    // Garbage gets the failure reply and the session stays up
    client.write_all(b"PING\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert_eq!(reply, "?\r\nhvpi>");

    // Clear-attention sends one acknowledgment per occupied slot and
    // replies with nothing but the prompt
    client.write_all(b"_CLI\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert_eq!(reply, "hvpi>");
    {
        let writes = written.lock().unwrap();
        assert_eq!(writes.len(), 23);
        assert_eq!(writes[22], vec![252, 0x06, 0x0A]);
    }

    // Quit closes the connection without a reply
    client.write_all(b"_Q\r\n").await.unwrap();
    let mut sink = [0u8; 16];
    let closed = client.read(&mut sink).await.unwrap();
    assert_eq!(closed, 0);

    server.stop().await.unwrap();
}

/// Test that malformed and unroutable commands never reach the bus
#[tokio::test]
async fn test_rejected_commands_send_no_frames() {
    let port = ScriptedBusPort::new(Vec::new());
    let written = port.written_log();
    let bus = BusTransport::new(Box::new(port));
    let ready: Arc<dyn ReadyLine> = Arc::new(StaticReadyLine { ready: true });
    let translator = CommandTranslator::new(
        Arc::new(Mutex::new(bus)),
        ready,
        Arc::new(DeviceDirectory::new()),
    );

    // Missing terminator
    let result = translator.execute("_LL").await;
    assert!(matches!(result, Err(HvlinkError::CommandSyntaxError { .. })));

    // Submodule field missing
    let result = translator.execute("5 DV 100\r\n").await;
    assert!(matches!(result, Err(HvlinkError::CommandSyntaxError { .. })));

    // Well-formed address on an empty slot
    let result = translator.execute("5 0 MV\r\n").await;
    assert!(matches!(result, Err(HvlinkError::AddressingError { .. })));

    // Slot number out of range
    let result = translator.execute("99 DV 100\r\n").await;
    assert!(result.is_err());
    let result = translator.execute("99 0 ID\r\n").await;
    assert!(result.is_err());

    assert!(written.lock().unwrap().is_empty());
}

/// Test framer classifications through the public transaction API
#[tokio::test(start_paused = true)]
async fn test_transaction_classification() {
    // Bytes without a terminator, then silence: incomplete after two polls
    let port = ScriptedBusPort::new(vec![b"\x06PARTIAL".to_vec()]);
    let mut bus = BusTransport::new(Box::new(port));
    let result = bus.transact(&[255, 0x06, 0x0A], 10).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Incomplete);
    assert_eq!(result.attempts, 2);

    // Terminated frame without the acknowledge byte
    let port = ScriptedBusPort::new(vec![b"\x15 rejected\r\n".to_vec()]);
    let mut bus = BusTransport::new(Box::new(port));
    let result = bus.transact(&[255, 0x06, 0x0A], 10).await.unwrap();
    assert_eq!(result.status, TransactionStatus::NoAck);

    // Silent bus: no response at all
    let port = ScriptedBusPort::new(Vec::new());
    let mut bus = BusTransport::new(Box::new(port));
    let result = bus.transact(&[255, 0x06, 0x0A], 10).await.unwrap();
    assert_eq!(result.status, TransactionStatus::None);
    assert!(result.payload.is_empty());
    assert_eq!(result.attempts, 1);

    // A response trickling in across polls still runs out the budget
    let port = ScriptedBusPort::new(vec![vec![0x06; 1]; 10]);
    let mut bus = BusTransport::new(Box::new(port));
    let result = bus.transact(&[255, 0x06, 0x0A], 10).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Incomplete);
    assert_eq!(result.attempts, 10);
}

/// Test that a stuck ready line aborts the exchange before the transfer
#[tokio::test(start_paused = true)]
async fn test_ready_timeout_aborts_exchange() {
    let port = ScriptedBusPort::new(vec![handshake_chunk()]);
    let written = port.written_log();
    let mut bus = BusTransport::new(Box::new(port));
    let ready = StaticReadyLine { ready: false };

    let command = frame(&[252, 0x06], b"3 SM\n");
    let ack = vec![252, 0x06, 0x0A];
    let result = bus
        .command_exchange(3, &command, &ack, &ready, Duration::from_secs(2))
        .await;

    match result {
        Err(HvlinkError::ReadySignalTimeout { line, .. }) => assert_eq!(line, 23),
        other => panic!("expected ready timeout, got {:?}", other),
    }

    // The acknowledgment was never sent
    assert_eq!(written.lock().unwrap().len(), 1);
}

/// Test the device signature catalog with the full table
#[test]
fn test_device_type_catalog() {
    let expected = [
        ("1461PS0", DeviceType::Hv1461Ps0),
        ("1461NS0", DeviceType::Hv1461Ns0),
        ("1469PS0", DeviceType::Hv1469Ps0),
        ("1469PS1", DeviceType::Hv1469Ps1),
        ("1469NS0", DeviceType::Hv1469Ns0),
        ("1469NS1", DeviceType::Hv1469Ns1),
        ("1471PS0", DeviceType::Hv1471Ps0),
        ("1471NS0", DeviceType::Hv1471Ns0),
    ];

    for (signature, device_type) in expected {
        assert_eq!(
            DeviceType::from_signature(signature),
            Some(device_type),
            "signature {} did not resolve",
            signature
        );
        assert_eq!(device_type.signature(), signature);
    }

    assert_eq!(DeviceType::from_signature("9999XS0"), None);
    assert_eq!(DeviceType::ALL.len(), 8);
}

// Helper functions for tests

/// Handshake sentinel chunk: ACK CR LF
fn handshake_chunk() -> Vec<u8> {
    vec![0x06, 0x0D, 0x0A]
}

/// Terminated reply chunk: ACK byte, text, CR LF
fn reply_chunk(text: &str) -> Vec<u8> {
    let mut chunk = vec![0x06];
    chunk.extend_from_slice(text.as_bytes());
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// Outbound frame: binary prefix followed by command text
fn frame(prefix: &[u8], text: &[u8]) -> Vec<u8> {
    let mut frame = prefix.to_vec();
    frame.extend_from_slice(text);
    frame
}

/// Probe-phase script: answering slots reply with the sentinel on their
/// first poll, silent slots burn their single quiet poll
fn probe_script(answering: &[u8]) -> Vec<Vec<u8>> {
    let mut script = Vec::new();
    for slot in 0..16u8 {
        if answering.contains(&slot) {
            script.push(handshake_chunk());
        } else {
            script.push(Vec::new());
        }
    }
    script
}

/// Discovery script for one single-submodule module
fn single_module_script(slot: u8, identity: &str) -> Vec<Vec<u8>> {
    let mut script = probe_script(&[slot]);
    script.push(handshake_chunk());
    script.push(reply_chunk(&format!("{} SM 1", slot)));
    script.push(handshake_chunk());
    script.push(reply_chunk(&format!("{} ID {}", slot, identity)));
    script
}

/// Read from a session socket until the prompt arrives
async fn read_reply(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed while waiting for a reply");
        data.extend_from_slice(&chunk[..n]);
        if data.ends_with(SESSION_PROMPT.as_bytes()) {
            return String::from_utf8(data).unwrap();
        }
    }
}
