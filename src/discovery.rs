/// Crate bus discovery
///
/// This module walks all sixteen slots at startup and builds the device
/// directory the gateway serves from: an address probe finds occupied
/// slots, then each occupied slot is asked for its submodule count and
/// each submodule for its identity. Any slot or submodule that fails a
/// step is logged and skipped, so the scan runs to completion even on a
/// dead bus and at worst produces an empty directory.

use std::time::Duration;

use log::{debug, info, warn};

use crate::directory::{DeviceDirectory, DeviceRecord};
use crate::error::{HvlinkError, HvlinkResult};
use crate::gpio::ReadyLine;
use crate::protocol::{
    device_signature, handshake_frame, identity_query, parse_count_reply, parse_identity_reply,
    submodule_count_query, DeviceType, Slot, TransactionStatus, READY_WAIT_SECONDS,
    SHORT_READ_CHARS, SLOT_COUNT,
};
use crate::transport::BusTransport;
use crate::utils::OperationTimer;

/// One-shot scanner that interrogates the bus and produces a directory
///
/// Runs single-threaded before the network server starts, so it borrows
/// the transport directly instead of going through the session lock.
pub struct BusScanner<'a> {
    transport: &'a mut BusTransport,
    ready_line: &'a dyn ReadyLine,
    ready_timeout: Duration,
}

impl<'a> BusScanner<'a> {
    /// Create a scanner over the shared bus
    pub fn new(transport: &'a mut BusTransport, ready_line: &'a dyn ReadyLine) -> Self {
        Self {
            transport,
            ready_line,
            ready_timeout: Duration::from_secs_f32(READY_WAIT_SECONDS),
        }
    }

    /// Override the ready-line wait bound
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Scan the bus and build the device directory
    pub async fn scan(mut self) -> HvlinkResult<DeviceDirectory> {
        let timer = OperationTimer::start("bus discovery");
        info!("🔍 Scanning crate bus for modules...");

        let mut directory = DeviceDirectory::new();
        self.probe_slots(&mut directory).await?;

        let occupied = directory.occupied_slots();
        info!(
            "📍 {} slot(s) answered the address probe: {:?}",
            occupied.len(),
            occupied
        );

        for slot in occupied {
            match self.interrogate_slot(slot).await {
                Ok(records) => {
                    for record in records {
                        info!(
                            "✅ Slot {}:{} identified as {} ({})",
                            record.slot, record.submodule, record.device_type, record.identity
                        );
                        directory.insert(record)?;
                    }
                }
                Err(e) => {
                    warn!("⚠️ Slot {} interrogation failed: {}", slot, e);
                }
            }
        }

        let stats = directory.get_stats();
        if directory.is_empty() {
            warn!("⚠️ No high-voltage modules found on the bus");
        }
        info!(
            "🚀 Discovery complete: {} device(s) in {} occupied slot(s)",
            stats.devices, stats.occupied_slots
        );
        timer.stop_and_log(!directory.is_empty());

        Ok(directory)
    }

    /// Probe every slot address for any sign of life
    ///
    /// A response of any classification marks the slot occupied. The probe
    /// also flushes a module that is still holding an undelivered response
    /// from a previous run. Serial errors leave the slot unmarked and the
    /// probe moves on.
    async fn probe_slots(&mut self, directory: &mut DeviceDirectory) -> HvlinkResult<()> {
        for slot in 0..SLOT_COUNT {
            let probe = handshake_frame(slot)?;
            match self.transport.transact(&probe, SHORT_READ_CHARS).await {
                Ok(result) if result.status != TransactionStatus::None => {
                    debug!("Slot {} probe: {}", slot, result.status);
                    directory.mark_occupied(slot)?;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("⚠️ Slot {} probe failed: {}", slot, e);
                }
            }
        }
        Ok(())
    }

    /// Query one occupied slot for its submodules
    async fn interrogate_slot(&mut self, slot: Slot) -> HvlinkResult<Vec<DeviceRecord>> {
        let count = self.query_submodule_count(slot).await?;
        debug!("Slot {} reports {} submodule(s)", slot, count);

        let mut records = Vec::with_capacity(count as usize);
        for submodule in 0..count {
            match self.query_identity(slot, submodule, count).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("⚠️ Slot {}:{} identification failed: {}", slot, submodule, e);
                }
            }
        }
        Ok(records)
    }

    async fn query_submodule_count(&mut self, slot: Slot) -> HvlinkResult<u8> {
        let query = submodule_count_query(slot)?;
        let ack = handshake_frame(slot)?;
        let payload = self
            .transport
            .command_exchange(slot, &query, &ack, self.ready_line, self.ready_timeout)
            .await?;
        parse_count_reply(&payload, slot)
    }

    async fn query_identity(
        &mut self,
        slot: Slot,
        submodule: u8,
        submodule_count: u8,
    ) -> HvlinkResult<DeviceRecord> {
        let query = identity_query(slot, submodule, submodule_count)?;
        let ack = handshake_frame(slot)?;
        let payload = self
            .transport
            .command_exchange(slot, &query, &ack, self.ready_line, self.ready_timeout)
            .await?;

        let identity = parse_identity_reply(&payload, slot)?;
        let signature = device_signature(&identity, submodule);
        let device_type = DeviceType::from_signature(&signature)
            .ok_or_else(|| HvlinkError::unknown_device_type(signature, slot))?;

        DeviceRecord::new(slot, submodule, submodule_count, device_type, identity)
    }
}
