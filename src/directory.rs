/// Device directory for discovered crate modules
///
/// This module provides the lookup structures built by bus discovery: one
/// record per responding submodule, addressable by slot and submodule for
/// command dispatch, plus the set of slots that answered the address probe.
///
/// The directory is populated once, before any network session is accepted,
/// and is read-only afterwards; sessions share it behind an `Arc` without
/// locking.

use serde::{Deserialize, Serialize};

use crate::error::{HvlinkError, HvlinkResult};
use crate::protocol::{
    command_header, geographic_address, handshake_frame, DeviceType, Slot, Submodule, SLOT_COUNT,
    SUBMODULE_COUNT,
};

/// One discovered submodule
///
/// Carries everything command dispatch needs: the resolved device type, the
/// identity text the module reported, and the prebuilt wire fragments for
/// addressing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Crate slot the module occupies
    pub slot: Slot,
    /// Submodule index within the module
    pub submodule: Submodule,
    /// Bus address the slot answers to
    pub geographic_address: u8,
    /// Submodule count the parent module reported
    pub submodule_count: u8,
    /// Resolved device type
    pub device_type: DeviceType,
    /// Identity string as reported by the module
    pub identity: String,
    /// Prebuilt command header: address byte, ACK, ticket prefix
    #[serde(skip)]
    pub command_header: Vec<u8>,
    /// Prebuilt transfer acknowledgment frame
    #[serde(skip)]
    pub ack_frame: Vec<u8>,
}

impl DeviceRecord {
    /// Build a record, precomputing the wire fragments for its address
    pub fn new(
        slot: Slot,
        submodule: Submodule,
        submodule_count: u8,
        device_type: DeviceType,
        identity: String,
    ) -> HvlinkResult<Self> {
        Ok(Self {
            slot,
            submodule,
            geographic_address: geographic_address(slot)?,
            submodule_count,
            device_type,
            identity,
            command_header: command_header(slot, submodule, submodule_count)?,
            ack_frame: handshake_frame(slot)?,
        })
    }
}

/// Directory statistics
#[derive(Debug, Clone, Default)]
pub struct DirectoryStats {
    /// Slots that answered the address probe
    pub occupied_slots: usize,
    /// Submodule records collected
    pub devices: usize,
}

/// Lookup table over the discovered crate population
///
/// Records are kept in scan order (ascending slot, then submodule), which
/// is also the order inventory listings present them in.
#[derive(Debug, Clone)]
pub struct DeviceDirectory {
    records: Vec<DeviceRecord>,
    lookup: [[Option<usize>; SUBMODULE_COUNT as usize]; SLOT_COUNT as usize],
    occupied: [bool; SLOT_COUNT as usize],
}

impl DeviceDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            lookup: [[None; SUBMODULE_COUNT as usize]; SLOT_COUNT as usize],
            occupied: [false; SLOT_COUNT as usize],
        }
    }

    /// Mark a slot as having answered the address probe
    pub fn mark_occupied(&mut self, slot: Slot) -> HvlinkResult<()> {
        if slot >= SLOT_COUNT {
            return Err(HvlinkError::addressing(format!(
                "slot {} out of range",
                slot
            )));
        }
        self.occupied[slot as usize] = true;
        Ok(())
    }

    /// Check whether a slot answered the address probe
    pub fn is_occupied(&self, slot: Slot) -> bool {
        slot < SLOT_COUNT && self.occupied[slot as usize]
    }

    /// Add a discovered record
    pub fn insert(&mut self, record: DeviceRecord) -> HvlinkResult<()> {
        if record.slot >= SLOT_COUNT || record.submodule >= SUBMODULE_COUNT {
            return Err(HvlinkError::addressing(format!(
                "record address {}:{} out of range",
                record.slot, record.submodule
            )));
        }
        let cell = &mut self.lookup[record.slot as usize][record.submodule as usize];
        if cell.is_some() {
            return Err(HvlinkError::addressing(format!(
                "duplicate record for {}:{}",
                record.slot, record.submodule
            )));
        }
        *cell = Some(self.records.len());
        self.records.push(record);
        Ok(())
    }

    /// Look up the record for a slot/submodule pair
    pub fn get(&self, slot: Slot, submodule: Submodule) -> Option<&DeviceRecord> {
        if slot >= SLOT_COUNT || submodule >= SUBMODULE_COUNT {
            return None;
        }
        self.lookup[slot as usize][submodule as usize].map(|index| &self.records[index])
    }

    /// All records in scan order
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Occupied slots in ascending order
    pub fn occupied_slots(&self) -> Vec<Slot> {
        (0..SLOT_COUNT).filter(|&s| self.occupied[s as usize]).collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether any device was discovered
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get directory statistics
    pub fn get_stats(&self) -> DirectoryStats {
        DirectoryStats {
            occupied_slots: self.occupied.iter().filter(|&&o| o).count(),
            devices: self.records.len(),
        }
    }
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}
