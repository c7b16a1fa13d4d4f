// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bus × slot table of the PCI devices attached to the VM.

use super::config::PciBusConfig;
use super::pci_device::SharedPciDevice;
use std::fmt;
use std::result;
use std::sync::Arc;

/// Error type for `DeviceRegistry` usage.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested bus is outside the table.
    #[error("pci bus {0} is out of range")]
    InvalidBus(u8),
    /// The requested slot is outside the table.
    #[error("pci slot {0} is out of range")]
    InvalidSlot(u8),
    /// The insertion failed because the explicitly requested slot is taken.
    #[error("pci slot {0} is already taken")]
    SlotOccupied(PciSlot),
    /// The insertion failed because the device already sits in the table.
    #[error("pci device is already registered at {0}")]
    AlreadyRegistered(PciSlot),
    /// No free slot matched the placement constraints.
    #[error("no free pci slot available")]
    NoSlotAvailable,
}

/// Simplify the `Result` type.
pub type Result<T> = result::Result<T, Error>;

/// Location of a device in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciSlot {
    pub bus: u8,
    pub slot: u8,
}

impl PciSlot {
    pub fn new(bus: u8, slot: u8) -> Self {
        PciSlot { bus, slot }
    }
}

impl fmt::Display for PciSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}", self.bus, self.slot)
    }
}

/// Fixed-size table of registered devices.
///
/// The registry holds one strong reference to every device it contains. The
/// device's owner may keep its own handle; once the device is unregistered the
/// owner's handle is the only one left.
pub struct DeviceRegistry {
    max_buses: usize,
    max_slots: usize,
    // bus-major, `max_buses * max_slots` cells
    devices: Vec<Option<SharedPciDevice>>,
}

impl DeviceRegistry {
    pub fn new(config: &PciBusConfig) -> Self {
        let cells = config.max_buses * config.max_slots;
        DeviceRegistry {
            max_buses: config.max_buses,
            max_slots: config.max_slots,
            devices: vec![None; cells],
        }
    }

    pub fn max_buses(&self) -> usize {
        self.max_buses
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    fn index(&self, bus: usize, slot: usize) -> Option<usize> {
        if bus < self.max_buses && slot < self.max_slots {
            Some(bus * self.max_slots + slot)
        } else {
            None
        }
    }

    fn is_free(&self, bus: usize, slot: usize) -> bool {
        self.index(bus, slot)
            .map_or(false, |idx| self.devices[idx].is_none())
    }

    /// Device at `bus`/`slot`, if the location is inside the table and taken.
    pub fn get(&self, bus: u8, slot: u8) -> Option<&SharedPciDevice> {
        self.index(bus as usize, slot as usize)
            .and_then(|idx| self.devices[idx].as_ref())
    }

    /// Location of `device`, if it is registered.
    pub fn find(&self, device: &SharedPciDevice) -> Option<PciSlot> {
        self.iter()
            .find(|(_, d)| Arc::ptr_eq(*d, device))
            .map(|(location, _)| location)
    }

    /// Iterate over the occupied cells, bus-major.
    pub fn iter(&self) -> impl Iterator<Item = (PciSlot, &SharedPciDevice)> + '_ {
        let max_slots = self.max_slots;
        self.devices.iter().enumerate().filter_map(move |(idx, d)| {
            d.as_ref().map(|d| {
                let location = PciSlot::new((idx / max_slots) as u8, (idx % max_slots) as u8);
                (location, d)
            })
        })
    }

    /// Place `device` in the table.
    ///
    /// With both `bus` and `slot` given the device goes exactly there. With
    /// either one left open the table is searched from bus 0 / slot 0 (or the
    /// given value): the slot advances first, then the bus, and a requested
    /// bus or slot never changes.
    pub fn register(
        &mut self,
        device: SharedPciDevice,
        bus: Option<u8>,
        slot: Option<u8>,
    ) -> Result<PciSlot> {
        if let Some(location) = self.find(&device) {
            return Err(Error::AlreadyRegistered(location));
        }
        if let Some(b) = bus {
            if b as usize >= self.max_buses {
                return Err(Error::InvalidBus(b));
            }
        }
        if let Some(s) = slot {
            if s as usize >= self.max_slots {
                return Err(Error::InvalidSlot(s));
            }
        }

        let location = match (bus, slot) {
            (Some(b), Some(s)) => {
                let location = PciSlot::new(b, s);
                if !self.is_free(b as usize, s as usize) {
                    tracing::error!(%location, "attempted to fill pci slot already taken");
                    return Err(Error::SlotOccupied(location));
                }
                location
            }
            _ => self.find_free(bus, slot)?,
        };

        if let Some(idx) = self.index(location.bus as usize, location.slot as usize) {
            self.devices[idx] = Some(device);
        }
        tracing::debug!(%location, "registered pci device");
        Ok(location)
    }

    fn find_free(&self, bus: Option<u8>, slot: Option<u8>) -> Result<PciSlot> {
        let mut try_bus = bus.map_or(0, usize::from);
        let mut try_slot = slot.map_or(0, usize::from);

        while !self.is_free(try_bus, try_slot) {
            if slot.is_some() || try_slot + 1 >= self.max_slots {
                if slot.is_none() {
                    try_slot = 0;
                }
                try_bus += 1;
                if bus.is_some() || try_bus >= self.max_buses {
                    return Err(Error::NoSlotAvailable);
                }
            } else {
                try_slot += 1;
            }
        }

        Ok(PciSlot::new(try_bus as u8, try_slot as u8))
    }

    /// Drop the registry's reference to `device`.
    ///
    /// Returns false, leaving the table alone, if the device was never
    /// registered.
    pub fn unregister(&mut self, device: &SharedPciDevice) -> bool {
        match self.find(device) {
            Some(location) => {
                self.remove(location.bus, location.slot);
                true
            }
            None => false,
        }
    }

    /// Empty the cell at `bus`/`slot`, handing back the reference it held.
    pub fn remove(&mut self, bus: u8, slot: u8) -> Option<SharedPciDevice> {
        let idx = self.index(bus as usize, slot as usize)?;
        let device = self.devices[idx].take();
        if device.is_some() {
            tracing::debug!(location = %PciSlot::new(bus, slot), "unregistered pci device");
        }
        device
    }

    /// Tear down every registered device and empty the table.
    pub fn clear(&mut self) {
        for cell in self.devices.iter_mut() {
            if let Some(device) = cell.take() {
                device.lock().expect("failed to acquire lock").exit();
            }
        }
    }
}
