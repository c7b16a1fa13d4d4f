// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::dev::Device;
use super::pci_configuration::PciConfiguration;
use std::sync::{Arc, Mutex};

/// A PCI device as the bus sees it.
///
/// The bus only ever talks to devices through this trait. Implementations that
/// need side effects on configuration writes override `config_write` and call
/// into their `PciConfiguration` for the masked store.
pub trait PciDevice: Device {
    /// Gets the configuration space of the Pci Device.
    fn configuration(&self) -> &PciConfiguration;
    /// Gets the configuration space of the Pci Device for modification.
    fn configuration_mut(&mut self) -> &mut PciConfiguration;

    fn vendor_id(&self) -> u16 {
        self.configuration().vendor_id()
    }

    fn device_id(&self) -> u16 {
        self.configuration().device_id()
    }

    /// Read `width` bytes of configuration space at byte `register`.
    fn config_read(&self, register: u8, width: usize) -> u32 {
        self.configuration().read(register, width)
    }

    /// Write `width` bytes of configuration space at byte `register`.
    fn config_write(&mut self, register: u8, width: usize, value: u32) {
        self.configuration_mut().write(register, width, value)
    }
}

/// Handle through which the bus and the device's owner share a device.
pub type SharedPciDevice = Arc<Mutex<dyn PciDevice>>;

/// A device that is nothing but its configuration space.
pub struct GenericPciDevice {
    name: String,
    config: PciConfiguration,
}

impl GenericPciDevice {
    pub fn new(name: &str, vendor_id: u16, device_id: u16) -> Self {
        GenericPciDevice {
            name: name.to_string(),
            config: PciConfiguration::new(vendor_id, device_id),
        }
    }
}

impl Device for GenericPciDevice {
    fn name(&self) -> String {
        self.name.clone()
    }
}

impl PciDevice for GenericPciDevice {
    fn configuration(&self) -> &PciConfiguration {
        &self.config
    }

    fn configuration_mut(&mut self) -> &mut PciConfiguration {
        &mut self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci_configuration::{COMMAND, INTERRUPT_LINE};

    #[test]
    fn generic_device_ids() {
        let dev = GenericPciDevice::new("generic", 0x8086, 0x1237);
        assert_eq!(dev.name(), "generic");
        assert_eq!(dev.vendor_id(), 0x8086);
        assert_eq!(dev.device_id(), 0x1237);
        assert_eq!(dev.config_read(0, 4), 0x1237_8086);
    }

    #[test]
    fn generic_device_masks_writes() {
        let mut dev = GenericPciDevice::new("generic", 0x8086, 0x1237);
        dev.config_write(INTERRUPT_LINE, 1, 0x0b);
        assert_eq!(dev.config_read(INTERRUPT_LINE, 1), 0);

        dev.configuration_mut().set_writable_u8(INTERRUPT_LINE, 0xff);
        dev.config_write(INTERRUPT_LINE, 1, 0x0b);
        assert_eq!(dev.config_read(INTERRUPT_LINE, 1), 0x0b);

        dev.config_write(COMMAND, 2, 0xffff);
        assert_eq!(dev.config_read(COMMAND, 2), 0x0403);
    }
}
