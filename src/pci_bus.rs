// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! PCI configuration mechanism #1.
//!
//! The guest latches a bus/device/function/register address into port 0xcf8,
//! then reads or writes configuration space through ports 0xcfc-0xcff. The low
//! two bits of the data port select the byte within the addressed dword.

use super::config::PciBusConfig;
use super::device_manager::IoOps;
use super::pci_configuration::width_mask;
use super::registry::DeviceRegistry;
use bitfield_struct::bitfield;
use byteorder::{ByteOrder, LittleEndian};

/// Configuration address port.
pub const CONFIG_ADDRESS_PORT: u64 = 0xcf8;
/// First of the four configuration data ports.
pub const CONFIG_DATA_PORT: u64 = 0xcfc;
/// The address register is only reachable as a dword at 0xcf8; 0xcf9 belongs
/// to the reset control register.
pub const CONFIG_ADDRESS_PORT_LEN: u64 = 1;
/// Number of configuration data ports.
pub const CONFIG_DATA_PORT_LEN: u64 = 4;

/// Value "no device" reads return.
pub const NOT_PRESENT: u32 = 0xffff_ffff;

/// Contents of the configuration address register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ConfigAddress {
    #[bits(2)]
    _reserved: u8,
    /// Dword index of the register.
    #[bits(6)]
    pub register: u8,
    #[bits(3)]
    pub function: u8,
    #[bits(5)]
    pub device: u8,
    pub bus: u8,
    #[bits(7)]
    _reserved2: u8,
    /// Set for a configuration access.
    pub enable: bool,
}

impl ConfigAddress {
    /// Byte offset of the access through data port `port_offset`.
    pub fn register_offset(&self, port_offset: u8) -> u8 {
        (self.register() << 2) | (port_offset & 0x3)
    }
}

/// Decoded target of a data port access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConfigTarget {
    bus: u8,
    slot: u8,
    function: u8,
    register: u8,
}

/// The configuration address latch and the devices it routes to.
pub struct PciBus {
    config_address: ConfigAddress,
    devices: DeviceRegistry,
}

impl PciBus {
    pub fn new(config: &PciBusConfig) -> Self {
        PciBus {
            config_address: ConfigAddress::new(),
            devices: DeviceRegistry::new(config),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    /// Latch a new configuration address. No device is touched.
    pub fn write_address(&mut self, value: u32) {
        tracing::trace!(value, "write pci address");
        self.config_address = ConfigAddress::from_bits(value);
    }

    pub fn read_address(&self) -> u32 {
        let value = self.config_address.into_bits();
        tracing::trace!(value, "read pci address");
        value
    }

    pub fn config_address(&self) -> ConfigAddress {
        self.config_address
    }

    /// Forget the latched address.
    pub fn reset(&mut self) {
        self.config_address = ConfigAddress::new();
    }

    fn target(&self, port_offset: u8) -> Option<ConfigTarget> {
        let addr = self.config_address;
        if !addr.enable() {
            return None;
        }
        Some(ConfigTarget {
            bus: addr.bus(),
            slot: addr.device(),
            function: addr.function(),
            register: addr.register_offset(port_offset),
        })
    }

    /// Write through data port `0xcfc + port_offset`.
    ///
    /// Dropped when the latch is disabled or nothing sits at the addressed
    /// location.
    pub fn write_data(&mut self, port_offset: u8, width: usize, value: u32) {
        let Some(target) = self.target(port_offset) else {
            return;
        };
        tracing::trace!(
            bus = target.bus,
            device = target.slot,
            function = target.function,
            register = target.register,
            width,
            value,
            "write pci config"
        );
        if let Some(dev) = self.devices.get(target.bus, target.slot) {
            dev.lock()
                .expect("failed to acquire lock")
                .config_write(target.register, width, value);
        }
    }

    /// Read through data port `0xcfc + port_offset`.
    ///
    /// Returns all ones, truncated to `width`, when the latch is disabled or
    /// nothing sits at the addressed location.
    pub fn read_data(&self, port_offset: u8, width: usize) -> u32 {
        let Some(target) = self.target(port_offset) else {
            return NOT_PRESENT & width_mask(width);
        };
        tracing::trace!(
            bus = target.bus,
            device = target.slot,
            function = target.function,
            register = target.register,
            width,
            "read pci config"
        );
        self.devices
            .get(target.bus, target.slot)
            .map_or(NOT_PRESENT & width_mask(width), |d| {
                d.lock()
                    .expect("failed to acquire lock")
                    .config_read(target.register, width)
            })
    }
}

fn valid_width(len: usize) -> bool {
    matches!(len, 1 | 2 | 4)
}

fn fill(value: u32, data: &mut [u8]) {
    match data.len() {
        1 => data[0] = value as u8,
        2 => LittleEndian::write_u16(data, value as u16),
        4 => LittleEndian::write_u32(data, value),
        _ => {
            for d in data.iter_mut() {
                *d = 0xff;
            }
        }
    }
}

fn value_of(data: &[u8]) -> u32 {
    match data.len() {
        1 => data[0] as u32,
        2 => LittleEndian::read_u16(data) as u32,
        _ => LittleEndian::read_u32(data),
    }
}

impl IoOps for PciBus {
    fn read(&self, addr: u64, data: &mut [u8]) {
        let value = match addr {
            CONFIG_ADDRESS_PORT if data.len() == 4 => self.read_address(),
            CONFIG_DATA_PORT..=0xcff if valid_width(data.len()) => {
                self.read_data((addr - CONFIG_DATA_PORT) as u8, data.len())
            }
            _ => NOT_PRESENT,
        };
        fill(value, data);
    }

    fn write(&mut self, addr: u64, data: &[u8]) {
        match addr {
            CONFIG_ADDRESS_PORT if data.len() == 4 => self.write_address(value_of(data)),
            CONFIG_DATA_PORT..=0xcff if valid_width(data.len()) => {
                self.write_data((addr - CONFIG_DATA_PORT) as u8, data.len(), value_of(data))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::Device;
    use crate::pci_configuration::{PciConfiguration, COMMAND};
    use crate::pci_device::{GenericPciDevice, PciDevice, SharedPciDevice};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn address(bus: u8, slot: u8, register: u8) -> u32 {
        0x8000_0000 | (bus as u32) << 16 | (slot as u32) << 11 | (register as u32 & 0xfc)
    }

    fn open_device() -> SharedPciDevice {
        let mut dev = GenericPciDevice::new("open", 0x1234, 0xabcd);
        for reg in (0x10..=0xfc).step_by(4) {
            dev.configuration_mut().set_writable_u32(reg as u8, 0xffff_ffff);
        }
        Arc::new(Mutex::new(dev))
    }

    fn bus_with(buses: usize, slots: usize) -> PciBus {
        PciBus::new(&PciBusConfig::new(buses, slots))
    }

    #[test]
    fn decode_address_fields() {
        let addr = ConfigAddress::from_bits(0x8012_3a5c);
        assert!(addr.enable());
        assert_eq!(addr.bus(), 0x12);
        assert_eq!(addr.device(), 0x07);
        assert_eq!(addr.function(), 0x2);
        assert_eq!(addr.register(), 0x17);
        assert_eq!(addr.register_offset(0), 0x5c);
        assert_eq!(addr.register_offset(3), 0x5f);
    }

    #[test]
    fn address_latch_is_verbatim() {
        let mut bus = bus_with(1, 32);
        bus.write_address(0x7f00_0003);
        assert_eq!(bus.read_address(), 0x7f00_0003);
        bus.write_address(0xffff_ffff);
        assert_eq!(bus.read_address(), 0xffff_ffff);
    }

    #[test]
    fn empty_and_out_of_range_read_all_ones() {
        let mut bus = bus_with(1, 4);
        bus.registry_mut().register(open_device(), Some(0), Some(0)).unwrap();

        // Disabled latch.
        bus.write_address(address(0, 0, 0) & !0x8000_0000);
        assert_eq!(bus.read_data(0, 4), 0xffff_ffff);

        for target in [address(0, 1, 0), address(0, 4, 0), address(1, 0, 0), address(0xff, 31, 0)] {
            bus.write_address(target);
            assert_eq!(bus.read_data(0, 1), 0xff);
            assert_eq!(bus.read_data(2, 2), 0xffff);
            assert_eq!(bus.read_data(0, 4), 0xffff_ffff);
            bus.write_data(0, 4, 0);
        }

        bus.write_address(address(0, 0, 0));
        assert_eq!(bus.read_data(0, 4), 0xabcd_1234);
    }

    #[test]
    fn disabled_latch_drops_writes() {
        let mut bus = bus_with(1, 4);
        bus.registry_mut().register(open_device(), Some(0), Some(0)).unwrap();

        bus.write_address(address(0, 0, 0x10) & !0x8000_0000);
        bus.write_data(0, 4, 0xdead_beef);
        bus.write_data(2, 2, 0xbeef);
        bus.write_data(3, 1, 0xad);

        bus.write_address(address(0, 0, 0x10));
        assert_eq!(bus.read_data(0, 4), 0);
    }

    #[test]
    fn writes_off_the_table_do_not_alias() {
        let mut bus = bus_with(1, 4);
        bus.registry_mut().register(open_device(), Some(0), Some(0)).unwrap();

        // Slot past the table, bus past the table, and an empty slot.
        for target in [address(0, 4, 0x10), address(1, 0, 0x10), address(0, 1, 0x10)] {
            bus.write_address(target);
            bus.write_data(0, 4, 0xdead_beef);
        }

        bus.write_address(address(0, 0, 0x10));
        assert_eq!(bus.read_data(0, 4), 0);
    }

    #[test]
    fn round_trip_through_data_ports() {
        let mut bus = bus_with(2, 32);
        bus.registry_mut().register(open_device(), Some(1), Some(9)).unwrap();

        bus.write_address(address(1, 9, 0x10));
        bus.write_data(0, 4, 0xdead_beef);
        bus.write_address(address(1, 9, 0x10));
        assert_eq!(bus.read_data(0, 4), 0xdead_beef);

        bus.write_data(2, 2, 0x1234);
        assert_eq!(bus.read_data(2, 2), 0x1234);
        assert_eq!(bus.read_data(1, 1), 0xbe);
        assert_eq!(bus.read_data(0, 4), 0x1234_beef);
    }

    #[test]
    fn writes_respect_device_mask() {
        let mut bus = bus_with(1, 32);
        bus.registry_mut().register(open_device(), None, None).unwrap();

        bus.write_address(address(0, 0, 0));
        bus.write_data(0, 4, 0);
        assert_eq!(bus.read_data(0, 4), 0xabcd_1234);

        bus.write_address(address(0, 0, COMMAND));
        bus.write_data(0, 2, 0xffff);
        assert_eq!(bus.read_data(0, 2), 0x0403);
    }

    #[test]
    fn function_number_does_not_change_routing() {
        let mut bus = bus_with(1, 32);
        bus.registry_mut().register(open_device(), Some(0), Some(3)).unwrap();
        bus.write_address(address(0, 3, 0) | 5 << 8);
        assert_eq!(bus.read_data(0, 2), 0x1234);
    }

    struct CountingDevice {
        config: PciConfiguration,
        accesses: Arc<AtomicUsize>,
    }

    impl Device for CountingDevice {
        fn name(&self) -> String {
            String::from("counting")
        }
    }

    impl PciDevice for CountingDevice {
        fn configuration(&self) -> &PciConfiguration {
            &self.config
        }
        fn configuration_mut(&mut self) -> &mut PciConfiguration {
            &mut self.config
        }
        fn config_read(&self, register: u8, width: usize) -> u32 {
            self.accesses.fetch_add(1, Ordering::SeqCst);
            self.config.read(register, width)
        }
        fn config_write(&mut self, register: u8, width: usize, value: u32) {
            self.accesses.fetch_add(1, Ordering::SeqCst);
            self.config.write(register, width, value)
        }
    }

    #[test]
    fn address_write_alone_never_reaches_device() {
        let accesses = Arc::new(AtomicUsize::new(0));
        let mut bus = bus_with(1, 32);
        let dev: SharedPciDevice = Arc::new(Mutex::new(CountingDevice {
            config: PciConfiguration::new(0x1, 0x2),
            accesses: accesses.clone(),
        }));
        bus.registry_mut().register(dev, None, None).unwrap();

        bus.write_address(address(0, 0, 0));
        bus.write_address(address(0, 0, 4));
        assert_eq!(bus.read_address(), address(0, 0, 4));
        assert_eq!(accesses.load(Ordering::SeqCst), 0);

        bus.read_data(0, 4);
        assert_eq!(accesses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn port_interface() {
        let mut bus = bus_with(1, 32);
        bus.registry_mut().register(open_device(), None, Some(2)).unwrap();

        IoOps::write(&mut bus, CONFIG_ADDRESS_PORT, &address(0, 2, 0).to_le_bytes());
        let mut data = [0u8; 4];
        IoOps::read(&bus, CONFIG_ADDRESS_PORT, &mut data);
        assert_eq!(u32::from_le_bytes(data), address(0, 2, 0));

        let mut id = [0u8; 2];
        IoOps::read(&bus, 0xcfe, &mut id);
        assert_eq!(id, [0xcd, 0xab]);

        IoOps::write(&mut bus, CONFIG_ADDRESS_PORT, &address(0, 2, 0x14).to_le_bytes());
        IoOps::write(&mut bus, 0xcfd, &[0x5a]);
        let mut byte = [0u8; 1];
        IoOps::read(&bus, 0xcfd, &mut byte);
        assert_eq!(byte, [0x5a]);
    }

    #[test]
    fn narrow_address_port_access_is_ignored() {
        let mut bus = bus_with(1, 32);
        bus.write_address(0x8000_0000);
        IoOps::write(&mut bus, CONFIG_ADDRESS_PORT, &[0x10]);
        IoOps::write(&mut bus, 0xcf9, &[0x06]);
        assert_eq!(bus.read_address(), 0x8000_0000);

        let mut data = [0u8; 2];
        IoOps::read(&bus, CONFIG_ADDRESS_PORT, &mut data);
        assert_eq!(data, [0xff, 0xff]);
    }

    #[test]
    fn odd_data_widths_float_high() {
        let mut bus = bus_with(1, 32);
        bus.registry_mut().register(open_device(), None, None).unwrap();
        bus.write_address(address(0, 0, 0));
        let mut data = [0u8; 3];
        IoOps::read(&bus, CONFIG_DATA_PORT, &mut data);
        assert_eq!(data, [0xff; 3]);
    }

    #[test]
    fn reset_clears_latch() {
        let mut bus = bus_with(1, 32);
        bus.write_address(address(0, 1, 8));
        bus.reset();
        assert_eq!(bus.read_address(), 0);
    }
}
