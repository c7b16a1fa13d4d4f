// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration space of a single PCI function.

use byteorder::{ByteOrder, LittleEndian};

/// Size of the configuration space in bytes.
pub const CONFIG_SPACE_SIZE: usize = 256;

pub const VENDOR_ID: u8 = 0x00;
pub const DEVICE_ID: u8 = 0x02;
pub const COMMAND: u8 = 0x04;
pub const STATUS: u8 = 0x06;
pub const REVISION_ID: u8 = 0x08;
pub const CLASS_CODE: u8 = 0x09;
pub const HEADER_TYPE: u8 = 0x0e;
pub const BAR0: u8 = 0x10;
pub const SUBSYSTEM_VENDOR_ID: u8 = 0x2c;
pub const SUBSYSTEM_ID: u8 = 0x2e;
pub const INTERRUPT_LINE: u8 = 0x3c;
pub const INTERRUPT_PIN: u8 = 0x3d;

/// Command register bits a guest may flip on any device: I/O space enable,
/// memory space enable and interrupt disable.
pub const COMMAND_WRITABLE_BITS: u16 = 0x0403;

/// Contains the configuration space of a PCI node.
/// See the [specification](https://en.wikipedia.org/wiki/PCI_configuration_space).
///
/// Every register byte has a parallel byte of writable bits. Guest writes only
/// reach the bits set there; everything else keeps the value the device put in
/// it with the `set_*` helpers.
#[derive(Clone)]
pub struct PciConfiguration {
    registers: [u8; CONFIG_SPACE_SIZE],
    writable_bits: [u8; CONFIG_SPACE_SIZE],
}

impl PciConfiguration {
    /// Create a zeroed, read-only configuration space carrying the given IDs.
    ///
    /// Only the command register bits in `COMMAND_WRITABLE_BITS` start out
    /// writable.
    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        let mut config = PciConfiguration {
            registers: [0; CONFIG_SPACE_SIZE],
            writable_bits: [0; CONFIG_SPACE_SIZE],
        };
        config.set_u16(VENDOR_ID, vendor_id);
        config.set_u16(DEVICE_ID, device_id);
        config.set_writable_u16(COMMAND, COMMAND_WRITABLE_BITS);
        config
    }

    pub fn vendor_id(&self) -> u16 {
        self.read(VENDOR_ID, 2) as u16
    }

    pub fn device_id(&self) -> u16 {
        self.read(DEVICE_ID, 2) as u16
    }

    pub fn command(&self) -> u16 {
        self.read(COMMAND, 2) as u16
    }

    /// Read `width` bytes starting at `register`, little-endian.
    ///
    /// Bytes past the end of the space read as 0xff. Widths above 4 are
    /// clamped to a dword.
    pub fn read(&self, register: u8, width: usize) -> u32 {
        let mut bytes = [0xffu8; 4];
        let start = register as usize;
        let width = width.min(4);
        for (i, byte) in bytes.iter_mut().enumerate().take(width) {
            if let Some(value) = self.registers.get(start + i) {
                *byte = *value;
            }
        }
        LittleEndian::read_u32(&bytes) & width_mask(width)
    }

    /// Guest write of the low `width` bytes of `value` starting at `register`.
    ///
    /// Each byte lands as `(old & !mask) | (new & mask)`. Bytes past the end of
    /// the space are dropped.
    pub fn write(&mut self, register: u8, width: usize, value: u32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        let start = register as usize;
        for (i, new) in bytes.iter().enumerate().take(width.min(4)) {
            let idx = start + i;
            if idx >= CONFIG_SPACE_SIZE {
                break;
            }
            let mask = self.writable_bits[idx];
            self.registers[idx] = (self.registers[idx] & !mask) | (new & mask);
        }
    }

    pub fn set_u8(&mut self, offset: u8, value: u8) {
        store(&mut self.registers, offset, &[value]);
    }

    pub fn set_u16(&mut self, offset: u8, value: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        store(&mut self.registers, offset, &buf);
    }

    pub fn set_u32(&mut self, offset: u8, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        store(&mut self.registers, offset, &buf);
    }

    pub fn set_writable_u8(&mut self, offset: u8, mask: u8) {
        store(&mut self.writable_bits, offset, &[mask]);
    }

    pub fn set_writable_u16(&mut self, offset: u8, mask: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, mask);
        store(&mut self.writable_bits, offset, &buf);
    }

    pub fn set_writable_u32(&mut self, offset: u8, mask: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, mask);
        store(&mut self.writable_bits, offset, &buf);
    }

    /// Writable bits of the byte at `offset`.
    pub fn writable_bits(&self, offset: u8) -> u8 {
        self.writable_bits[offset as usize]
    }
}

/// All-ones value of an access `width` bytes wide.
pub fn width_mask(width: usize) -> u32 {
    match width {
        0 => 0,
        1 => 0xff,
        2 => 0xffff,
        3 => 0x00ff_ffff,
        _ => 0xffff_ffff,
    }
}

fn store(space: &mut [u8; CONFIG_SPACE_SIZE], offset: u8, data: &[u8]) {
    let start = offset as usize;
    let end = (start + data.len()).min(CONFIG_SPACE_SIZE);
    space[start..end].copy_from_slice(&data[..end - start]);
}
