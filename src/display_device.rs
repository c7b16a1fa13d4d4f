// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Display adapters that sit on the PCI bus.

use super::controller::{PciController, Result};
use super::dev::Device;
use super::pci_configuration::*;
use super::pci_device::{PciDevice, SharedPciDevice};
use std::sync::{Arc, Mutex};

pub const S3_VENDOR_ID: u16 = 0x5333;
pub const S3_TRIO64_DEVICE_ID: u16 = 0x8811;
/// Linear frame buffer base of the S3 adapter.
pub const S3_LFB_BASE: u32 = 0xc000_0000;
// 32 MiB decode
const S3_LFB_WRITABLE_BITS: u32 = 0xfe00_0000;

pub const SST_VENDOR_ID: u16 = 0x121a;
pub const SST_BASE: u32 = 0xd000_0000;
// 16 MiB decode
const SST_WRITABLE_BITS: u32 = 0xff00_0000;
/// initEnable register of the SST chip.
pub const SST_INIT_ENABLE: u8 = 0x40;

const INTA: u8 = 1;

/// S3 Trio64 VGA adapter.
pub struct S3VgaDevice {
    config: PciConfiguration,
}

impl S3VgaDevice {
    pub fn new() -> Self {
        let mut config = PciConfiguration::new(S3_VENDOR_ID, S3_TRIO64_DEVICE_ID);
        // VGA-compatible display controller
        config.set_u8(CLASS_CODE + 2, 0x03);
        config.set_u32(BAR0, S3_LFB_BASE);
        config.set_writable_u32(BAR0, S3_LFB_WRITABLE_BITS);
        config.set_u8(INTERRUPT_PIN, INTA);
        config.set_writable_u8(INTERRUPT_LINE, 0xff);
        S3VgaDevice { config }
    }
}

impl Default for S3VgaDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for S3VgaDevice {
    fn name(&self) -> String {
        String::from("S3 Trio64")
    }
}

impl PciDevice for S3VgaDevice {
    fn configuration(&self) -> &PciConfiguration {
        &self.config
    }

    fn configuration_mut(&mut self) -> &mut PciConfiguration {
        &mut self.config
    }
}

/// Board variants of the 3dfx SST accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SstBoard {
    Voodoo1,
    Voodoo2,
}

impl SstBoard {
    /// Board for a numeric board type; unknown types fall back to a Voodoo1.
    pub fn from_type(board_type: u32) -> Self {
        match board_type {
            1 => SstBoard::Voodoo1,
            2 => SstBoard::Voodoo2,
            other => {
                tracing::warn!(board_type = other, "invalid sst board type, using voodoo1");
                SstBoard::Voodoo1
            }
        }
    }

    pub fn device_id(&self) -> u16 {
        match self {
            SstBoard::Voodoo1 => 0x0001,
            SstBoard::Voodoo2 => 0x0002,
        }
    }
}

/// 3dfx SST (Voodoo) 3D accelerator.
pub struct SstDevice {
    board: SstBoard,
    config: PciConfiguration,
}

impl SstDevice {
    pub fn new(board: SstBoard) -> Self {
        let mut config = PciConfiguration::new(SST_VENDOR_ID, board.device_id());
        // multimedia video device
        config.set_u8(CLASS_CODE + 2, 0x04);
        config.set_u32(BAR0, SST_BASE);
        config.set_writable_u32(BAR0, SST_WRITABLE_BITS);
        config.set_u8(INTERRUPT_PIN, INTA);
        config.set_writable_u8(INTERRUPT_LINE, 0xff);
        config.set_writable_u32(SST_INIT_ENABLE, 0xffff_ffff);
        SstDevice { board, config }
    }

    pub fn board(&self) -> SstBoard {
        self.board
    }

    pub fn init_enable(&self) -> u32 {
        self.config.read(SST_INIT_ENABLE, 4)
    }
}

impl Device for SstDevice {
    fn name(&self) -> String {
        format!("3dfx {:?}", self.board)
    }
}

impl PciDevice for SstDevice {
    fn configuration(&self) -> &PciConfiguration {
        &self.config
    }

    fn configuration_mut(&mut self) -> &mut PciConfiguration {
        &mut self.config
    }

    fn config_write(&mut self, register: u8, width: usize, value: u32) {
        self.config.write(register, width, value);
        let end = register as usize + width;
        if (register as usize) < SST_INIT_ENABLE as usize + 4 && end > SST_INIT_ENABLE as usize {
            tracing::debug!(init_enable = self.init_enable(), "sst init enable");
        }
    }
}

/// Keeps at most one of each display adapter on the bus.
#[derive(Default)]
pub struct DisplayAdapters {
    s3: Option<SharedPciDevice>,
    sst: Option<SharedPciDevice>,
}

impl DisplayAdapters {
    pub fn new() -> Self {
        DisplayAdapters::default()
    }

    pub fn s3(&self) -> Option<&SharedPciDevice> {
        self.s3.as_ref()
    }

    pub fn sst(&self) -> Option<&SharedPciDevice> {
        self.sst.as_ref()
    }

    /// Put an S3 adapter on the bus unless one is already there.
    ///
    /// A handle left over from a bus that has since been shut down is
    /// replaced by a fresh adapter.
    pub fn add_svga_s3(&mut self, pci: &mut PciController) -> Result<()> {
        if attached(&mut self.s3, pci) {
            return Ok(());
        }
        let dev: SharedPciDevice = Arc::new(Mutex::new(S3VgaDevice::new()));
        pci.register_device(dev.clone(), None, None)?;
        self.s3 = Some(dev);
        Ok(())
    }

    pub fn remove_svga_s3(&mut self, pci: &mut PciController) {
        if let Some(dev) = self.s3.take() {
            pci.unregister_device(&dev);
        }
    }

    /// Put an SST accelerator of `board_type` on the bus unless one is already
    /// there.
    pub fn add_sst(&mut self, pci: &mut PciController, board_type: u32) -> Result<()> {
        if attached(&mut self.sst, pci) {
            return Ok(());
        }
        let board = SstBoard::from_type(board_type);
        let dev: SharedPciDevice = Arc::new(Mutex::new(SstDevice::new(board)));
        pci.register_device(dev.clone(), None, None)?;
        self.sst = Some(dev);
        Ok(())
    }

    pub fn remove_sst(&mut self, pci: &mut PciController) {
        if let Some(dev) = self.sst.take() {
            pci.unregister_device(&dev);
        }
    }
}

/// Whether `slot` holds a device that is still on the bus. A handle whose
/// device was torn down behind our back is dropped.
fn attached(slot: &mut Option<SharedPciDevice>, pci: &PciController) -> bool {
    let live = slot.as_ref().map_or(false, |dev| pci.is_registered(dev));
    if !live && slot.take().is_some() {
        tracing::debug!("dropping detached display adapter handle");
    }
    live
}
