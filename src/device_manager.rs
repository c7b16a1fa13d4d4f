// Copyright © 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! System port I/O management.
//!
//! [DeviceManager](struct.DeviceManager.html) routes the guest's port I/O
//! exits to the handlers installed for each port range, and keeps the table of
//! host callbacks guest code can jump into.

use super::callback::CallbackTable;
use std::cmp::{Ord, Ordering, PartialEq, PartialOrd};
use std::collections::btree_map::BTreeMap;
use std::result;
use std::sync::{Arc, Mutex};

/// Port I/O handler.
///
/// `addr` is the absolute port number; the access width is `data.len()`.
pub trait IoOps: Send {
    fn read(&self, addr: u64, data: &mut [u8]);
    fn write(&mut self, addr: u64, data: &[u8]);
}

/// First port and length of a port range.
#[derive(Eq, Debug, Copy, Clone)]
pub struct Range(pub u64, pub u64);

impl PartialEq for Range {
    fn eq(&self, other: &Range) -> bool {
        self.0 == other.0
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Range) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Range) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Range {
    fn end(&self) -> u64 {
        self.0.saturating_add(self.1)
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.0 && addr < self.end()
    }
}

/// Error type for `DeviceManager` usage.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The insertion failed because the new range overlapped with an old one.
    #[error("port range {0:#x}+{1:#x} overlaps an installed handler")]
    Overlap(u64, u64),
    /// The insertion failed because the range is empty.
    #[error("port range at {0:#x} is empty")]
    ZeroSize(u64),
    /// The removing fails because no handler starts at that port.
    #[error("no port handler installed at {0:#x}")]
    NonExist(u64),
}

/// Simplify the `Result` type.
pub type Result<T> = result::Result<T, Error>;

/// Port I/O dispatcher serving the VM's I/O exits.
#[derive(Default)]
pub struct DeviceManager {
    /// Range mapping for VM exit pio operations.
    pio_bus: BTreeMap<Range, Arc<Mutex<dyn IoOps>>>,
    /// Host callbacks reachable from guest code.
    callbacks: CallbackTable,
}

impl DeviceManager {
    pub fn new() -> Self {
        DeviceManager::default()
    }

    fn first_before(&self, addr: u64) -> Option<(&Range, &Arc<Mutex<dyn IoOps>>)> {
        self.pio_bus.range(..=Range(addr, 0)).next_back()
    }

    fn overlaps(&self, range: Range) -> bool {
        if let Some((prev, _)) = self.first_before(range.0) {
            if prev.end() > range.0 {
                return true;
            }
        }
        self.pio_bus
            .range(Range(range.0, 0)..)
            .next()
            .map_or(false, |(next, _)| next.0 < range.end())
    }

    /// Install `dev` as the handler of ports `base..base + size`.
    pub fn register_pio(&mut self, base: u64, size: u64, dev: Arc<Mutex<dyn IoOps>>) -> Result<()> {
        if size == 0 {
            return Err(Error::ZeroSize(base));
        }
        let range = Range(base, size);
        if self.overlaps(range) {
            return Err(Error::Overlap(base, size));
        }
        self.pio_bus.insert(range, dev);
        Ok(())
    }

    /// Remove the handler whose range starts at `base`.
    pub fn unregister_pio(&mut self, base: u64) -> Result<()> {
        self.pio_bus
            .remove(&Range(base, 0))
            .map(|_| ())
            .ok_or(Error::NonExist(base))
    }

    fn pio_device(&self, addr: u64) -> Option<&Arc<Mutex<dyn IoOps>>> {
        self.first_before(addr)
            .filter(|(range, _)| range.contains(addr))
            .map(|(_, dev)| dev)
    }

    /// Dispatch a guest port read.
    ///
    /// Unclaimed ports float high; returns false in that case.
    pub fn pio_read(&self, addr: u64, data: &mut [u8]) -> bool {
        match self.pio_device(addr) {
            Some(dev) => {
                dev.lock().expect("failed to acquire lock").read(addr, data);
                true
            }
            None => {
                for d in data.iter_mut() {
                    *d = 0xff;
                }
                false
            }
        }
    }

    /// Dispatch a guest port write. Returns false if no handler claims `addr`.
    pub fn pio_write(&self, addr: u64, data: &[u8]) -> bool {
        match self.pio_device(addr) {
            Some(dev) => {
                dev.lock().expect("failed to acquire lock").write(addr, data);
                true
            }
            None => false,
        }
    }

    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackTable {
        &mut self.callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Latch {
        writes: Vec<(u64, Vec<u8>)>,
    }

    impl IoOps for Latch {
        fn read(&self, addr: u64, data: &mut [u8]) {
            for d in data.iter_mut() {
                *d = addr as u8;
            }
        }
        fn write(&mut self, addr: u64, data: &[u8]) {
            self.writes.push((addr, data.to_vec()));
        }
    }

    #[test]
    fn routes_by_range() {
        let mut mgr = DeviceManager::new();
        let latch = Arc::new(Mutex::new(Latch::default()));
        mgr.register_pio(0x60, 4, latch.clone()).unwrap();

        let mut data = [0u8; 2];
        assert!(mgr.pio_read(0x63, &mut data));
        assert_eq!(data, [0x63, 0x63]);

        assert!(mgr.pio_write(0x60, &[1, 2]));
        assert_eq!(latch.lock().unwrap().writes, vec![(0x60, vec![1, 2])]);
    }

    #[test]
    fn unclaimed_ports_float_high() {
        let mut mgr = DeviceManager::new();
        mgr.register_pio(0x60, 4, Arc::new(Mutex::new(Latch::default())))
            .unwrap();

        let mut data = [0u8; 4];
        assert!(!mgr.pio_read(0x64, &mut data));
        assert_eq!(data, [0xff; 4]);
        assert!(!mgr.pio_read(0x5f, &mut data));
        assert!(!mgr.pio_write(0x64, &[0]));
    }

    #[test]
    fn rejects_overlaps() {
        let mut mgr = DeviceManager::new();
        let dev = Arc::new(Mutex::new(Latch::default()));
        mgr.register_pio(0x60, 4, dev.clone()).unwrap();

        assert_eq!(mgr.register_pio(0x60, 1, dev.clone()), Err(Error::Overlap(0x60, 1)));
        assert_eq!(mgr.register_pio(0x5e, 4, dev.clone()), Err(Error::Overlap(0x5e, 4)));
        assert_eq!(mgr.register_pio(0x63, 2, dev.clone()), Err(Error::Overlap(0x63, 2)));
        assert_eq!(mgr.register_pio(0x70, 0, dev.clone()), Err(Error::ZeroSize(0x70)));
        assert!(mgr.register_pio(0x5c, 4, dev.clone()).is_ok());
        assert!(mgr.register_pio(0x64, 4, dev).is_ok());
    }

    #[test]
    fn unregister() {
        let mut mgr = DeviceManager::new();
        mgr.register_pio(0x60, 4, Arc::new(Mutex::new(Latch::default())))
            .unwrap();

        assert_eq!(mgr.unregister_pio(0x61), Err(Error::NonExist(0x61)));
        assert!(mgr.unregister_pio(0x60).is_ok());
        assert!(!mgr.pio_write(0x60, &[0]));
    }
}
