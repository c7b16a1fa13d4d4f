// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the PCI subsystem.
//!
//! [PciController](struct.PciController.html) owns the configuration
//! mechanism, installs its port handlers and protected-mode entry point on the
//! VM's [DeviceManager](../device_manager/struct.DeviceManager.html), and is
//! the registration point for PCI devices.

use super::callback::{self, CallbackReturn};
use super::config::{self, PciBusConfig};
use super::device_manager::{self, DeviceManager};
use super::pci_bus::{
    PciBus, CONFIG_ADDRESS_PORT, CONFIG_ADDRESS_PORT_LEN, CONFIG_DATA_PORT, CONFIG_DATA_PORT_LEN,
};
use super::pci_device::SharedPciDevice;
use super::registry::{self, PciSlot};
use std::result;
use std::sync::{Arc, Mutex};
use vm_memory::GuestAddress;

/// Errors for the PCI subsystem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid pci bus configuration")]
    Config(#[from] config::Error),
    #[error("failed to install pci port handlers")]
    PortIo(#[from] device_manager::Error),
    #[error("failed to install pci protected mode entry")]
    Callback(#[from] callback::Error),
    #[error("failed to register pci device")]
    Registry(#[from] registry::Error),
}

pub type Result<T> = result::Result<T, Error>;

fn pm_entry() -> CallbackReturn {
    tracing::debug!("pci protected mode entry");
    CallbackReturn::None
}

/// Owner of the PCI configuration mechanism.
pub struct PciController {
    io: Arc<Mutex<DeviceManager>>,
    bus: Arc<Mutex<PciBus>>,
    pm_entry: Option<GuestAddress>,
    initialized: bool,
}

impl PciController {
    /// Create the controller. Nothing is installed on `io` until
    /// [`initialize`](#method.initialize) or the first device registration.
    pub fn new(config: PciBusConfig, io: Arc<Mutex<DeviceManager>>) -> Result<Self> {
        config.validate()?;
        Ok(PciController {
            io,
            bus: Arc::new(Mutex::new(PciBus::new(&config))),
            pm_entry: None,
            initialized: false,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Guest address of the protected-mode entry point, once initialized.
    pub fn pm_entry_address(&self) -> Option<GuestAddress> {
        self.pm_entry
    }

    pub fn bus(&self) -> Arc<Mutex<PciBus>> {
        self.bus.clone()
    }

    /// Install the port handlers and the protected-mode entry point.
    ///
    /// Does nothing when already initialized.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let mut io = self.io.lock().expect("failed to acquire lock");
        io.register_pio(CONFIG_ADDRESS_PORT, CONFIG_ADDRESS_PORT_LEN, self.bus.clone())?;
        if let Err(e) = io.register_pio(CONFIG_DATA_PORT, CONFIG_DATA_PORT_LEN, self.bus.clone()) {
            let _ = io.unregister_pio(CONFIG_ADDRESS_PORT);
            return Err(e.into());
        }
        let entry = match io.callbacks_mut().install("PCI PM", Box::new(pm_entry)) {
            Ok(entry) => entry,
            Err(e) => {
                let _ = io.unregister_pio(CONFIG_ADDRESS_PORT);
                let _ = io.unregister_pio(CONFIG_DATA_PORT);
                return Err(e.into());
            }
        };

        self.pm_entry = Some(entry);
        self.initialized = true;
        tracing::info!(pm_entry = entry.0, "pci bus initialized");
        Ok(())
    }

    /// Remove the port handlers, destroy every registered device and forget
    /// the latched address.
    pub fn shutdown(&mut self) {
        if self.initialized {
            let mut io = self.io.lock().expect("failed to acquire lock");
            for port in [CONFIG_ADDRESS_PORT, CONFIG_DATA_PORT] {
                if let Err(e) = io.unregister_pio(port) {
                    tracing::warn!(error = &e as &dyn std::error::Error, port, "failed to remove pci port handler");
                }
            }
            if let Some(entry) = self.pm_entry.take() {
                if let Err(e) = io.callbacks_mut().uninstall(entry) {
                    tracing::warn!(error = &e as &dyn std::error::Error, "failed to remove pci protected mode entry");
                }
            }
        }

        let mut bus = self.bus.lock().expect("failed to acquire lock");
        bus.reset();
        bus.registry_mut().clear();
        self.initialized = false;
        tracing::info!("pci bus shut down");
    }

    /// Attach `device` to the bus, initializing the subsystem first if needed.
    ///
    /// See [`DeviceRegistry::register`](../registry/struct.DeviceRegistry.html#method.register)
    /// for how `bus` and `slot` are resolved.
    pub fn register_device(
        &mut self,
        device: SharedPciDevice,
        bus: Option<u8>,
        slot: Option<u8>,
    ) -> Result<PciSlot> {
        self.initialize()?;
        let name = device.lock().expect("failed to acquire lock").name();
        let location = self
            .bus
            .lock()
            .expect("failed to acquire lock")
            .registry_mut()
            .register(device, bus, slot)
            .map_err(|e| {
                tracing::warn!(device = name.as_str(), error = &e as &dyn std::error::Error, "pci device not registered");
                e
            })?;
        tracing::debug!(device = name.as_str(), %location, "pci device attached");
        Ok(location)
    }

    /// Whether `device` is currently attached to the bus.
    pub fn is_registered(&self, device: &SharedPciDevice) -> bool {
        self.bus
            .lock()
            .expect("failed to acquire lock")
            .registry()
            .find(device)
            .is_some()
    }

    /// Detach `device`. The caller's handle becomes the device's only owner.
    pub fn unregister_device(&mut self, device: &SharedPciDevice) -> bool {
        self.bus
            .lock()
            .expect("failed to acquire lock")
            .registry_mut()
            .unregister(device)
    }
}

impl Drop for PciController {
    fn drop(&mut self) {
        if self.initialized {
            self.shutdown();
        }
    }
}
