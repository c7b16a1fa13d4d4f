// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! PCI configuration mechanism #1 for a virtual machine.
//!
//! The guest reaches device configuration spaces through the address port at
//! 0xcf8 and the data ports at 0xcfc-0xcff. [PciController] installs those
//! ports on a [DeviceManager] and takes device registrations; [PciBus] does
//! the address decoding and [DeviceRegistry] keeps the bus × slot topology.

pub mod callback;
pub mod config;
pub mod controller;
pub mod dev;
pub mod device_manager;
pub mod display_device;
pub mod pci_bus;
pub mod pci_configuration;
pub mod pci_device;
pub mod registry;

pub use config::PciBusConfig;
pub use controller::PciController;
pub use device_manager::DeviceManager;
pub use pci_bus::PciBus;
pub use pci_device::{GenericPciDevice, PciDevice, SharedPciDevice};
pub use registry::{DeviceRegistry, PciSlot};
