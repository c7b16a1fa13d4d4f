// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bus geometry configuration.

use serde::{Deserialize, Serialize};
use std::result;

/// Bus numbers that fit the 8-bit bus field of a configuration address.
pub const MAX_BUS_COUNT: usize = 256;
/// Slots that fit the 5-bit device field of a configuration address.
pub const MAX_SLOT_COUNT: usize = 32;

/// Errors for an unusable `PciBusConfig`.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("bus count {0} must be between 1 and 256")]
    BusCount(usize),
    #[error("slot count {0} must be between 1 and 32")]
    SlotCount(usize),
}

pub type Result<T> = result::Result<T, Error>;

/// Dimensions of the device table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PciBusConfig {
    /// Number of buses a device can be placed on.
    pub max_buses: usize,
    /// Number of slots per bus.
    pub max_slots: usize,
}

impl Default for PciBusConfig {
    fn default() -> Self {
        PciBusConfig {
            max_buses: 255,
            max_slots: MAX_SLOT_COUNT,
        }
    }
}

impl PciBusConfig {
    pub fn new(max_buses: usize, max_slots: usize) -> Self {
        PciBusConfig {
            max_buses,
            max_slots,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_buses == 0 || self.max_buses > MAX_BUS_COUNT {
            return Err(Error::BusCount(self.max_buses));
        }
        if self.max_slots == 0 || self.max_slots > MAX_SLOT_COUNT {
            return Err(Error::SlotCount(self.max_slots));
        }
        Ok(())
    }
}
