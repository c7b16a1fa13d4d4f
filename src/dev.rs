// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Basic device contract shared by everything attached to the VM.
use std::string::String;

/// Trait for devices with a name and a teardown hook.
pub trait Device: Send {
    /// Get the device name.
    fn name(&self) -> String;
    /// System exit and reset.
    ///
    /// Called once by the owner of the device right before it drops its
    /// reference during teardown.
    fn exit(&mut self) {}
}
