// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host callbacks guest code can call into.
//!
//! Each installed callback owns a small stub in the BIOS segment. The stub's
//! guest address is handed to firmware, which publishes it to the guest as an
//! entry point; executing the stub traps back into the host handler.

use std::collections::btree_map::BTreeMap;
use std::result;
use vm_memory::GuestAddress;

/// Guest address of callback number 0 (F000:1000).
pub const CALLBACK_BASE: GuestAddress = GuestAddress(0xf_1000);
/// Bytes reserved for each callback stub.
pub const CALLBACK_SIZE: u64 = 32;
/// Number of callback stubs in the BIOS segment.
pub const MAX_CALLBACKS: u16 = 128;

/// What the CPU loop should do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackReturn {
    /// Resume guest execution.
    None,
    /// Leave the CPU loop.
    Stop,
}

pub type CallbackHandler = Box<dyn Fn() -> CallbackReturn + Send>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("all 128 callback stubs are in use")]
    Exhausted,
    #[error("no callback installed at {0:#x}")]
    CallbackNotFound(u64),
}

pub type Result<T> = result::Result<T, Error>;

struct Callback {
    name: String,
    handler: CallbackHandler,
}

/// Table of installed callbacks, keyed by callback number.
#[derive(Default)]
pub struct CallbackTable {
    callbacks: BTreeMap<u16, Callback>,
}

impl CallbackTable {
    pub fn new() -> Self {
        CallbackTable::default()
    }

    fn address(number: u16) -> GuestAddress {
        GuestAddress(CALLBACK_BASE.0 + u64::from(number) * CALLBACK_SIZE)
    }

    fn number(addr: GuestAddress) -> Option<u16> {
        let offset = addr.0.checked_sub(CALLBACK_BASE.0)?;
        if offset % CALLBACK_SIZE != 0 {
            return None;
        }
        u16::try_from(offset / CALLBACK_SIZE)
            .ok()
            .filter(|n| *n < MAX_CALLBACKS)
    }

    /// Install `handler` in the lowest free stub and return the stub's address.
    pub fn install(&mut self, name: &str, handler: CallbackHandler) -> Result<GuestAddress> {
        let number = (0..MAX_CALLBACKS)
            .find(|n| !self.callbacks.contains_key(n))
            .ok_or(Error::Exhausted)?;
        self.callbacks.insert(
            number,
            Callback {
                name: name.to_string(),
                handler,
            },
        );
        let addr = Self::address(number);
        tracing::debug!(callback = name, number, addr = addr.0, "installed callback");
        Ok(addr)
    }

    pub fn uninstall(&mut self, addr: GuestAddress) -> Result<()> {
        let callback = Self::number(addr)
            .and_then(|n| self.callbacks.remove(&n))
            .ok_or(Error::CallbackNotFound(addr.0))?;
        tracing::debug!(callback = callback.name.as_str(), addr = addr.0, "uninstalled callback");
        Ok(())
    }

    /// Run the callback whose stub sits at `addr`.
    pub fn call(&self, addr: GuestAddress) -> Result<CallbackReturn> {
        let callback = Self::number(addr)
            .and_then(|n| self.callbacks.get(&n))
            .ok_or(Error::CallbackNotFound(addr.0))?;
        Ok((callback.handler)())
    }

    pub fn name(&self, addr: GuestAddress) -> Option<&str> {
        Self::number(addr)
            .and_then(|n| self.callbacks.get(&n))
            .map(|cb| cb.name.as_str())
    }
}
