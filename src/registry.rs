//! At most one intended operation per device.
//!
//! Registering a new operation fires the previous one's signal first. Entries
//! only hold weak handles, and an operation removes its own entry on exit
//! without disturbing a newer one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::cancel::{CancelToken, WeakCancelToken};
use crate::device::{Action, Device};

/// Who asked for an operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Origin {
    Manual,
    Automatic,
}

struct Entry {
    cancel: WeakCancelToken,
    action: Action,
    origin: Origin,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<Device, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Device, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `cancel` as the live operation for `device`, firing whatever it
    /// replaces. Returns the superseded action if one was still alive.
    pub fn register(
        &self,
        device: Device,
        action: Action,
        origin: Origin,
        cancel: &CancelToken,
    ) -> Option<Action> {
        let mut entries = self.entries();
        let superseded = entries
            .remove(&device)
            .and_then(|prev| if prev.cancel.cancel() { Some(prev.action) } else { None });
        entries.insert(
            device,
            Entry {
                cancel: cancel.downgrade(),
                action,
                origin,
            },
        );
        superseded
    }

    /// Drop the entry for `device` if it still belongs to `cancel`.
    pub fn release(&self, device: Device, cancel: &CancelToken) {
        let mut entries = self.entries();
        if entries
            .get(&device)
            .map_or(false, |entry| entry.cancel.refers_to(cancel))
        {
            entries.remove(&device);
        }
    }

    /// Fire the live operation's signal. Returns whether there was one.
    pub fn cancel(&self, device: Device) -> bool {
        let entries = self.entries();
        entries
            .get(&device)
            .map_or(false, |entry| entry.cancel.cancel())
    }

    /// The action of the live operation, if any.
    pub fn intended(&self, device: Device) -> Option<Action> {
        self.current(device).map(|(action, _)| action)
    }

    /// Action and origin of the live operation, if any.
    pub fn current(&self, device: Device) -> Option<(Action, Origin)> {
        let entries = self.entries();
        entries
            .get(&device)
            .filter(|entry| entry.cancel.upgrade().map_or(false, |c| !c.is_cancelled()))
            .map(|entry| (entry.action, entry.origin))
    }

    /// Whether an uncancelled operation is registered for `device`.
    pub fn is_live(&self, device: Device) -> bool {
        self.intended(device).is_some()
    }

    /// Run `f` with the registry locked if no operation is registered for
    /// `device`. Nothing can be registered for it while `f` runs.
    pub fn while_idle<F: FnOnce()>(&self, device: Device, f: F) -> bool {
        let entries = self.entries();
        if entries.contains_key(&device) {
            return false;
        }
        f();
        true
    }

    /// Fire every registered signal.
    pub fn cancel_all(&self) {
        for entry in self.entries().values() {
            entry.cancel.cancel();
        }
    }
}

/// Releases a registry entry when an operation's thread exits.
pub struct Registration<'a> {
    pub registry: &'a Registry,
    pub device: Device,
    pub cancel: CancelToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.release(self.device, &self.cancel);
    }
}
