use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use json::JsonValue;

use crate::device::{Device, Status};
use crate::error::StoreError;

/// Persisted per-device status. Rows for different devices are independent.
pub trait StatusStore: Send + Sync {
    fn get_status(&self, device: Device) -> Result<Status, StoreError>;
    fn set_status(&self, device: Device, status: Status) -> Result<(), StoreError>;
}

pub struct MemoryStore {
    statuses: Mutex<[Status; 2]>,
}

impl MemoryStore {
    pub fn new(initial: Status) -> Self {
        MemoryStore {
            statuses: Mutex::new([initial; 2]),
        }
    }
}

impl StatusStore for MemoryStore {
    fn get_status(&self, device: Device) -> Result<Status, StoreError> {
        let statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        Ok(statuses[device.index()])
    }

    fn set_status(&self, device: Device, status: Status) -> Result<(), StoreError> {
        let mut statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        statuses[device.index()] = status;
        Ok(())
    }
}

/// Statuses kept in a small JSON document: `{"Shutter": "open", ...}`.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open the document at `path`, creating it with every device in
    /// automatic mode if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileStore, StoreError> {
        let store = FileStore {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        };
        if !store.path.exists() {
            let mut doc = JsonValue::new_object();
            for device in Device::ALL {
                doc[device.key()] = Status::Automatic.as_str().into();
            }
            store.write(&doc)?;
        }
        Ok(store)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<JsonValue, StoreError> {
        let contents = fs::read_to_string(&self.path)?;
        json::parse(&contents).map_err(|err| StoreError::Corrupt(err.to_string()))
    }

    fn write(&self, doc: &JsonValue) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json::stringify_pretty(doc.clone(), 2))?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StatusStore for FileStore {
    fn get_status(&self, device: Device) -> Result<Status, StoreError> {
        let _guard = self.guard();
        let doc = self.read()?;
        let value = doc[device.key()]
            .as_str()
            .ok_or(StoreError::Missing(device.key()))?;
        value
            .parse()
            .map_err(|err: crate::error::ConfigError| StoreError::Corrupt(err.to_string()))
    }

    fn set_status(&self, device: Device, status: Status) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut doc = self.read().unwrap_or_else(|err| {
            log::warn!("rewriting status document: {}", err);
            JsonValue::new_object()
        });
        doc[device.key()] = status.as_str().into();
        self.write(&doc)
    }
}

#[derive(Copy, Clone)]
struct Known {
    status: Status,
    since: Instant,
}

/// Write-through view over a [`StatusStore`] that remembers the last status
/// seen for each device. Store failures are logged and the remembered status
/// is used instead.
pub struct StatusBoard {
    store: Box<dyn StatusStore>,
    known: Mutex<[Option<Known>; 2]>,
}

impl StatusBoard {
    pub fn new(store: Box<dyn StatusStore>) -> Self {
        StatusBoard {
            store,
            known: Mutex::new([None; 2]),
        }
    }

    fn known(&self) -> MutexGuard<'_, [Option<Known>; 2]> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, device: Device, status: Status) {
        let mut known = self.known();
        let slot = &mut known[device.index()];
        if !matches!(*slot, Some(k) if k.status == status) {
            *slot = Some(Known {
                status,
                since: Instant::now(),
            });
        }
    }

    pub fn get(&self, device: Device) -> Status {
        match self.store.get_status(device) {
            Ok(status) => {
                self.remember(device, status);
                status
            }
            Err(err) => {
                let fallback = self.known()[device.index()].map(|k| k.status);
                log::error!("could not retrieve status for {}: {}", device, err);
                // Nothing known yet: assume a pulse may be in flight.
                fallback.unwrap_or(Status::Live)
            }
        }
    }

    /// Best effort: a failed write is logged and remembered in memory.
    pub fn set(&self, device: Device, status: Status) {
        self.remember(device, status);
        match self.store.set_status(device, status) {
            Ok(()) => log::debug!("{} status updated to {}", device, status),
            Err(err) => log::error!("status update failed for {}: {}", device, err),
        }
    }

    /// When the current status was first observed by this process.
    pub fn since(&self, device: Device) -> Option<Instant> {
        self.known()[device.index()].map(|k| k.since)
    }
}
