//! Device store contract and the JSON-file backed implementation

use crate::device::Device;
use crate::error::StoreError;
use crate::persistence;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Get/update contract for device state.
///
/// Callers never cache device state: every read and write goes through the
/// store. Updates are last-writer-wins.
pub trait DeviceStore: Send + Sync {
    /// Get a copy of the device with the given id
    fn get_by_id(&self, id: &str) -> Result<Device, StoreError>;

    /// Get copies of all devices, ordered by id
    fn get_all(&self) -> Vec<Device>;

    /// Update the mutable fields of a device and return its new state.
    ///
    /// `on` is always applied, `x`/`y` only when set. The id and name are
    /// never changed.
    fn update(&self, id: &str, device: Device) -> Result<Device, StoreError>;
}

/// Read-modify-write the power state of a single device
pub fn set_power(store: &dyn DeviceStore, id: &str, on: bool) -> Result<Device, StoreError> {
    let mut device = store.get_by_id(id)?;
    device.on = on;
    store.update(id, device)
}

/// Device store events
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device was updated (carries the new state)
    StateChanged(Device),
}

/// In-memory device store, optionally mirrored to a JSON file
pub struct JsonDeviceStore {
    /// Known devices (keyed by id)
    devices: Arc<DashMap<String, Device>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<DeviceEvent>,
    /// Latest snapshot for the background writer, if persistent
    persist_tx: Option<watch::Sender<Vec<Device>>>,
    /// Path to the device data file
    data_path: Option<PathBuf>,
}

impl JsonDeviceStore {
    /// Create a store holding the given devices, without persistence
    #[must_use]
    pub fn in_memory(devices: impl IntoIterator<Item = Device>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let map = DashMap::new();
        for device in devices {
            map.insert(device.id.clone(), device);
        }
        Self {
            devices: Arc::new(map),
            event_tx,
            persist_tx: None,
            data_path: None,
        }
    }

    /// Load devices from `path` and persist every update back to it.
    ///
    /// Must be called from within a tokio runtime: a background task writes
    /// the latest snapshot after each update.
    pub async fn open(path: &Path) -> Self {
        let loaded = persistence::load_devices(path).await;
        let mut store = Self::in_memory(loaded);

        let (persist_tx, mut persist_rx) = watch::channel(store.snapshot());
        let data_path = path.to_path_buf();
        let writer_path = data_path.clone();

        tokio::spawn(async move {
            while persist_rx.changed().await.is_ok() {
                let snapshot = persist_rx.borrow_and_update().clone();
                if let Err(e) = persistence::save_devices(&writer_path, &snapshot).await {
                    tracing::warn!("Failed to save devices: {}", e);
                }
            }
            tracing::debug!("Device writer for {:?} stopped", writer_path);
        });

        store.persist_tx = Some(persist_tx);
        store.data_path = Some(data_path);
        store
    }

    /// Subscribe to device events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Path of the backing file, if persistent
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    /// Number of known devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the store holds no devices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.iter().map(|r| r.value().clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }
}

impl DeviceStore for JsonDeviceStore {
    fn get_by_id(&self, id: &str) -> Result<Device, StoreError> {
        self.devices
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))
    }

    fn get_all(&self) -> Vec<Device> {
        self.snapshot()
    }

    fn update(&self, id: &str, device: Device) -> Result<Device, StoreError> {
        let updated = {
            let mut current = self
                .devices
                .get_mut(id)
                .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;

            let modified = current.on != device.on
                || device.x.is_some_and(|x| current.x != Some(x))
                || device.y.is_some_and(|y| current.y != Some(y));

            current.on = device.on;
            if device.x.is_some() {
                current.x = device.x;
            }
            if device.y.is_some() {
                current.y = device.y;
            }

            if modified {
                tracing::info!("Updated device {} ({}): on={}", current.id, current.name, current.on);
            }
            current.clone()
        };

        // Snapshot under the watch lock so the writer never sees an older one last
        if let Some(ref persist_tx) = self.persist_tx {
            persist_tx.send_modify(|pending| *pending = self.snapshot());
        }
        let _ = self.event_tx.send(DeviceEvent::StateChanged(updated.clone()));

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lamps() -> JsonDeviceStore {
        JsonDeviceStore::in_memory([
            Device::new("2", "upstairs").with_position(5, 6),
            Device::new("1", "downstairs"),
        ])
    }

    #[test]
    fn test_get_by_id() {
        let store = lamps();
        assert_eq!(store.get_by_id("1").unwrap().name, "downstairs");
        assert!(matches!(
            store.get_by_id("9"),
            Err(StoreError::DeviceNotFound(id)) if id == "9"
        ));
    }

    #[test]
    fn test_get_all_ordered_by_id() {
        let ids: Vec<String> = lamps().get_all().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_update_keeps_id_and_name() {
        let store = lamps();
        let mut change = Device::new("other", "renamed");
        change.on = true;

        let updated = store.update("2", change).unwrap();
        assert_eq!(updated.id, "2");
        assert_eq!(updated.name, "upstairs");
        assert!(updated.on);
        // unset coordinates leave the position alone
        assert_eq!(updated.position(), Some((5, 6)));
    }

    #[test]
    fn test_update_unknown_device() {
        let store = lamps();
        assert!(matches!(
            store.update("9", Device::new("9", "ghost")),
            Err(StoreError::DeviceNotFound(_))
        ));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_set_power() {
        let store = lamps();
        set_power(&store, "1", true).unwrap();
        assert!(store.get_by_id("1").unwrap().on);
        set_power(&store, "1", false).unwrap();
        assert!(!store.get_by_id("1").unwrap().on);
    }

    #[test]
    fn test_update_broadcasts_state() {
        let store = lamps();
        let mut rx = store.subscribe();
        set_power(&store, "2", true).unwrap();

        let DeviceEvent::StateChanged(device) = rx.try_recv().unwrap();
        assert_eq!(device.id, "2");
        assert!(device.on);
    }

    #[tokio::test]
    async fn test_open_persists_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lamps.json");
        persistence::save_devices(&path, &[Device::new("1", "downstairs")])
            .await
            .unwrap();

        let store = JsonDeviceStore::open(&path).await;
        assert_eq!(store.data_path(), Some(path.as_path()));
        set_power(&store, "1", true).unwrap();

        let mut saved = Vec::new();
        for _ in 0..100 {
            saved = persistence::load_devices(&path).await;
            if saved.first().is_some_and(|d| d.on) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saved[0].on);
    }
}
