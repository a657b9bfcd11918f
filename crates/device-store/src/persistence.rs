//! Reading and writing the `lamps.json` device file

use crate::device::Device;
use crate::error::StoreError;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// Read the device file; `None` when it does not exist
pub async fn read_devices(path: &Path) -> Result<Option<Vec<Device>>, StoreError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Load devices for startup.
///
/// A missing or unreadable file yields no devices. Later entries that
/// repeat an id are dropped.
pub async fn load_devices(path: &Path) -> Vec<Device> {
    let devices = match read_devices(path).await {
        Ok(Some(devices)) => devices,
        Ok(None) => {
            tracing::debug!("No device file at {:?}, starting empty", path);
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Ignoring device file {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|device| {
            let fresh = seen.insert(device.id.clone());
            if !fresh {
                tracing::warn!("Duplicate device id {} in {:?}", device.id, path);
            }
            fresh
        })
        .collect()
}

/// Replace the device file with `devices` (temp file, then rename)
pub async fn save_devices(path: &Path, devices: &[Device]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serde_json::to_vec_pretty(devices)?).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Wrote {} devices to {:?}", devices.len(), path);
    Ok(())
}
