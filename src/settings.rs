use crate::devices::JoystickCalibration;
use crate::error::{BridgeError, Result};
use crate::registry::{StationIndex, StationRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info, warn};

pub const SETTINGS_VERSION: u32 = 1;

/// Persisted calibration for one station slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub index: usize,
    /// 0 when the slot was unbound at save time.
    pub hash: u32,
    pub joystick_deadzone: f32,
    pub swap_axes: bool,
    pub invert_x: bool,
    pub invert_y: bool,
}

impl StationRecord {
    pub fn calibration(&self) -> JoystickCalibration {
        JoystickCalibration {
            deadzone: self.joystick_deadzone,
            swap_axes: self.swap_axes,
            invert_x: self.invert_x,
            invert_y: self.invert_y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralSettings {
    pub version: u32,
    pub stations: Vec<StationRecord>,
}

impl PeripheralSettings {
    /// Captures every slot of `registry`.
    pub fn from_registry(registry: &StationRegistry) -> Self {
        let stations = StationIndex::all()
            .map(|index| {
                let cal = registry.calibration(index);
                StationRecord {
                    index: index.get(),
                    hash: registry.hash_for_index(index).map_or(0, |hash| hash.get()),
                    joystick_deadzone: cal.deadzone,
                    swap_axes: cal.swap_axes,
                    invert_x: cal.invert_x,
                    invert_y: cal.invert_y,
                }
            })
            .collect();

        Self {
            version: SETTINGS_VERSION,
            stations,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        if settings.version != SETTINGS_VERSION {
            return Err(BridgeError::SettingsVersion {
                found: settings.version,
                expected: SETTINGS_VERSION,
            });
        }
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Applies records to the registry, matched by index. Records with an out
    /// of range index are skipped; a nonzero hash restores the binding.
    pub fn apply(&self, registry: &mut StationRegistry) -> usize {
        let mut applied = 0;
        for record in &self.stations {
            let Some(index) = StationIndex::new(record.index) else {
                warn!(index = record.index, "Skipping settings record for unknown slot");
                continue;
            };

            registry.set_calibration(index, record.calibration());
            if record.hash != 0 {
                if let Err(e) = registry.assign(record.hash, index.get()) {
                    warn!(index = record.index, error = %e, "Could not restore station binding");
                }
            }
            applied += 1;
        }
        applied
    }
}

/// Loads settings into `registry`. Failures leave defaults in place.
pub fn load_into(path: &Path, registry: &mut StationRegistry) {
    if path.as_os_str().is_empty() {
        return;
    }

    match PeripheralSettings::read(path) {
        Ok(settings) => {
            let applied = settings.apply(registry);
            info!(path = %path.display(), applied, "Loaded peripheral settings");
        }
        Err(BridgeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No peripheral settings yet, using defaults");
        }
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "Failed to load peripheral settings, using defaults"
            );
        }
    }
}

/// Writes the current calibration table. Returns false on failure.
pub fn save_from(path: &Path, registry: &StationRegistry) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }

    match PeripheralSettings::from_registry(registry).write(path) {
        Ok(()) => {
            info!(path = %path.display(), "Saved peripheral settings");
            true
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to save peripheral settings");
            false
        }
    }
}
