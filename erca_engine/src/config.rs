use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::linking::CaveLinkConfig;
use crate::store::StoreNames;

/// Delays, in seconds, for the machine's timed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// How long a spat pellet stays takeable before it drops.
    pub spit_cooldown_secs: f64,
    /// How long after a "taken" drop before the machine stops being busy.
    pub taken_reset_secs: f64,
    /// Walk-in time between entering a link volume and the link animation.
    pub link_delay_secs: f64,
    /// Settle time for the reverse touch animation.
    pub untouch_settle_secs: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            spit_cooldown_secs: 10.0,
            taken_reset_secs: 10.0,
            link_delay_secs: 0.6,
            untouch_settle_secs: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub timers: TimerConfig,
    pub store_names: StoreNames,
    pub cave_link: CaveLinkConfig,
}

impl MachineConfig {
    /// Loads overrides from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read machine config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse machine config: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_json_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{ "timers": {{ "spit_cooldown_secs": 4.5 }}, "store_names": {{ "chamber": "testChamber" }} }}"#
        )?;

        let config = MachineConfig::from_json_file(Some(file.path()))?;
        assert_eq!(config.timers.spit_cooldown_secs, 4.5);
        assert_eq!(config.timers.untouch_settle_secs, 0.8);
        assert_eq!(config.store_names.chamber, "testChamber");
        assert_eq!(config.store_names.machine_open, "ercaPelletMachine");
        assert_eq!(config.cave_link.spawn_point, "LinkInPointDefault");
        Ok(())
    }

    #[test]
    fn missing_path_means_defaults() -> Result<()> {
        assert_eq!(MachineConfig::from_json_file(None)?, MachineConfig::default());
        Ok(())
    }
}
