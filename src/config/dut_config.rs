use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSwitchModel {
    Default,
    Lindy,
}

fn default_disable_os_soft_reboot() -> bool {
    false
}

/// Immutable DUT identity and network coordinates, loaded once from YAML at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct DutConfig {
    pub ip: String,
    pub hostname: String,
    pub username: String,
    pub password: String,

    pub power_switch_ip: String,
    pub power_switch_port: u8,
    pub power_switch_model: PowerSwitchModel,

    #[serde(with = "humantime_secs")]
    pub boot_waiting_time: Duration,
    #[serde(with = "humantime_secs")]
    pub max_timeout_time: Duration,

    pub receive_port: u16,

    pub json_files: Vec<PathBuf>,

    #[serde(default = "default_disable_os_soft_reboot")]
    pub disable_os_soft_reboot: bool,
}

impl DutConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_reader(contents).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The source YAML encodes durations as plain seconds (matching the Python config's
/// `boot_waiting_time`/`max_timeout_time` fields), not humantime strings.
mod humantime_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
