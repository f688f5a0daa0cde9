use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::ConfigError;

/// One entry of `machines[]` in the server YAML config: a path to a DUT config file
/// and whether that DUT should be supervised this run.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineEntry {
    pub cfg_file: PathBuf,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server_log_file: PathBuf,
    pub server_log_store_dir: PathBuf,
    pub server_ip: String,
    pub machines: Vec<MachineEntry>,
}

impl ServerConfig {
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

    /// The `cfg_file` of every entry with `enabled: true`, in declaration order.
    pub fn enabled_machine_configs(&self) -> impl Iterator<Item = &Path> {
        self.machines
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.cfg_file.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_server_config_and_filters_enabled_machines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server_log_file: /var/log/server.log
server_log_store_dir: /var/log/duts
server_ip: 192.168.1.1
machines:
  - cfg_file: machines_cfgs/dut1.yaml
    enabled: true
  - cfg_file: machines_cfgs/dut2.yaml
    enabled: false
"#
        )
        .unwrap();

        let cfg = ServerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.server_ip, "192.168.1.1");
        let enabled: Vec<_> = cfg.enabled_machine_configs().collect();
        assert_eq!(enabled, vec![Path::new("machines_cfgs/dut1.yaml")]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ServerConfig::load(Path::new("/nonexistent/server.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
