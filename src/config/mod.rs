pub mod dut_config;
pub mod error;
pub mod server_config;

pub use dut_config::{DutConfig, PowerSwitchModel};
pub use error::ConfigError;
pub use server_config::{MachineEntry, ServerConfig};
