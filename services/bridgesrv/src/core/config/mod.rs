//! Configuration loading and validation

pub mod app;
pub mod csv_table;

pub use app::{
    AppConfig, DeviceConfig, GroupConfig, StatusConfig, StatusSetup, DEFAULT_CONFIG_PATH,
    ENV_PREFIX,
};
pub use csv_table::load_variable_table;
