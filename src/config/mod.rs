// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: raw TOML model and the validated, typed config.
//! - `loader.rs`: reads a config file from disk.
//! - `validate.rs`: raw -> typed conversion (defaults, durations, bounds).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, EngineConfig, PoolConfig, RawConfigFile, ScheduleConfig, ScheduleTable,
    StorageConfig,
};
pub use validate::parse_duration;
