//! Configuration module for querygraph.
//!
//! Handles the config file, environment variables, and settings.

mod settings;

pub use settings::{
    expand_env_vars, CompilerSettings, DatabaseSettings, LoggingSettings, SchemaSettings,
    Settings, SettingsError,
};
