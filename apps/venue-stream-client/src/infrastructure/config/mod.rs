//! Configuration Module
//!
//! Configuration loading for the stream client and its binary.

mod settings;

pub use settings::{ClientConfig, ConfigError, Environment, ServerSettings, StreamSettings};
