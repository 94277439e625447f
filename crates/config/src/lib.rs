//! Browser configuration for the session broker.
//!
//! - [`Config`] holds the parsed `browsers.json` and optional container log
//!   settings, and resolves `(name, version)` requests to a [`Browser`].
//! - [`ImageSpec`] fixes the provisioning strategy of each descriptor at load
//!   time: container image, local command, or invalid.

pub mod browser;
pub mod config;
pub mod error;

pub use browser::{Browser, ImageSpec, LogConfig, Versions};
pub use config::Config;
pub use error::{ConfigError, Result};
