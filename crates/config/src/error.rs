//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while reading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The file could not be read.
	#[error("read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The file is not valid JSON for the expected schema.
	#[error("parse {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}
