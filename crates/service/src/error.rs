//! Error types for provisioning and readiness.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while starting a backend or waiting for it.
#[derive(Debug, Error)]
pub enum Error {
	/// Docker API call failed.
	#[error("docker: {0}")]
	Docker(#[from] bollard::errors::Error),

	/// Container started but the service port has no host binding.
	#[error("no bindings available for {port}")]
	NoPortBinding { port: String },

	/// Container has no reachable network address.
	#[error("no network address for container {id}")]
	NoContainerAddress { id: String },

	/// Process descriptor carries an empty command line.
	#[error("configuration error: image is empty")]
	EmptyCommand,

	/// Descriptor shape does not match the starter it was handed to.
	#[error("configuration error: image is not a {expected}")]
	ImageMismatch { expected: &'static str },

	/// No free local port could be reserved.
	#[error("cannot bind to port: {0}")]
	PortAllocation(#[source] std::io::Error),

	/// Process could not be spawned.
	#[error("cannot start process {command:?}: {source}")]
	Spawn {
		command: Vec<String>,
		#[source]
		source: std::io::Error,
	},

	/// Backend did not answer within the startup timeout.
	#[error("{url} does not respond in {timeout:?}")]
	NotReady { url: String, timeout: Duration },

	/// Backend address could not be formed.
	#[error("invalid backend url: {0}")]
	InvalidUrl(#[from] url::ParseError),

	#[error(transparent)]
	Config(#[from] selkie_config::ConfigError),
}

impl Error {
	/// Returns true if the backend never became reachable.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::NotReady { .. })
	}
}
