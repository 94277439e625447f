//! Backend selection.
//!
//! A [`Manager`] maps a requested browser to a [`Starter`] without starting
//! anything. [`DefaultManager`] picks the strategy from the descriptor image:
//! a single image reference runs in Docker, a command line runs as a local
//! driver process.

use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use selkie_config::{Config, ImageSpec};
use tracing::{debug, info, warn};

use crate::docker::{DockerStarter, Limits};
use crate::driver::DriverStarter;
use crate::starter::Starter;
use crate::wait::ReadinessProbe;

/// How long a started backend gets to answer its first probe.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Host used to reach published container ports.
pub const DEFAULT_HOST_IP: &str = "127.0.0.1";

/// A browser requested by a client.
#[derive(Debug, Clone, Copy)]
pub struct FindRequest<'a> {
	/// Browser name, e.g. `firefox`.
	pub browser: &'a str,
	/// Screen resolution passed to the container, e.g. `1920x1080x24`.
	pub screen_resolution: Option<&'a str>,
	/// Whether a VNC server should be reachable.
	pub vnc: bool,
	/// Correlation id attached to every log line of this request.
	pub request_id: u64,
}

impl<'a> FindRequest<'a> {
	pub fn new(browser: &'a str, request_id: u64) -> Self {
		Self {
			browser,
			screen_resolution: None,
			vnc: false,
			request_id,
		}
	}

	pub fn with_screen_resolution(mut self, resolution: Option<&'a str>) -> Self {
		self.screen_resolution = resolution;
		self
	}

	pub fn with_vnc(mut self, vnc: bool) -> Self {
		self.vnc = vnc;
		self
	}
}

/// Chooses the starter for a request.
pub trait Manager: Send + Sync {
	/// Returns a starter for `request`, or `None` when the browser is unknown
	/// or cannot be provisioned here.
	///
	/// An empty or partial `version` is resolved in place to the concrete
	/// configured version.
	fn find(&self, request: &FindRequest<'_>, version: &mut String) -> Option<Box<dyn Starter>>;
}

/// Selects between Docker containers and local driver processes.
pub struct DefaultManager {
	/// Address of published container ports.
	pub ip: String,
	/// Whether this process itself runs inside a container.
	pub in_docker: bool,
	pub limits: Limits,
	/// Docker client. Container images are unavailable without one.
	pub client: Option<Arc<Docker>>,
	pub config: Arc<Config>,
	pub startup_timeout: Duration,
	pub probe: ReadinessProbe,
}

impl DefaultManager {
	pub fn new(config: Arc<Config>) -> Self {
		Self {
			ip: DEFAULT_HOST_IP.to_string(),
			in_docker: false,
			limits: Limits::default(),
			client: None,
			config,
			startup_timeout: DEFAULT_STARTUP_TIMEOUT,
			probe: ReadinessProbe::default(),
		}
	}

	pub fn with_client(mut self, client: Option<Arc<Docker>>) -> Self {
		self.client = client;
		self
	}

	pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
		self.ip = ip.into();
		self
	}

	pub fn with_in_docker(mut self, in_docker: bool) -> Self {
		self.in_docker = in_docker;
		self
	}

	pub fn with_limits(mut self, limits: Limits) -> Self {
		self.limits = limits;
		self
	}

	pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
		self.startup_timeout = timeout;
		self
	}

	pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
		self.probe = probe;
		self
	}
}

impl Manager for DefaultManager {
	fn find(&self, request: &FindRequest<'_>, version: &mut String) -> Option<Box<dyn Starter>> {
		let request_id = request.request_id;
		info!(target = "selkie.service", request_id, browser = request.browser, version = %version, "locating service");

		let Some(service) = self.config.find(request.browser, version) else {
			debug!(target = "selkie.service", request_id, browser = request.browser, version = %version, "service not configured");
			return None;
		};

		match &service.image {
			ImageSpec::Container(_) => {
				let Some(client) = &self.client else {
					warn!(
						target = "selkie.service",
						request_id,
						browser = request.browser,
						version = %version,
						"docker client unavailable"
					);
					return None;
				};
				info!(target = "selkie.service", request_id, browser = request.browser, version = %version, "using docker");
				let starter: Box<dyn Starter> = Box::new(DockerStarter {
					ip: self.ip.clone(),
					in_docker: self.in_docker,
					limits: self.limits,
					client: client.clone(),
					service: service.clone(),
					log_config: self.config.container_logs(),
					screen_resolution: request.screen_resolution.map(str::to_string),
					vnc: request.vnc,
					request_id,
					startup_timeout: self.startup_timeout,
					probe: self.probe.clone(),
				});
				Some(starter)
			}
			ImageSpec::Process(_) => {
				info!(target = "selkie.service", request_id, browser = request.browser, version = %version, "using driver");
				let starter: Box<dyn Starter> = Box::new(DriverStarter {
					in_docker: self.in_docker,
					service: service.clone(),
					request_id,
					startup_timeout: self.startup_timeout,
					probe: self.probe.clone(),
				});
				Some(starter)
			}
			ImageSpec::Invalid(raw) => {
				warn!(
					target = "selkie.service",
					request_id,
					browser = request.browser,
					version = %version,
					image = %raw,
					"malformed image specification"
				);
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use selkie_config::Versions;
	use serde_json::json;

	use super::*;
	use crate::docker::detached_client;
	use crate::starter::BackendKind;

	fn config(image: serde_json::Value) -> Arc<Config> {
		let versions: Versions = serde_json::from_value(json!({
			"default": "68.0",
			"versions": { "68.0": { "image": image, "port": "4444", "path": "/wd/hub" } }
		}))
		.unwrap();
		Arc::new(Config::from_browsers(HashMap::from([("firefox".to_string(), versions)])))
	}

	fn docker() -> Option<Arc<Docker>> {
		Some(detached_client())
	}

	fn kind(manager: &DefaultManager) -> Option<BackendKind> {
		let mut version = "68.0".to_string();
		manager
			.find(&FindRequest::new("firefox", 1), &mut version)
			.map(|starter| starter.kind())
	}

	#[test]
	fn request_builder_sets_options() {
		let request = FindRequest::new("chrome", 9)
			.with_screen_resolution(Some("1280x1024x24"))
			.with_vnc(true);
		assert_eq!(request.browser, "chrome");
		assert_eq!(request.screen_resolution, Some("1280x1024x24"));
		assert!(request.vnc);
		assert_eq!(request.request_id, 9);
	}

	#[test]
	fn image_reference_needs_docker_client() {
		let cfg = config(json!("selenoid/firefox:68.0"));
		let without = DefaultManager::new(cfg.clone());
		assert_eq!(kind(&without), None);

		let with = DefaultManager::new(cfg).with_client(docker());
		assert_eq!(kind(&with), Some(BackendKind::Container));
	}

	#[test]
	fn command_line_ignores_docker_client() {
		let cfg = config(json!(["/usr/bin/geckodriver"]));
		assert_eq!(kind(&DefaultManager::new(cfg.clone())), Some(BackendKind::Process));
		assert_eq!(kind(&DefaultManager::new(cfg).with_client(docker())), Some(BackendKind::Process));
	}

	#[test]
	fn malformed_image_is_not_found() {
		for image in [json!(1), json!({"image": "x"}), json!([]), json!([1, 2])] {
			let manager = DefaultManager::new(config(image.clone())).with_client(docker());
			assert_eq!(kind(&manager), None, "image {image}");
		}
	}

	#[test]
	fn builder_overrides_defaults() {
		let manager = DefaultManager::new(config(json!("img")))
			.with_ip("192.168.0.10")
			.with_in_docker(true)
			.with_limits(Limits {
				nano_cpus: 1,
				memory: 2,
			})
			.with_startup_timeout(Duration::from_secs(5))
			.with_probe(ReadinessProbe::default().with_interval(Duration::from_millis(10)));
		assert_eq!(manager.ip, "192.168.0.10");
		assert!(manager.in_docker);
		assert_eq!(manager.limits.memory, 2);
		assert_eq!(manager.startup_timeout, Duration::from_secs(5));
		assert_eq!(manager.probe.interval(), Duration::from_millis(10));
	}
}
