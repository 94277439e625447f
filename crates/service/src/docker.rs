//! Container-backed starter.
//!
//! Creates one privileged, auto-removed container per session from the
//! descriptor image, publishes the service port (and VNC when requested) on
//! ephemeral host ports, then waits for the service to answer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
	Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::models::{ContainerInspectResponse, HostConfig, HostConfigLogConfig, PortBinding};
use selkie_config::{Browser, ImageSpec, LogConfig};
use tracing::{info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::starter::{BackendKind, CancelHandle, StartedService, Starter, backend_url};
use crate::wait::ReadinessProbe;

/// Port the service listens on when the descriptor leaves it empty.
pub const DEFAULT_SERVICE_PORT: &str = "4444";

/// Port the VNC server listens on inside browser images.
pub const VNC_PORT: &str = "5900";

/// Shared memory given to containers whose descriptor sets none (256 MiB).
pub const DEFAULT_SHM_SIZE: i64 = 268_435_456;

/// Resource limits applied to every container. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
	/// CPU quota in units of 10^-9 CPUs.
	pub nano_cpus: i64,
	/// Memory limit in bytes.
	pub memory: i64,
}

/// Starts a browser in a fresh Docker container.
pub struct DockerStarter {
	pub(crate) ip: String,
	pub(crate) in_docker: bool,
	pub(crate) limits: Limits,
	pub(crate) client: Arc<Docker>,
	pub(crate) service: Arc<Browser>,
	pub(crate) log_config: Option<LogConfig>,
	pub(crate) screen_resolution: Option<String>,
	pub(crate) vnc: bool,
	pub(crate) request_id: u64,
	pub(crate) startup_timeout: Duration,
	pub(crate) probe: ReadinessProbe,
}

impl DockerStarter {
	fn image(&self) -> Result<&str> {
		match &self.service.image {
			ImageSpec::Container(image) => Ok(image),
			_ => Err(Error::ImageMismatch {
				expected: "container image",
			}),
		}
	}

	fn service_port(&self) -> &str {
		if self.service.port.is_empty() {
			DEFAULT_SERVICE_PORT
		} else {
			&self.service.port
		}
	}

	fn env(&self) -> Vec<String> {
		let mut env = self.service.env.clone();
		if let Some(resolution) = self.screen_resolution.as_deref().filter(|s| !s.is_empty()) {
			env.push(format!("SCREEN_RESOLUTION={resolution}"));
		}
		if self.vnc {
			env.push("ENABLE_VNC=true".to_string());
		}
		env
	}

	fn exposed_ports(&self) -> Vec<String> {
		let mut ports = vec![format!("{}/tcp", self.service_port())];
		if self.vnc {
			ports.push(format!("{VNC_PORT}/tcp"));
		}
		ports
	}

	fn host_config(&self) -> HostConfig {
		let port_bindings = self
			.exposed_ports()
			.into_iter()
			.map(|port| {
				let binding = PortBinding {
					host_ip: Some("0.0.0.0".to_string()),
					host_port: None,
				};
				(port, Some(vec![binding]))
			})
			.collect();

		let service = &self.service;
		HostConfig {
			auto_remove: Some(true),
			privileged: Some(true),
			port_bindings: Some(port_bindings),
			log_config: self.log_config.as_ref().map(|logs| HostConfigLogConfig {
				typ: Some(logs.kind.clone()),
				config: Some(logs.config.clone()),
			}),
			tmpfs: (!service.tmpfs.is_empty()).then(|| service.tmpfs.clone()),
			binds: (!service.volumes.is_empty()).then(|| service.volumes.clone()),
			extra_hosts: (!service.hosts.is_empty()).then(|| service.hosts.clone()),
			sysctls: (!service.sysctl.is_empty()).then(|| service.sysctl.clone()),
			shm_size: Some(if service.shm_size > 0 { service.shm_size } else { DEFAULT_SHM_SIZE }),
			memory: (self.limits.memory > 0).then_some(self.limits.memory),
			nano_cpus: (self.limits.nano_cpus > 0).then_some(self.limits.nano_cpus),
			..Default::default()
		}
	}

	fn container_config(&self, image: &str) -> ContainerConfig<String> {
		let exposed_ports: HashMap<String, HashMap<(), ()>> =
			self.exposed_ports().into_iter().map(|port| (port, HashMap::new())).collect();

		ContainerConfig {
			hostname: Some("localhost".to_string()),
			image: Some(image.to_string()),
			env: Some(self.env()),
			exposed_ports: Some(exposed_ports),
			labels: (!self.service.labels.is_empty()).then(|| self.service.labels.clone()),
			host_config: Some(self.host_config()),
			..Default::default()
		}
	}

	/// Resolves the service and VNC addresses of a started container.
	///
	/// Inside Docker the container is reached directly on its own IP;
	/// otherwise through the published host ports on `ip`.
	fn resolve_addresses(&self, id: &str, inspect: &ContainerInspectResponse) -> Result<(String, Option<String>)> {
		let settings = inspect.network_settings.as_ref();

		if self.in_docker {
			let ip = settings
				.and_then(|s| {
					s.ip_address.clone().filter(|ip| !ip.is_empty()).or_else(|| {
						s.networks
							.as_ref()?
							.values()
							.find_map(|n| n.ip_address.clone().filter(|ip| !ip.is_empty()))
					})
				})
				.ok_or_else(|| Error::NoContainerAddress { id: id.to_string() })?;
			let vnc = self.vnc.then(|| format!("{ip}:{VNC_PORT}"));
			return Ok((format!("{ip}:{}", self.service_port()), vnc));
		}

		let ports = settings.and_then(|s| s.ports.as_ref());
		let host_port = |port: &str| -> Option<String> {
			ports?
				.get(port)?
				.as_ref()?
				.iter()
				.find_map(|binding| binding.host_port.clone().filter(|p| !p.is_empty()))
		};

		let service_port = format!("{}/tcp", self.service_port());
		let service = host_port(&service_port).ok_or(Error::NoPortBinding { port: service_port })?;
		let vnc = if self.vnc {
			host_port(&format!("{VNC_PORT}/tcp")).map(|p| format!("{}:{p}", self.ip))
		} else {
			None
		};
		Ok((format!("{}:{service}", self.ip), vnc))
	}

	async fn boot(&self, id: &str) -> Result<(Url, Option<String>)> {
		info!(target = "selkie.service", request_id = self.request_id, container = id, "starting container");
		self.client.start_container(id, None::<StartContainerOptions<String>>).await?;

		let inspect = self.client.inspect_container(id, None).await?;
		let (address, vnc) = self.resolve_addresses(id, &inspect)?;
		let url = backend_url(&address, &self.service.path)?;

		self.probe.wait_until_ready(url.as_str(), self.startup_timeout).await?;
		Ok((url, vnc))
	}
}

#[async_trait]
impl Starter for DockerStarter {
	fn kind(&self) -> BackendKind {
		BackendKind::Container
	}

	async fn start_with_cancel(&self) -> Result<StartedService> {
		let image = self.image()?;
		let started = Instant::now();
		info!(target = "selkie.service", request_id = self.request_id, image, "creating container");

		let created = self
			.client
			.create_container(None::<CreateContainerOptions<String>>, self.container_config(image))
			.await?;
		let id = created.id;

		// owns the container from here on, so dropping this future removes it
		let client = self.client.clone();
		let request_id = self.request_id;
		let container = id.clone();
		let guard = CancelHandle::new(format!("container {id}"), move || async move {
			remove_container(&client, &container, request_id).await;
		});

		match self.boot(&id).await {
			Ok((url, vnc)) => {
				info!(
					target = "selkie.service",
					request_id = self.request_id,
					container = %id,
					%url,
					elapsed = ?started.elapsed(),
					"service started"
				);
				Ok(StartedService {
					url,
					id: Some(id),
					vnc,
					cancel: guard,
				})
			}
			Err(e) => {
				warn!(target = "selkie.service", request_id = self.request_id, container = %id, error = %e, "container failed to start");
				guard.cancel().await;
				Err(e)
			}
		}
	}
}

async fn remove_container(client: &Docker, id: &str, request_id: u64) {
	info!(target = "selkie.service", request_id, container = id, "removing container");
	let options = RemoveContainerOptions {
		force: true,
		v: true,
		..Default::default()
	};
	if let Err(e) = client.remove_container(id, Some(options)).await {
		warn!(target = "selkie.service", request_id, container = id, error = %e, "failed to remove container");
	}
}

/// Client aimed at a closed local port. bollard connects lazily, so building
/// it never touches a daemon.
#[cfg(test)]
pub(crate) fn detached_client() -> Arc<Docker> {
	let client = Docker::connect_with_http("http://127.0.0.1:1", 1, bollard::API_DEFAULT_VERSION)
		.expect("http client without a daemon");
	Arc::new(client)
}
