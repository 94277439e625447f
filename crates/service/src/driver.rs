//! Process-backed starter.
//!
//! Spawns the descriptor command line on this host with `--port=<port>`
//! appended, where `<port>` is a free localhost port picked just before
//! spawning.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use selkie_config::{Browser, ImageSpec};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::starter::{BackendKind, CancelHandle, StartedService, Starter, backend_url};
use crate::wait::ReadinessProbe;

/// Starts a browser driver as a child process.
pub struct DriverStarter {
	pub(crate) in_docker: bool,
	pub(crate) service: Arc<Browser>,
	pub(crate) request_id: u64,
	pub(crate) startup_timeout: Duration,
	pub(crate) probe: ReadinessProbe,
}

impl DriverStarter {
	fn command_line(&self) -> Result<&[String]> {
		match &self.service.image {
			ImageSpec::Process(cmd) if cmd.is_empty() => Err(Error::EmptyCommand),
			ImageSpec::Process(cmd) => Ok(cmd.as_slice()),
			_ => Err(Error::ImageMismatch { expected: "command line" }),
		}
	}

	fn spawn(&self, command: &[String]) -> Result<Child> {
		let (program, args) = command.split_first().ok_or(Error::EmptyCommand)?;

		let mut cmd = Command::new(program);
		cmd.args(args)
			.envs(parse_env(&self.service.env))
			.stdin(Stdio::null())
			.stdout(Stdio::inherit())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);

		// driver leads its own process group
		#[cfg(unix)]
		if self.in_docker {
			cmd.process_group(0);
		}

		cmd.spawn().map_err(|source| Error::Spawn {
			command: command.to_vec(),
			source,
		})
	}
}

#[async_trait]
impl Starter for DriverStarter {
	fn kind(&self) -> BackendKind {
		BackendKind::Process
	}

	async fn start_with_cancel(&self) -> Result<StartedService> {
		let mut command = self.command_line()?.to_vec();

		let port = allocate_port()?;
		info!(target = "selkie.service", request_id = self.request_id, port, "allocated port");
		command.push(format!("--port={port}"));
		let url = backend_url(&format!("127.0.0.1:{port}"), &self.service.path)?;

		info!(target = "selkie.service", request_id = self.request_id, ?command, "starting process");
		let started = Instant::now();
		let child = self.spawn(&command)?;
		let pid = child.id();

		if let Err(e) = self.probe.wait_until_ready(url.as_str(), self.startup_timeout).await {
			warn!(target = "selkie.service", request_id = self.request_id, ?pid, error = %e, "process failed to start");
			stop_process(child, self.in_docker, self.request_id).await;
			return Err(e);
		}

		info!(
			target = "selkie.service",
			request_id = self.request_id,
			?pid,
			%url,
			elapsed = ?started.elapsed(),
			"process started"
		);
		let request_id = self.request_id;
		let group = self.in_docker;
		let label = pid.map_or_else(|| "process".to_string(), |pid| format!("process {pid}"));
		let cancel = CancelHandle::new(label, move || stop_process(child, group, request_id));
		Ok(StartedService {
			url,
			id: pid.map(|pid| pid.to_string()),
			vnc: None,
			cancel,
		})
	}
}

/// Reserves a free localhost port. The listener is closed before returning,
/// so the driver can bind it.
fn allocate_port() -> Result<u16> {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(Error::PortAllocation)?;
	let addr = listener.local_addr().map_err(Error::PortAllocation)?;
	Ok(addr.port())
}

/// Splits `KEY=VALUE` entries. Entries without `=` are skipped.
fn parse_env(entries: &[String]) -> Vec<(&str, &str)> {
	entries
		.iter()
		.filter_map(|entry| {
			let pair = entry.split_once('=');
			if pair.is_none() {
				warn!(target = "selkie.service", entry = %entry, "ignoring malformed environment entry");
			}
			pair
		})
		.collect()
}

/// Kills the driver and reaps it. With `group`, the driver leads its own
/// process group and the whole group is killed, browsers included.
async fn stop_process(mut child: Child, group: bool, request_id: u64) {
	let pid = child.id();
	info!(target = "selkie.service", request_id, ?pid, group, "terminating process");
	#[cfg(unix)]
	if let Some(pgid) = pid.filter(|_| group) {
		// SAFETY: killpg has no memory effects; pgid is the pid of our unreaped child
		if unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) } != 0 {
			let e = std::io::Error::last_os_error();
			warn!(target = "selkie.service", request_id, pgid, error = %e, "failed to kill process group");
		}
	}
	#[cfg(not(unix))]
	let _ = group;
	if let Err(e) = child.kill().await {
		warn!(target = "selkie.service", request_id, ?pid, error = %e, "failed to kill process");
	}
}
