//! Readiness probing for freshly started backends.
//!
//! A backend is ready as soon as it answers any HTTP request. The probe loop
//! and the deadline are raced; whichever loses is dropped before
//! [`ReadinessProbe::wait_until_ready`] returns, including a probe still in
//! flight.

use std::time::{Duration, Instant};

use reqwest::header::CONNECTION;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Pause before each probe.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound for a single probe request of the default client.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Polls a URL with `HEAD` requests until it answers.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
	client: reqwest::Client,
	interval: Duration,
}

impl Default for ReadinessProbe {
	fn default() -> Self {
		let client = reqwest::Client::builder()
			.timeout(DEFAULT_PROBE_TIMEOUT)
			.pool_max_idle_per_host(0)
			.build()
			.unwrap_or_default();
		Self::new(client)
	}
}

impl ReadinessProbe {
	/// Probe that sends its requests through `client`.
	pub fn new(client: reqwest::Client) -> Self {
		Self {
			client,
			interval: DEFAULT_PROBE_INTERVAL,
		}
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Waits until `url` answers or `timeout` elapses.
	///
	/// Any response counts, whatever its status. Connection errors and
	/// per-probe timeouts are retried silently.
	///
	/// # Errors
	///
	/// Returns [`Error::NotReady`] naming `url` and `timeout` when the
	/// deadline passes first.
	pub async fn wait_until_ready(&self, url: &str, timeout: Duration) -> Result<()> {
		let started = Instant::now();
		tokio::select! {
			() = self.poll(url) => {
				debug!(target = "selkie.service", url, elapsed = ?started.elapsed(), "backend is ready");
				Ok(())
			}
			() = tokio::time::sleep(timeout) => Err(Error::NotReady {
				url: url.to_string(),
				timeout,
			}),
		}
	}

	async fn poll(&self, url: &str) {
		loop {
			tokio::time::sleep(self.interval).await;
			if self.probe(url).await {
				return;
			}
		}
	}

	async fn probe(&self, url: &str) -> bool {
		match self.client.head(url).header(CONNECTION, "close").send().await {
			Ok(_) => true,
			Err(e) => {
				trace!(target = "selkie.service", url, error = %e, "probe failed");
				false
			}
		}
	}
}

/// [`ReadinessProbe::wait_until_ready`] with a default probe.
pub async fn wait_until_ready(url: &str, timeout: Duration) -> Result<()> {
	ReadinessProbe::default().wait_until_ready(url, timeout).await
}
