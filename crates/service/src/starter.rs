//! The provisioning contract shared by every backend strategy.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};
use url::Url;

use crate::error::Result;

/// Provisioning strategy behind a [`Starter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
	/// A container created through the Docker API.
	Container,
	/// A driver process spawned on this host.
	Process,
}

impl fmt::Display for BackendKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackendKind::Container => f.write_str("container"),
			BackendKind::Process => f.write_str("process"),
		}
	}
}

/// Brings up one backend instance.
///
/// Starters are built fresh for each request by a [`Manager`](crate::Manager)
/// and are meant to be started once. Every call to
/// [`start_with_cancel`](Self::start_with_cancel) provisions a new instance.
#[async_trait]
pub trait Starter: Send + Sync {
	/// Strategy used by this starter.
	fn kind(&self) -> BackendKind;

	/// Provisions the backend and waits until it answers.
	///
	/// On error, everything allocated by this call has already been released.
	async fn start_with_cancel(&self) -> Result<StartedService>;
}

/// A running backend and the handle that tears it down.
#[derive(Debug)]
pub struct StartedService {
	/// Automation endpoint, e.g. `http://127.0.0.1:32768/wd/hub`.
	pub url: Url,
	/// Container id or process id.
	pub id: Option<String>,
	/// VNC `host:port`, when VNC was requested.
	pub vnc: Option<String>,
	/// Releases the backend.
	pub cancel: CancelHandle,
}

/// Builds `http://<address><path>`, adding the leading slash if missing.
pub(crate) fn backend_url(address: &str, path: &str) -> Result<Url> {
	let path = path.trim_start_matches('/');
	Ok(Url::parse(&format!("http://{address}/{path}"))?)
}

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Owning handle over the resources of one started backend.
///
/// The release action runs exactly once: on [`cancel`](Self::cancel), or
/// when the handle is dropped without being cancelled. Drop-time release is
/// spawned on the current tokio runtime.
pub struct CancelHandle {
	label: String,
	release: Option<ReleaseFn>,
}

impl CancelHandle {
	/// Wraps an async release action. `label` names the resource in logs.
	pub fn new<F, Fut>(label: impl Into<String>, release: F) -> Self
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		Self {
			label: label.into(),
			release: Some(Box::new(move || -> BoxFuture<'static, ()> { Box::pin(release()) })),
		}
	}

	/// Handle that owns nothing.
	pub fn noop() -> Self {
		Self {
			label: String::new(),
			release: None,
		}
	}

	/// Releases the backend and waits for the release to finish.
	pub async fn cancel(mut self) {
		if let Some(release) = self.release.take() {
			debug!(target = "selkie.service", resource = %self.label, "releasing backend");
			release().await;
		}
	}
}

impl Drop for CancelHandle {
	fn drop(&mut self) {
		let Some(release) = self.release.take() else {
			return;
		};
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				debug!(target = "selkie.service", resource = %self.label, "releasing dropped backend");
				handle.spawn(release());
			}
			Err(_) => {
				warn!(
					target = "selkie.service",
					resource = %self.label,
					"backend handle dropped outside a runtime; resources not released"
				);
			}
		}
	}
}

impl fmt::Debug for CancelHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CancelHandle")
			.field("label", &self.label)
			.field("armed", &self.release.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;

	fn counting(count: &Arc<AtomicUsize>) -> CancelHandle {
		let count = count.clone();
		CancelHandle::new("test", move || async move {
			count.fetch_add(1, Ordering::SeqCst);
		})
	}

	#[tokio::test]
	async fn cancel_releases_once() {
		let count = Arc::new(AtomicUsize::new(0));
		counting(&count).cancel().await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
		// drop after cancel must not release again
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn drop_releases_in_background() {
		let count = Arc::new(AtomicUsize::new(0));
		drop(counting(&count));
		for _ in 0..50 {
			if count.load(Ordering::SeqCst) == 1 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn drop_outside_runtime_skips_release() {
		let count = Arc::new(AtomicUsize::new(0));
		drop(counting(&count));
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn noop_handle_is_harmless() {
		let handle = CancelHandle::noop();
		assert!(format!("{handle:?}").contains("armed: false"));
		handle.cancel().await;
		drop(CancelHandle::noop());
	}

	#[test]
	fn backend_url_normalizes_path() {
		assert_eq!(backend_url("127.0.0.1:4444", "/wd/hub").unwrap().as_str(), "http://127.0.0.1:4444/wd/hub");
		assert_eq!(backend_url("127.0.0.1:4444", "wd/hub/").unwrap().as_str(), "http://127.0.0.1:4444/wd/hub/");
		assert_eq!(backend_url("127.0.0.1:4444", "").unwrap().as_str(), "http://127.0.0.1:4444/");
		assert!(backend_url("bad host:1", "/").is_err());
	}

	#[test]
	fn kind_display() {
		assert_eq!(BackendKind::Container.to_string(), "container");
		assert_eq!(BackendKind::Process.to_string(), "process");
	}
}
