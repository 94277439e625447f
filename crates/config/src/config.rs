//! Loaded configuration and `(name, version)` resolution.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::browser::{Browser, LogConfig, Versions};
use crate::error::{ConfigError, Result};

struct Catalog {
	default: String,
	versions: BTreeMap<String, Arc<Browser>>,
}

impl From<Versions> for Catalog {
	fn from(v: Versions) -> Self {
		Self {
			default: v.default,
			versions: v.versions.into_iter().map(|(k, b)| (k, Arc::new(b))).collect(),
		}
	}
}

#[derive(Default)]
struct State {
	browsers: HashMap<String, Catalog>,
	container_logs: Option<LogConfig>,
	last_reload: Option<SystemTime>,
}

/// Browser catalog shared by every selection.
///
/// Reads take a shared lock; [`Config::load`] swaps the whole state at once,
/// so a reload never exposes a half-parsed catalog. Descriptors are handed
/// out as `Arc<Browser>` and stay valid across reloads.
#[derive(Default)]
pub struct Config {
	state: RwLock<State>,
}

impl Config {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a configuration from an in-memory browser map.
	pub fn from_browsers(browsers: HashMap<String, Versions>) -> Self {
		let config = Self::new();
		config.replace(browsers, None);
		config
	}

	/// Loads `browsers.json` and, optionally, the container log settings.
	///
	/// On error the previously loaded state is kept.
	pub fn load(&self, browsers: &Path, container_logs: Option<&Path>) -> Result<()> {
		let parsed: HashMap<String, Versions> = read_json(browsers)?;
		let logs = match container_logs {
			Some(path) => Some(read_json::<LogConfig>(path)?),
			None => None,
		};
		info!(
			target = "selkie.config",
			path = %browsers.display(),
			browsers = parsed.len(),
			"loaded browsers configuration"
		);
		self.replace(parsed, logs);
		Ok(())
	}

	fn replace(&self, browsers: HashMap<String, Versions>, container_logs: Option<LogConfig>) {
		let browsers = browsers.into_iter().map(|(name, v)| (name, Catalog::from(v))).collect();
		let mut state = self.state.write();
		state.browsers = browsers;
		state.container_logs = container_logs;
		state.last_reload = Some(SystemTime::now());
	}

	/// Resolves a browser descriptor.
	///
	/// An empty `version` selects the configured default. An exact version
	/// key wins; otherwise the greatest key starting with `version` is used,
	/// comparing dot-separated parts numerically where both parts are numbers
	/// (`68.10` is greater than `68.9`). The matched key is written back into
	/// `version`.
	pub fn find(&self, name: &str, version: &mut String) -> Option<Arc<Browser>> {
		let state = self.state.read();
		let catalog = state.browsers.get(name)?;

		if version.is_empty() {
			debug!(target = "selkie.config", browser = name, default = %catalog.default, "using default version");
			version.clone_from(&catalog.default);
			if version.is_empty() {
				return None;
			}
		}

		if let Some(browser) = catalog.versions.get(version.as_str()) {
			return Some(browser.clone());
		}

		let (matched, browser) = catalog
			.versions
			.iter()
			.filter(|(key, _)| key.starts_with(version.as_str()))
			.max_by(|(a, _), (b, _)| compare_versions(a, b))?;
		version.clone_from(matched);
		Some(browser.clone())
	}

	/// Log driver settings for created containers, if configured.
	pub fn container_logs(&self) -> Option<LogConfig> {
		self.state.read().container_logs.clone()
	}

	/// Time of the last successful load.
	pub fn last_reload(&self) -> Option<SystemTime> {
		self.state.read().last_reload
	}
}

fn compare_versions(a: &str, b: &str) -> Ordering {
	let mut left = a.split('.');
	let mut right = b.split('.');
	loop {
		let ord = match (left.next(), right.next()) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
				(Ok(x), Ok(y)) => x.cmp(&y),
				_ => x.cmp(y),
			},
		};
		if ord != Ordering::Equal {
			return ord;
		}
	}
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
	let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
		path: path.to_path_buf(),
		source,
	})
}
