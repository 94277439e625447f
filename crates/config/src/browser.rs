//! Browser descriptors as they appear in `browsers.json`.
//!
//! ```json
//! {
//!   "firefox": {
//!     "default": "68.0",
//!     "versions": {
//!       "68.0": { "image": "selenoid/firefox:68.0", "port": "4444", "path": "/wd/hub" }
//!     }
//!   },
//!   "chrome": {
//!     "default": "local",
//!     "versions": {
//!       "local": { "image": ["/usr/bin/chromedriver"], "port": "", "path": "/" }
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a browser backend is provisioned.
///
/// The variant is fixed when the descriptor is parsed; nothing downstream
/// re-inspects the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSpec {
	/// A single container image reference, e.g. `"selenoid/firefox:68.0"`.
	Container(String),
	/// A local command line; the port flag is appended at spawn time.
	Process(Vec<String>),
	/// Any other shape. Loads fine, but can never be started.
	Invalid(Value),
}

impl ImageSpec {
	/// Human-readable strategy name used in log lines.
	pub fn kind(&self) -> &'static str {
		match self {
			ImageSpec::Container(_) => "container",
			ImageSpec::Process(_) => "process",
			ImageSpec::Invalid(_) => "invalid",
		}
	}
}

impl From<Value> for ImageSpec {
	fn from(value: Value) -> Self {
		match value {
			Value::String(image) => ImageSpec::Container(image),
			Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
				ImageSpec::Process(
					items
						.into_iter()
						.filter_map(|item| match item {
							Value::String(s) => Some(s),
							_ => None,
						})
						.collect(),
				)
			}
			other => ImageSpec::Invalid(other),
		}
	}
}

impl<'de> Deserialize<'de> for ImageSpec {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Value::deserialize(deserializer).map(ImageSpec::from)
	}
}

impl Serialize for ImageSpec {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			ImageSpec::Container(image) => serializer.serialize_str(image),
			ImageSpec::Process(cmd) => cmd.serialize(serializer),
			ImageSpec::Invalid(value) => value.serialize(serializer),
		}
	}
}

/// One configured browser version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Browser {
	pub image: ImageSpec,
	/// Service port inside the container.
	#[serde(default)]
	pub port: String,
	/// Path prefix of the automation endpoint, e.g. `/wd/hub`.
	#[serde(default)]
	pub path: String,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub tmpfs: HashMap<String, String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub volumes: Vec<String>,
	/// `KEY=VALUE` pairs.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub env: Vec<String>,
	/// Extra `/etc/hosts` entries in `host:ip` form.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub hosts: Vec<String>,
	/// Shared memory size in bytes. Zero means the runtime default.
	#[serde(default, skip_serializing_if = "is_zero")]
	pub shm_size: i64,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub labels: HashMap<String, String>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub sysctl: HashMap<String, String>,
}

fn is_zero(v: &i64) -> bool {
	*v == 0
}

impl Browser {
	/// Descriptor with only an image set.
	pub fn new(image: ImageSpec) -> Self {
		Self {
			image,
			port: String::new(),
			path: String::new(),
			tmpfs: HashMap::new(),
			volumes: Vec::new(),
			env: Vec::new(),
			hosts: Vec::new(),
			shm_size: 0,
			labels: HashMap::new(),
			sysctl: HashMap::new(),
		}
	}
}

/// All versions of one browser plus the version used when none is requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Versions {
	#[serde(default)]
	pub default: String,
	#[serde(default)]
	pub versions: BTreeMap<String, Browser>,
}

/// Docker log driver settings applied to every created container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
	#[serde(rename = "Type", default)]
	pub kind: String,
	#[serde(rename = "Config", default)]
	pub config: HashMap<String, String>,
}
