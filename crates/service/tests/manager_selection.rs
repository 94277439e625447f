//! Selection through a configuration loaded from disk.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bollard::Docker;
use selkie_config::Config;
use selkie_service::{BackendKind, DefaultManager, Error, FindRequest, Manager};
use serde_json::json;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("selkie=debug")))
		.with_test_writer()
		.try_init();
}

fn load(dir: &TempDir) -> Result<Arc<Config>> {
	let browsers = dir.path().join("browsers.json");
	let logs = dir.path().join("container-logs.json");
	fs::write(
		&browsers,
		json!({
			"firefox": {
				"default": "68.0",
				"versions": {
					"67.0": { "image": "selenoid/firefox:67.0", "port": "4444", "path": "/wd/hub" },
					"68.0": { "image": "selenoid/firefox:68.0", "port": "4444", "path": "/wd/hub" }
				}
			},
			"firefox-local": {
				"default": "68.0",
				"versions": {
					"68.0": { "image": ["/nonexistent/geckodriver", "--log", "info"], "path": "/" }
				}
			},
			"broken": {
				"default": "1.0",
				"versions": {
					"1.0": { "image": { "repository": "selenoid/broken" } }
				}
			}
		})
		.to_string(),
	)?;
	fs::write(&logs, json!({ "Type": "json-file", "Config": { "max-size": "10m" } }).to_string())?;

	let config = Config::new();
	config.load(&browsers, Some(&logs))?;
	Ok(Arc::new(config))
}

/// Selection only needs a client handle. An http client is built without
/// contacting a daemon.
fn docker() -> Result<Option<Arc<Docker>>> {
	let client = Docker::connect_with_http("http://127.0.0.1:1", 1, bollard::API_DEFAULT_VERSION)?;
	Ok(Some(Arc::new(client)))
}

#[test]
fn image_reference_selects_container_when_docker_is_configured() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let manager = DefaultManager::new(load(&dir)?).with_client(docker()?);

	let mut version = "68.0".to_string();
	let request = FindRequest::new("firefox", 1).with_screen_resolution(Some("1920x1080x24")).with_vnc(true);
	let starter = manager.find(&request, &mut version).expect("firefox is configured");
	assert_eq!(starter.kind(), BackendKind::Container);
	assert_eq!(version, "68.0");
	Ok(())
}

#[test]
fn image_reference_without_docker_is_not_found() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let manager = DefaultManager::new(load(&dir)?);

	let mut version = "68.0".to_string();
	assert!(manager.find(&FindRequest::new("firefox", 2), &mut version).is_none());
	Ok(())
}

#[test]
fn command_line_selects_process_with_or_without_docker() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let config = load(&dir)?;

	for manager in [DefaultManager::new(config.clone()), DefaultManager::new(config).with_client(docker()?)] {
		let mut version = String::new();
		let starter = manager
			.find(&FindRequest::new("firefox-local", 3), &mut version)
			.expect("firefox-local is configured");
		assert_eq!(starter.kind(), BackendKind::Process);
		assert_eq!(version, "68.0");
	}
	Ok(())
}

#[test]
fn malformed_image_is_not_found() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let manager = DefaultManager::new(load(&dir)?).with_client(docker()?);

	let mut version = String::new();
	assert!(manager.find(&FindRequest::new("broken", 4), &mut version).is_none());
	assert_eq!(version, "1.0");
	Ok(())
}

#[test]
fn alias_version_resolves_to_matched_version() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let manager = DefaultManager::new(load(&dir)?).with_client(docker()?);

	let mut version = "67".to_string();
	assert!(manager.find(&FindRequest::new("firefox", 5), &mut version).is_some());
	assert_eq!(version, "67.0");

	let mut version = String::new();
	assert!(manager.find(&FindRequest::new("firefox", 6), &mut version).is_some());
	assert_eq!(version, "68.0");
	Ok(())
}

#[test]
fn unknown_browser_or_version_is_not_found() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let manager = DefaultManager::new(load(&dir)?).with_client(docker()?);

	let mut version = String::new();
	assert!(manager.find(&FindRequest::new("opera", 7), &mut version).is_none());
	let mut version = "70".to_string();
	assert!(manager.find(&FindRequest::new("firefox", 8), &mut version).is_none());
	Ok(())
}

#[tokio::test]
async fn failed_process_start_surfaces_the_cause() -> Result<()> {
	init_tracing();
	let dir = TempDir::new()?;
	let manager = DefaultManager::new(load(&dir)?).with_startup_timeout(Duration::from_millis(300));

	let mut version = "68".to_string();
	let starter = manager
		.find(&FindRequest::new("firefox-local", 9), &mut version)
		.expect("firefox-local is configured");
	let err = starter.start_with_cancel().await.unwrap_err();
	match err {
		Error::Spawn { command, .. } => {
			assert_eq!(&command[..3], ["/nonexistent/geckodriver", "--log", "info"]);
			assert!(command[3].starts_with("--port="));
		}
		other => panic!("unexpected error: {other:?}"),
	}
	Ok(())
}
