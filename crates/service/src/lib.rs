//! Backend selection and readiness for browser sessions.
//!
//! Given a requested browser, a [`Manager`] decides how the backend is
//! provisioned and returns a [`Starter`]. Starting it yields a
//! [`StartedService`]: the automation endpoint plus a [`CancelHandle`] that
//! tears the backend down.
//!
//! ```text
//! FindRequest ──► Manager::find ──► Box<dyn Starter>
//!                      │                  │
//!                  Config::find     start_with_cancel
//!                                         │
//!                     DockerStarter / DriverStarter
//!                                         │
//!                                  ReadinessProbe
//!                                         │
//!                                  StartedService
//! ```
//!
//! - **Selection** ([`manager`]): image reference ⇒ Docker, command line ⇒
//!   local process, anything else ⇒ not found.
//! - **Provisioning** ([`docker`], [`driver`]): one backend per start call,
//!   cleaned up on failure.
//! - **Readiness** ([`wait`]): `HEAD` probes raced against a deadline.

pub mod docker;
pub mod driver;
pub mod error;
pub mod manager;
pub mod starter;
pub mod wait;

pub use docker::{DockerStarter, Limits};
pub use driver::DriverStarter;
pub use error::{Error, Result};
pub use manager::{DefaultManager, FindRequest, Manager};
pub use starter::{BackendKind, CancelHandle, StartedService, Starter};
pub use wait::{ReadinessProbe, wait_until_ready};
