//! Docker volume plugin exposing secret-store contents as volumes.
//!
//! Containers request a volume by name; mounting it materializes the
//! secrets stored under that name in the configured backend as a read-only
//! filesystem. [`driver`] holds the lifecycle state machine, [`protocol`]
//! the plugin wire shapes, and [`server`] the Unix-socket HTTP surface.

#![warn(missing_docs)]

pub mod driver;
pub mod protocol;
pub mod server;

pub use driver::{DriverError, FuseMounter, MountHandle, Mounter, SecretDriver};
