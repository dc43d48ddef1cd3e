//! Wire shapes of the Docker volume plugin protocol.
//!
//! Every endpoint takes and returns a JSON object with PascalCase fields.
//! Responses carry an `Err` string that is empty (and omitted) on success;
//! Docker treats any non-empty `Err` as operation failure. Unknown request
//! fields are ignored rather than rejected, matching how the daemon evolves
//! the protocol.

use serde::{Deserialize, Serialize};

/// Body of `Create`, `Remove`, `Path`, and `Get` requests.
#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,

    /// Driver-specific options from `docker volume create -o`. Accepted
    /// but unused; secret scoping comes from the volume name.
    #[serde(rename = "Opts", default)]
    pub opts: Option<std::collections::HashMap<String, String>>,
}

/// Body of `Mount` and `Unmount` requests; the `ID` distinguishes callers
/// sharing one volume.
#[derive(Debug, Deserialize)]
pub struct MountRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,

    /// Opaque caller identifier assigned by the daemon.
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// The universal response envelope.
#[derive(Debug, Default, Serialize)]
pub struct VolumeResponse {
    /// Mountpoint of the volume, for `Path` and `Mount`.
    #[serde(rename = "Mountpoint", skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,

    /// Error message; empty string means success.
    #[serde(rename = "Err")]
    pub err: String,

    /// Single volume record, for `Get`.
    #[serde(rename = "Volume", skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,

    /// Volume records, for `List`.
    #[serde(rename = "Volumes", skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,

    /// Driver capabilities, for `Capabilities`.
    #[serde(rename = "Capabilities", skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl VolumeResponse {
    /// A bare success.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A success carrying a mountpoint.
    pub fn with_mountpoint(mountpoint: impl Into<String>) -> Self {
        Self {
            mountpoint: Some(mountpoint.into()),
            ..Self::default()
        }
    }

    /// A failure with the given message in `Err`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
            ..Self::default()
        }
    }
}

/// One volume record inside `Get` and `List` responses.
#[derive(Debug, Serialize)]
pub struct VolumeInfo {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,

    /// Where the volume is (or would be) mounted.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

/// Capability advertisement; this driver's volumes are host-local.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Either `local` or `global`.
    #[serde(rename = "Scope")]
    pub scope: String,
}

/// Body of `/Plugin.Activate`: the driver APIs this plugin implements.
#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    /// Always `["VolumeDriver"]` here.
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

impl ActivateResponse {
    /// The volume-driver activation payload.
    pub fn volume_driver() -> Self {
        Self {
            implements: vec!["VolumeDriver".to_string()],
        }
    }
}
