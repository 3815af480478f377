//! Mapping of configured mounts onto each runtime's mount representation.

use boxexec_common::types::Mount;
use serde::{Deserialize, Serialize};

/// Mount entry of an OCI runtime spec, as used by containerd.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMount {
    /// Path inside the container.
    pub destination: String,
    /// Mount type.
    #[serde(rename = "type", default)]
    pub mount_type: String,
    /// Host path.
    #[serde(default)]
    pub source: String,
    /// Mount options, passed through verbatim.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Host mount as understood by the docker engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMount {
    /// Mount type.
    pub mount_type: String,
    /// Host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// Maps a configured mount onto an OCI mount, keeping its options.
#[must_use]
pub fn to_oci_mount(mount: &Mount) -> OciMount {
    OciMount {
        destination: mount.destination.clone(),
        mount_type: mount.mount_type.clone(),
        source: mount.source.clone(),
        options: mount.options.clone(),
    }
}

/// Maps a configured mount onto a docker host mount.
///
/// Docker has no free-form options; only the literal `ro` option survives,
/// as the read-only flag.
#[must_use]
pub fn to_host_mount(mount: &Mount) -> HostMount {
    HostMount {
        mount_type: mount.mount_type.clone(),
        source: mount.source.clone(),
        target: mount.destination.clone(),
        read_only: mount.is_read_only(),
    }
}
