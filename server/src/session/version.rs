//! Client Version Resolution
//!
//! The engine identifies itself upstream with a three-part client version.
//! Normally the latest advertised version is used; operators may pin one.

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

static VERSION_FORMAT: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\d+\.\d+\.\d+$").expect("valid regex"));

/// `major.minor.patch` client version, serialized as a three-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVersion(pub [u32; 3]);

impl ClientVersion {
    /// Parse `x.y.z`. Anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        if !VERSION_FORMAT.is_match(s) {
            return None;
        }
        let mut parts = s.split('.').map(str::parse::<u32>);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => {
                Some(Self([major, minor, patch]))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Operator version pinning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientVersionConfig {
    /// Pinned version; `None` means "default".
    pub client_version: Option<String>,
    pub override_client_version: bool,
}

/// Pick the version a session is opened with.
///
/// The pinned version wins only when override is enabled and it is well
/// formed. Every misconfiguration falls back to `latest` with a warning.
pub fn resolve_client_version(latest: ClientVersion, config: &ClientVersionConfig) -> ClientVersion {
    match (&config.client_version, config.override_client_version) {
        (None, false) => latest,
        (None, true) => {
            warn!(
                latest = %latest,
                "OVERRIDE_CLIENT_VERSION is set but CLIENT_VERSION is unset, using latest version"
            );
            latest
        }
        (Some(pinned), true) => ClientVersion::parse(pinned).unwrap_or_else(|| {
            warn!(
                pinned = %pinned,
                latest = %latest,
                "Invalid CLIENT_VERSION format, expected x.y.z, using latest version"
            );
            latest
        }),
        (Some(pinned), false) => {
            warn!(
                pinned = %pinned,
                latest = %latest,
                "CLIENT_VERSION is set without OVERRIDE_CLIENT_VERSION, using latest version"
            );
            latest
        }
    }
}
