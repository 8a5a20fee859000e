use serde::Serialize;

use crate::syncthing_client::api::VersionResponse;

/// Version of the running daemon.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DaemonVersion {
    pub version: String,
    pub long_version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    #[serde(skip)]
    pub parsed: Option<semver::Version>,
}

impl DaemonVersion {
    pub fn from_response(response: VersionResponse) -> Self {
        let parsed = semver::Version::parse(response.version.trim_start_matches('v')).ok();
        Self {
            version: response.version,
            long_version: response.long_version,
            os: response.os,
            arch: response.arch,
            parsed,
        }
    }

    /// True when the daemon is at least `major.minor.patch`.
    pub fn at_least(&self, major: u64, minor: u64, patch: u64) -> bool {
        self.parsed
            .as_ref()
            .map(|v| (v.major, v.minor, v.patch) >= (major, minor, patch))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_version() {
        let version = DaemonVersion::from_response(VersionResponse {
            version: "v1.27.12".to_string(),
            ..VersionResponse::default()
        });
        assert!(version.at_least(1, 27, 0));
        assert!(!version.at_least(1, 28, 0));
    }

    #[test]
    fn unparseable_version_is_kept_verbatim() {
        let version = DaemonVersion::from_response(VersionResponse {
            version: "unknown-dev".to_string(),
            ..VersionResponse::default()
        });
        assert_eq!(version.version, "unknown-dev");
        assert!(version.parsed.is_none());
        assert!(!version.at_least(0, 0, 0));
    }
}
