//! Version and integrity gate.
//!
//! Decides whether a client build may receive a handshake at all. The
//! authoritative release comes from the loader product row.

use std::cmp::Ordering;

use semver::Version;
use serde::Serialize;

use crate::errors::{GateError, GateResult};

/// The release the server considers current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderRelease {
    pub version: Version,
    pub checksum: String,
    pub download_url: Option<String>,
}

impl LoaderRelease {
    /// Build from stored product fields. An unparseable stored version is an
    /// operator error, not a client one.
    pub fn new(
        version: &str,
        checksum: impl Into<String>,
        download_url: Option<String>,
    ) -> GateResult<Self> {
        let version = parse_version(version).ok_or_else(|| {
            GateError::Internal(format!("stored loader version is not semver: {version}"))
        })?;

        Ok(Self {
            version,
            checksum: checksum.into(),
            download_url,
        })
    }
}

/// Outcome of checking a client build against the current release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateOutcome {
    InvalidVersionFormat,
    AheadOfServer,
    UpdateRequired {
        latest_version: String,
        download_url: Option<String>,
    },
    IntegrityFailure,
    Proceed,
}

impl GateOutcome {
    pub fn is_proceed(&self) -> bool {
        matches!(self, GateOutcome::Proceed)
    }
}

/// Parse a SemVer string, tolerating a leading `v` or `=`.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('='))
        .unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// SemVer precedence: build metadata does not participate.
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// Check a client's declared version and checksum.
///
/// # Example
/// ```
/// use loadergate::version_gate::{check, GateOutcome, LoaderRelease};
///
/// let release = LoaderRelease::new("1.1.0", "xyz", None).unwrap();
/// assert_eq!(check("1.1.0", "xyz", &release), GateOutcome::Proceed);
/// assert_eq!(check("1.2.0", "abc", &release), GateOutcome::AheadOfServer);
/// ```
pub fn check(client_version: &str, client_checksum: &str, release: &LoaderRelease) -> GateOutcome {
    let Some(client) = parse_version(client_version) else {
        return GateOutcome::InvalidVersionFormat;
    };

    match precedence(&client, &release.version) {
        Ordering::Greater => GateOutcome::AheadOfServer,
        Ordering::Less => GateOutcome::UpdateRequired {
            latest_version: release.version.to_string(),
            download_url: release.download_url.clone(),
        },
        Ordering::Equal if client_checksum != release.checksum => GateOutcome::IntegrityFailure,
        Ordering::Equal => GateOutcome::Proceed,
    }
}
