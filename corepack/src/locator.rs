// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `repository/name:version` triples (spec §3, §4.1).

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;

/// Sentinel version string resolved by the store to the highest semver
/// present for `(repository, name)` (§3).
pub const LATEST: &str = "latest";

/// `name` must match this shape: letters, digits, underscore, dash.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Version strings (outside of the `latest` sentinel) must only carry
/// characters semver itself allows in pre-release/build metadata, rejecting
/// shell-injection-shaped values like `;echo` or `$(...)` before they ever
/// reach a semver parser or a filesystem path.
fn is_safe_version_charset(version: &str) -> bool {
    version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '+')
}

/// A concrete or "latest" version for a [`Locator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocatorVersion {
    Latest,
    Concrete(Version),
}

impl fmt::Display for LocatorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorVersion::Latest => write!(f, "{LATEST}"),
            LocatorVersion::Concrete(v) => write!(f, "{v}"),
        }
    }
}

/// Triple `(repository, name, version)` uniquely identifying a package.
/// Two locators are equal iff all three fields match bytewise (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub repository: String,
    pub name: String,
    #[serde(with = "version_serde")]
    pub version: LocatorVersion,
}

mod version_serde {
    use super::LocatorVersion;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(v: &LocatorVersion, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<LocatorVersion, D::Error> {
        let s = String::deserialize(d)?;
        if s == super::LATEST {
            Ok(LocatorVersion::Latest)
        } else {
            semver::Version::from_str(&s)
                .map(LocatorVersion::Concrete)
                .map_err(D::Error::custom)
        }
    }
}

impl Locator {
    pub fn new(repository: impl Into<String>, name: impl Into<String>, version: LocatorVersion) -> Result<Self, Error> {
        let repository = repository.into();
        let name = name.into();

        if repository.is_empty() {
            return Err(Error::Malformed("empty repository".into()));
        }
        if !is_valid_name(&name) {
            return Err(Error::Malformed(format!("invalid name: {name}")));
        }

        Ok(Self { repository, name, version })
    }

    /// `true` when this locator carries the `latest` sentinel version.
    pub fn is_latest(&self) -> bool {
        matches!(self.version, LocatorVersion::Latest)
    }

    /// Given a "latest" sentinel, returns the highest-semver concrete
    /// locator among `candidates` for this `(repository, name)`; otherwise
    /// echoes `self`. Resolution is non-destructive: `self` is never
    /// mutated, a new [`Locator`] is returned (§4.1).
    pub fn resolve_metadata(&self, candidates: &[Locator]) -> Result<Locator, CoreError> {
        if !self.is_latest() {
            return Ok(self.clone());
        }

        candidates
            .iter()
            .filter(|c| c.repository == self.repository && c.name == self.name)
            .filter_map(|c| match &c.version {
                LocatorVersion::Concrete(v) => Some((c, v)),
                LocatorVersion::Latest => None,
            })
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(c, _)| c.clone())
            .ok_or(CoreError::NotFound)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.repository, self.name, self.version)
    }
}

impl FromStr for Locator {
    type Err = Error;

    /// Accepts `repo/name:version`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repository, rest) = s.split_once('/').ok_or_else(|| Error::Malformed(s.to_owned()))?;
        let (name, version) = rest.split_once(':').ok_or_else(|| Error::Malformed(s.to_owned()))?;

        if !is_safe_version_charset(version) {
            return Err(Error::Malformed(format!("unsafe version charset: {version}")));
        }

        let version = if version == LATEST {
            LocatorVersion::Latest
        } else {
            LocatorVersion::Concrete(Version::parse(version).map_err(|e| Error::Malformed(e.to_string()))?)
        };

        Locator::new(repository, name, version)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed locator: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_concrete_locator() {
        let loc: Locator = "apps/gravity:1.2.3".parse().unwrap();
        assert_eq!(loc.to_string(), "apps/gravity:1.2.3");
        assert_eq!(loc.to_string().parse::<Locator>().unwrap(), loc);
    }

    #[test]
    fn round_trips_latest_sentinel() {
        let loc: Locator = "apps/gravity:latest".parse().unwrap();
        assert!(loc.is_latest());
        assert_eq!(loc.to_string(), "apps/gravity:latest");
    }

    #[test]
    fn rejects_malformed_triple() {
        assert!("no-slash-or-colon".parse::<Locator>().is_err());
        assert!("apps/gravity-no-version".parse::<Locator>().is_err());
    }

    #[test]
    fn rejects_shell_injection_in_version() {
        assert!("apps/gravity:1.0.0;echo pwned".parse::<Locator>().is_err());
        assert!("apps/gravity:$(whoami)".parse::<Locator>().is_err());
    }

    #[test]
    fn rejects_invalid_name_charset() {
        assert!(Locator::new("apps", "bad name!", LocatorVersion::Latest).is_err());
    }

    #[test]
    fn resolves_latest_to_highest_semver() {
        let target: Locator = "apps/gravity:latest".parse().unwrap();
        let candidates = vec![
            "apps/gravity:1.0.0".parse().unwrap(),
            "apps/gravity:2.3.0".parse().unwrap(),
            "apps/gravity:2.1.0".parse().unwrap(),
            "other/gravity:9.0.0".parse().unwrap(),
        ];

        let resolved = target.resolve_metadata(&candidates).unwrap();
        assert_eq!(resolved.to_string(), "apps/gravity:2.3.0");
    }

    #[test]
    fn resolve_metadata_not_found_when_no_match() {
        let target: Locator = "apps/missing:latest".parse().unwrap();
        assert_eq!(target.resolve_metadata(&[]), Err(CoreError::NotFound));
    }

    #[test]
    fn resolve_metadata_echoes_concrete_locator() {
        let target: Locator = "apps/gravity:1.0.0".parse().unwrap();
        assert_eq!(target.resolve_metadata(&[]).unwrap(), target);
    }
}
