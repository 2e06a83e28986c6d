// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! ManifestResolver (C3): parse manifests, merge with base, apply metadata
//! rewrites, validate (spec §4.3).

pub mod merge;

use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dag::Dag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;
use crate::locator::Locator;

/// Closed sum type over the dynamically-typed `kind` field the original
/// carries (§9 Design Notes: "dynamic typing → sum types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Bundle,
    Cluster,
    Application,
    Runtime,
    SystemApplication,
}

impl Kind {
    /// `Bundle`/`Cluster`/`Runtime` apps require a resolved
    /// `systemOptions.dependencies.runtime` after resolution (§3 Invariants)
    /// and pull their base before their dependencies (§4.7).
    pub fn requires_runtime_dependency(&self) -> bool {
        matches!(self, Kind::Bundle | Kind::Cluster | Kind::Runtime)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub repository: String,
    pub name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub namespace: Option<String>,
    pub hidden: bool,
    pub created_timestamp: DateTime<Utc>,
}

impl Metadata {
    pub fn locator(&self) -> Locator {
        Locator::new(
            self.repository.clone(),
            self.name.clone(),
            crate::locator::LocatorVersion::Concrete(self.version.clone()),
        )
        .expect("manifest metadata was already validated")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    pub packages: Vec<Locator>,
    pub apps: Vec<Locator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemOptions {
    pub dependencies: SystemDependencies,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDependencies {
    #[serde(default)]
    pub runtime: Option<Locator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub name: String,
    #[serde(default)]
    pub service_role: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub base_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Installer {
    pub setup_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsNetworking {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamPolicy {
    pub version: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aws {
    pub networking: AwsNetworking,
    pub iam_policy: IamPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericNetworking {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generic {
    pub networking: GenericNetworking,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Providers {
    pub aws: Aws,
    pub generic: Generic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
    #[serde(default)]
    pub rollback: Option<String>,
}

/// Parsed form of the application descriptor (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: Kind,
    pub metadata: Metadata,
    #[serde(default)]
    pub base: Option<Locator>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub system_options: SystemOptions,
    #[serde(default)]
    pub node_profiles: Vec<NodeProfile>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub providers: Providers,
    #[serde(default)]
    pub installer: Installer,
    #[serde(default)]
    pub hooks: Hooks,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("failed to parse manifest yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Base(#[from] Box<CoreError>),
}

impl From<Error> for CoreError {
    fn from(value: Error) -> Self {
        match value {
            Error::InvalidManifest(msg) => CoreError::BadParameter(msg),
            Error::Parse(e) => CoreError::BadParameter(e.to_string()),
            Error::Base(e) => *e,
        }
    }
}

/// Fetches a base application's already-resolved manifest, used by
/// [`resolve`] to walk a `base` chain without this module depending on
/// `AppService` directly.
#[async_trait]
pub trait BaseResolver: Send + Sync {
    async fn resolve_base(&self, loc: &Locator) -> Result<Manifest, CoreError>;
}

/// Performs `${VAR}` environment-variable expansion over the raw bytes
/// before YAML parsing (spec §4.3, §6.4).
pub fn expand_environment(raw: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            out.push_str(&env::var(&name).unwrap_or_default());
        } else {
            out.push(c);
        }
    }

    out.into_bytes()
}

/// `Parse(bytes) → manifest | ParseError` (spec §4.3).
pub fn parse(raw: &[u8]) -> Result<Manifest, Error> {
    let expanded = expand_environment(raw);
    Ok(serde_yaml::from_slice(&expanded)?)
}

/// `Resolve(manifest) → manifest` (spec §4.3). Walks the `base` chain root
/// to leaf, merging at each step, defending against a cyclic chain the way
/// `dag::Dag::try_add_edge` defends the Puller against cyclic dependency
/// graphs (§9 Design Notes: "Cyclic worries").
pub async fn resolve(manifest: Manifest, resolver: &dyn BaseResolver) -> Result<Manifest, Error> {
    let mut chain = vec![manifest.clone()];
    let mut seen: Dag<Locator> = Dag::new();
    let mut current = manifest;

    while let Some(base_loc) = current.base.clone() {
        let from = seen.add_node_or_get_index(current.metadata.locator());
        let to = seen.add_node_or_get_index(base_loc.clone());
        if seen.try_add_edge(from, to).is_err() {
            return Err(Error::InvalidManifest(format!("cyclic base chain at {base_loc}")));
        }

        let base_manifest = resolver.resolve_base(&base_loc).await.map_err(Box::new)?;
        chain.push(base_manifest.clone());
        current = base_manifest;
    }

    let mut result = chain.pop().expect("chain always has at least the root");
    while let Some(derived) = chain.pop() {
        result = merge::merge(result, derived)?;
    }

    Ok(result)
}

/// `CheckAndSetDefaults(manifest)` (spec §4.3): populate node-profile
/// labels and apply the dependency filter.
pub fn check_and_set_defaults(mut manifest: Manifest, exclude_deps: &[Locator]) -> Manifest {
    for profile in &mut manifest.node_profiles {
        if let Some(role) = &profile.service_role {
            profile
                .labels
                .entry("serviceLabelRole".to_owned())
                .or_insert_with(|| role.clone());
        }
        profile
            .labels
            .entry("labelRole".to_owned())
            .or_insert_with(|| profile.name.clone());
    }

    manifest.dependencies.packages.retain(|d| !exclude_deps.contains(d));
    manifest.dependencies.apps.retain(|d| !exclude_deps.contains(d));

    manifest
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn minimal_manifest(name: &str, base: Option<Locator>) -> Manifest {
        Manifest {
            kind: Kind::Application,
            metadata: Metadata {
                repository: "apps".into(),
                name: name.into(),
                version: "1.0.0".parse().unwrap(),
                namespace: None,
                hidden: false,
                created_timestamp: Utc::now(),
            },
            base,
            dependencies: Dependencies::default(),
            system_options: SystemOptions::default(),
            node_profiles: vec![],
            endpoints: vec![],
            providers: Providers::default(),
            installer: Installer::default(),
            hooks: Hooks::default(),
        }
    }

    #[test]
    fn expand_environment_substitutes_vars() {
        std::env::set_var("COREPACK_TEST_VAR", "value");
        let raw = b"name: ${COREPACK_TEST_VAR}";
        let expanded = expand_environment(raw);
        assert_eq!(String::from_utf8(expanded).unwrap(), "name: value");
    }

    #[test]
    fn check_and_set_defaults_fills_labels() {
        let mut manifest = minimal_manifest("app", None);
        manifest.node_profiles.push(NodeProfile {
            name: "worker".into(),
            service_role: Some("node".into()),
            labels: HashMap::new(),
            base_image: None,
        });

        let manifest = check_and_set_defaults(manifest, &[]);
        let profile = &manifest.node_profiles[0];
        assert_eq!(profile.labels.get("serviceLabelRole"), Some(&"node".to_string()));
        assert_eq!(profile.labels.get("labelRole"), Some(&"worker".to_string()));
    }

    #[test]
    fn check_and_set_defaults_filters_excluded_deps() {
        let mut manifest = minimal_manifest("app", None);
        let keep: Locator = "apps/keep:1.0.0".parse().unwrap();
        let drop: Locator = "apps/drop:1.0.0".parse().unwrap();
        manifest.dependencies.packages = vec![keep.clone(), drop.clone()];

        let manifest = check_and_set_defaults(manifest, &[drop]);
        assert_eq!(manifest.dependencies.packages, vec![keep]);
    }

    struct FixedResolver(Manifest);

    #[async_trait::async_trait]
    impl BaseResolver for FixedResolver {
        async fn resolve_base(&self, _loc: &Locator) -> Result<Manifest, CoreError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn resolve_without_base_is_a_no_op() {
        let manifest = minimal_manifest("app", None);
        let resolver = FixedResolver(manifest.clone());
        let resolved = resolve(manifest.clone(), &resolver).await.unwrap();
        assert_eq!(resolved, manifest);
    }

    #[tokio::test]
    async fn resolve_detects_self_referential_base() {
        let base_loc: Locator = "apps/app:1.0.0".parse().unwrap();
        let manifest = minimal_manifest("app", Some(base_loc));
        let resolver = FixedResolver(manifest.clone());

        let err = resolve(manifest, &resolver).await;
        assert!(matches!(err, Err(Error::InvalidManifest(_))));
    }

    struct CountingResolver {
        base: Manifest,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BaseResolver for CountingResolver {
        async fn resolve_base(&self, _loc: &Locator) -> Result<Manifest, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.base.clone())
        }
    }

    #[tokio::test]
    async fn resolve_merges_one_level_of_base() {
        let base_loc: Locator = "apps/base:1.0.0".parse().unwrap();
        let base = minimal_manifest("base", None);
        let derived = minimal_manifest("app", Some(base_loc));

        let resolver = CountingResolver {
            base,
            calls: AtomicUsize::new(0),
        };

        let resolved = resolve(derived, &resolver).await.unwrap();
        assert_eq!(resolved.metadata.name, "app");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
