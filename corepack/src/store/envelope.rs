// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! [`PackageEnvelope`] — the immutable metadata record for a stored blob
//! (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::locator::Locator;

/// Tag distinguishing ordinary user-created packages from ones the core
/// itself derives (runtime packages from `vendor::naming`, the
/// `<name>-resources` cache package).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    User,
    Runtime,
    Service,
}

/// Immutable metadata for a stored blob (spec §3). Envelopes without a
/// `manifest` are "plain packages"; envelopes with one are "applications".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEnvelope {
    pub locator: Locator,
    pub size: u64,
    /// Hex-encoded SHA-512 digest of the body, recomputed on every write.
    pub digest: String,
    pub created: DateTime<Utc>,
    pub creator: Option<String>,
    pub labels: HashMap<String, String>,
    /// Reserved for the store's own bookkeeping; never set by callers.
    pub runtime_labels: HashMap<String, String>,
    pub manifest: Option<Vec<u8>>,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub hidden: bool,
}

impl PackageEnvelope {
    pub fn is_application(&self) -> bool {
        self.manifest.is_some()
    }

    /// The well-known label gravity's app-service uses to mark a package
    /// that lives elsewhere (§3 Invariants, Glossary "Metadata package").
    pub fn is_metadata_package(&self) -> bool {
        self.labels.get("purpose").map(String::as_str) == Some("metadata")
    }

    /// Helm-ness is carried as a label rather than a closed `Manifest.kind`
    /// variant (§4.11).
    pub fn is_helm(&self) -> bool {
        self.labels.get("kind").map(String::as_str) == Some("helm")
    }
}

/// Options accepted by [`super::PackageStore::create`] and
/// [`super::PackageStore::upsert`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub labels: HashMap<String, String>,
    pub manifest: Option<Vec<u8>>,
    pub package_type: Option<PackageType>,
    pub hidden: bool,
    pub creator: Option<String>,
}
