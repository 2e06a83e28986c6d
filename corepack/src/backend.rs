// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Narrow interfaces onto the out-of-scope collaborators (spec §6.6).
//!
//! The core never ships a production implementation of these — a real
//! deployment wires its own key-value store, object store, Kubernetes
//! client and Helm repository behind them. [`crate::testkit`] carries only
//! reference implementations used by this crate's own tests.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::CoreError;
use crate::locator::Locator;

/// Opaque key into the key-value backend. Envelopes key by
/// `(repository, name, version)`; operations and progress entries key by
/// operation id; Helm index entries key by chart name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub String);

impl Key {
    pub fn envelope(loc: &Locator) -> Self {
        Key(format!("envelope/{}/{}:{}", loc.repository, loc.name, loc.version))
    }

    pub fn operation(id: &str) -> Self {
        Key(format!("operation/{id}"))
    }

    pub fn index_entry(name: &str) -> Self {
        Key(format!("index/{name}"))
    }

    pub fn prefix(&self, other: &Key) -> bool {
        other.0.starts_with(&self.0)
    }
}

/// The key-value backend providing persistent records: envelopes,
/// operations, progress entries, and Helm index entries (spec §1, §6.6).
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Vec<u8>, CoreError>;

    /// Insert-or-replace.
    async fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), CoreError>;

    /// Insert-only; fails [`CoreError::AlreadyExists`] if `key` is present.
    async fn create(&self, key: &Key, value: Vec<u8>) -> Result<(), CoreError>;

    async fn delete(&self, key: &Key) -> Result<(), CoreError>;

    async fn list_prefix(&self, prefix: &Key) -> Result<Vec<(Key, Vec<u8>)>, CoreError>;
}

/// The raw package-body object store (spec §1, §6.6, §4.2's atomic-write
/// guarantee).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Opens a write handle. The implementation is responsible for making
    /// the write atomic: data lands under a temporary name and is renamed
    /// into place under the final digest-derived path only once `finish` is
    /// called with the computed digest.
    async fn write(&self, hint: &str) -> Result<Box<dyn AsyncWrite + Send + Unpin>, CoreError>;

    /// Finalizes a blob written via [`BlobStore::write`] under its final,
    /// content-addressed digest.
    async fn finish(&self, hint: &str, digest: &str) -> Result<(), CoreError>;

    async fn read(&self, digest: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, CoreError>;

    async fn delete(&self, digest: &str) -> Result<(), CoreError>;
}

/// Read interface onto the out-of-scope account/cluster store (spec §3
/// Supplement), used only by [`crate::app::AppService`]'s referential-safety
/// check on delete.
#[async_trait]
pub trait SiteIndex: Send + Sync {
    async fn installed_applications(&self) -> Result<Vec<Locator>, CoreError>;
}

/// Hook-job scheduling. Per §7, hooks never fail an uninstall: callers
/// log-and-continue regardless of what this returns, because the backing
/// Kubernetes collaborator may legitimately refuse to run hooks for
/// already-gone applications.
#[async_trait]
pub trait KubeHooks: Send + Sync {
    async fn run_install(&self, loc: &Locator) -> Result<(), CoreError>;
    async fn run_update(&self, loc: &Locator) -> Result<(), CoreError>;
    async fn run_rollback(&self, loc: &Locator) -> Result<(), CoreError>;
}

/// Push/remove of a chart's `index.yaml` entry to the externally-served Helm
/// repository (spec §4.11). `AppService` calls this best-effort after
/// updating its own in-core index.
#[async_trait]
pub trait ChartRepository: Send + Sync {
    async fn publish(&self, name: &str, version: &str, digest: &str) -> Result<(), CoreError>;
    async fn unpublish(&self, name: &str, version: &str) -> Result<(), CoreError>;
}

/// The container runtime/registry daemon `Vendorer` pulls images through
/// (spec §4.5 step 6). A real deployment wires this to a local container
/// engine or registry client; the core only needs pull/local-presence/tag.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn exists_locally(&self, image: &str) -> Result<bool, CoreError>;
    async fn pull(&self, image: &str) -> Result<(), CoreError>;
    /// Re-tags a locally-present image under `new_ref`, dropping the
    /// originating registry host from the name (spec §4.5 step 6: "tag them
    /// under a registry-less name").
    async fn tag(&self, image: &str, new_ref: &str) -> Result<(), CoreError>;
}

/// Converts a `baseImage` reference into a telekube runtime package (spec
/// §4.5 step 9). Out of scope for this crate: the conversion itself depends
/// on a runtime-specific image format this core never parses.
#[async_trait]
pub trait RuntimeImageTranslator: Send + Sync {
    async fn translate(&self, base_image: &str, locator: &Locator) -> Result<(), CoreError>;
}

/// The registry daemon `RegistrySyncer` pushes an unpacked `registry/`
/// subtree to, and fetches missing images from (spec §4.8). Distinct from
/// [`ImageClient`]: this trait speaks to a registry address over the
/// network rather than a local container engine.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Pushes every image under `dir` (an unpacked `registry/` subtree, spec
    /// §6.1) to `registry_addr`.
    async fn push_dir(&self, dir: &Path, registry_addr: &str) -> Result<(), CoreError>;

    /// Fetches `image` into `dir` in the on-disk registry layout.
    async fn fetch_into(&self, dir: &Path, image: &str) -> Result<(), CoreError>;

    async fn image_exists(&self, registry_url: &str, repository: &str, tag: &str) -> Result<bool, CoreError>;
}
