// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! LayeredStore (C9): a read-only lower [`PackageStore`] shadowed by a
//! writable upper one, plus the scratch directory tree an installer unpacks
//! into (spec §6.3, §9 "Layered store").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::backend::{Backend, BlobStore};
use crate::error::CoreError;
use crate::locator::Locator;
use crate::store::{PackageEnvelope, PackageStore, WriteOptions};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<crate::store::Error> for Error {
    fn from(value: crate::store::Error) -> Self {
        let core: CoreError = value.into();
        Error::Core(core)
    }
}

impl From<Error> for CoreError {
    fn from(value: Error) -> Self {
        match value {
            Error::Core(e) => e,
            Error::Io(e) => CoreError::ConnectionProblem(e.to_string()),
        }
    }
}

const SCRATCH_SUBDIRS: [&str; 3] = ["packages", "unpacked", "import"];

/// A writable upper store shadowing a read-only lower one, with the scratch
/// directory tree an installer unpacks a package into before it ever touches
/// either store (spec §6.3).
pub struct LayeredStore<UB: Backend, US: BlobStore, LB: Backend, LS: BlobStore> {
    upper: PackageStore<UB, US>,
    lower: PackageStore<LB, LS>,
    scratch_root: PathBuf,
}

impl<UB: Backend, US: BlobStore, LB: Backend, LS: BlobStore> LayeredStore<UB, US, LB, LS> {
    /// Creates `packages/`, `unpacked/`, and `import/` under `scratch_root`.
    pub async fn new(upper: PackageStore<UB, US>, lower: PackageStore<LB, LS>, scratch_root: PathBuf) -> Result<Self, Error> {
        for sub in SCRATCH_SUBDIRS {
            fs::create_dir_all(scratch_root.join(sub)).await?;
        }
        Ok(Self { upper, lower, scratch_root })
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.scratch_root.join("packages")
    }

    pub fn unpacked_dir(&self) -> PathBuf {
        self.scratch_root.join("unpacked")
    }

    pub fn import_dir(&self) -> PathBuf {
        self.scratch_root.join("import")
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Writes always land in the upper store; the lower store is read-only
    /// from this type's perspective.
    pub async fn create(&self, loc: &Locator, body: &[u8], opts: WriteOptions) -> Result<PackageEnvelope, Error> {
        Ok(self.upper.create(loc, body, opts).await?)
    }

    pub async fn upsert(&self, loc: &Locator, body: &[u8], opts: WriteOptions) -> Result<PackageEnvelope, Error> {
        Ok(self.upper.upsert(loc, body, opts).await?)
    }

    /// Consults the upper store first, falling back to the lower store only
    /// on [`CoreError::NotFound`].
    pub async fn read(&self, loc: &Locator) -> Result<(PackageEnvelope, Vec<u8>), Error> {
        match self.upper.read(loc).await {
            Err(crate::store::Error::Core(CoreError::NotFound)) => Ok(self.lower.read(loc).await?),
            other => Ok(other?),
        }
    }

    pub async fn read_envelope(&self, loc: &Locator) -> Result<PackageEnvelope, Error> {
        match self.upper.read_envelope(loc).await {
            Err(crate::store::Error::Core(CoreError::NotFound)) => Ok(self.lower.read_envelope(loc).await?),
            other => Ok(other?),
        }
    }

    /// Merges both layers' listings for `repo`, preferring the upper
    /// envelope when a locator is present in both.
    pub async fn list(&self, repo: &str) -> Result<Vec<PackageEnvelope>, Error> {
        let mut by_locator: HashMap<Locator, PackageEnvelope> =
            self.lower.list(repo).await?.into_iter().map(|e| (e.locator.clone(), e)).collect();
        for envelope in self.upper.list(repo).await? {
            by_locator.insert(envelope.locator.clone(), envelope);
        }
        Ok(by_locator.into_values().collect())
    }

    /// Recursively removes the scratch directory tree. Idempotent: a
    /// missing `scratch_root` is not an error.
    pub async fn cleanup(&self) -> Result<(), Error> {
        match fs::remove_dir_all(&self.scratch_root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
