// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RegistrySyncer (C8): push/pull of the optional on-disk `registry/`
//! subtree to/from a container registry (spec §4.8).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;
use thiserror::Error;
use tokio::fs;

use crate::backend::RegistryClient;
use crate::concurrency::Pool;
use crate::error::CoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for CoreError {
    fn from(value: Error) -> Self {
        match value {
            Error::Core(e) => e,
            Error::Io(e) => CoreError::ConnectionProblem(e.to_string()),
        }
    }
}

/// Images present in `status.dockerImages.all` but absent from
/// `status.dockerImages.vendored` (spec §4.8 "missing").
pub fn missing_images(all: &[String], vendored: &[String]) -> Vec<String> {
    all.iter().filter(|image| !vendored.contains(image)).cloned().collect()
}

/// Syncs the optional on-disk `registry/` subtree (spec §6.1) against a
/// container registry reachable through `R`.
pub struct RegistrySyncer<R: RegistryClient> {
    client: R,
}

impl<R: RegistryClient> RegistrySyncer<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    /// `PushDir(dir, registryAddr)`: a missing or empty `registry/` subtree
    /// is a no-op, logged rather than surfaced as an error (spec §4.8).
    /// Contrast the installer tarball's export path, which treats the same
    /// condition as a hard failure (spec §6.3) — the two share a directory
    /// shape but not this leniency.
    pub async fn push_dir(&self, dir: &Path, registry_addr: &str) -> Result<(), Error> {
        let registry_dir = dir.join("registry");
        if !is_populated_dir(&registry_dir).await? {
            log::debug!("no registry subtree at {}, skipping push", registry_dir.display());
            return Ok(());
        }
        self.client.push_dir(&registry_dir, registry_addr).await?;
        Ok(())
    }

    /// `SyncTo(dstDir, missing, degree, progress)`: fetches every image in
    /// `missing` into `dstDir` at up to `degree` in-flight fetches,
    /// reporting `(completed, total)` through `progress` as each lands.
    pub async fn sync_to(
        &self,
        dst_dir: &Path,
        missing: &[String],
        degree: i64,
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Result<(), Error> {
        fs::create_dir_all(dst_dir).await?;

        let pool = Pool::new(degree);
        let total = missing.len();
        let completed = AtomicUsize::new(0);

        let fetches = missing.iter().map(|image| async {
            pool.run(|| self.client.fetch_into(dst_dir, image)).await?;
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(progress) = progress {
                progress(done, total);
            }
            Ok::<(), CoreError>(())
        });

        try_join_all(fetches).await?;
        Ok(())
    }

    pub async fn image_exists(&self, registry_url: &str, repository: &str, tag: &str) -> Result<bool, Error> {
        Ok(self.client.image_exists(registry_url, repository, tag).await?)
    }
}

async fn is_populated_dir(dir: &Path) -> Result<bool, std::io::Error> {
    match fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
