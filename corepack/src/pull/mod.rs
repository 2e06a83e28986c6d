// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Puller (C7): transitive replication across two (PackageStore, AppService)
//! pairs (spec §4.7).

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::app::AppService;
use crate::backend::{Backend, BlobStore};
use crate::concurrency::Pool;
use crate::config::PullConfig;
use crate::error::CoreError;
use crate::locator::Locator;
use crate::store::WriteOptions;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<crate::app::Error> for Error {
    fn from(value: crate::app::Error) -> Self {
        Error::Core(value.into())
    }
}

impl From<crate::store::Error> for Error {
    fn from(value: crate::store::Error) -> Self {
        Error::Core(value.into())
    }
}

#[derive(Debug, Clone)]
pub struct PullPackageRequest {
    pub locator: Locator,
    pub upsert: bool,
    pub metadata_only: bool,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PullAppRequest {
    pub locator: Locator,
    pub upsert: bool,
    pub parallel: i64,
}

/// Transitive replication from a source (package store, app service) pair
/// to a destination pair, deduping package reads across one invocation
/// (spec §4.7, §8 "Dedup").
pub struct Puller<SB: Backend, SS: BlobStore, DB: Backend, DS: BlobStore> {
    source_apps: Arc<AppService<SB, SS>>,
    dest_apps: Arc<AppService<DB, DS>>,
    pulled: RwLock<HashSet<Locator>>,
    retry_timeout: Duration,
    retry_interval: Duration,
}

impl<SB: Backend, SS: BlobStore, DB: Backend, DS: BlobStore> Puller<SB, SS, DB, DS> {
    /// Builds a `Puller` with the environment defaults for retry timing
    /// (spec §7). Use [`Puller::with_config`] to load an on-disk override.
    pub fn new(source_apps: Arc<AppService<SB, SS>>, dest_apps: Arc<AppService<DB, DS>>) -> Self {
        Self::with_config(source_apps, dest_apps, &PullConfig::default())
    }

    pub fn with_config(source_apps: Arc<AppService<SB, SS>>, dest_apps: Arc<AppService<DB, DS>>, config: &PullConfig) -> Self {
        Self {
            source_apps,
            dest_apps,
            pulled: RwLock::new(HashSet::new()),
            retry_timeout: config.transient_error_timeout(),
            retry_interval: config.retry_interval(),
        }
    }

    /// Retries `f` under this puller's configured timeout with constant
    /// backoff, per spec §4.7/§7.
    async fn retry<F, Fut, T>(&self, mut f: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let deadline = Instant::now() + self.retry_timeout;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && Instant::now() < deadline => {
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `PullPackage(req)` (spec §4.7). Already-pulled locators within this
    /// invocation short-circuit to `Ok`.
    pub async fn pull_package(&self, req: &PullPackageRequest) -> Result<(), Error> {
        if self.pulled.read().await.contains(&req.locator) {
            return Ok(());
        }

        if !req.upsert && self.dest_apps.store().read_envelope(&req.locator).await.is_ok() {
            return Err(CoreError::AlreadyExists.into());
        }

        self.retry(|| self.pull_package_once(req)).await?;
        self.pulled.write().await.insert(req.locator.clone());
        Ok(())
    }

    async fn pull_package_once(&self, req: &PullPackageRequest) -> Result<(), CoreError> {
        let source = self.source_apps.store();
        let dest = self.dest_apps.store();

        let envelope = source.read_envelope(&req.locator).await?;
        let body = if req.metadata_only {
            Vec::new()
        } else {
            source.read(&req.locator).await?.1
        };

        dest.upsert_repository(&req.locator.repository, None).await?;

        let mut labels = req.labels.clone();
        for (k, v) in &envelope.runtime_labels {
            labels.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let opts = WriteOptions {
            labels,
            manifest: envelope.manifest.clone(),
            package_type: Some(envelope.package_type),
            hidden: envelope.hidden,
            creator: envelope.creator.clone(),
        };

        if req.upsert {
            dest.upsert(&req.locator, &body, opts).await?;
        } else {
            dest.create(&req.locator, &body, opts).await?;
        }
        Ok(())
    }

    /// `PullApp(req)` (spec §4.7). `visiting` defends the recursive base
    /// chain against cycles (spec §9 "Cyclic worries").
    pub fn pull_app<'a>(&'a self, req: &'a PullAppRequest) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move { self.pull_app_inner(req, &mut HashSet::new()).await })
    }

    fn pull_app_inner<'a>(&'a self, req: &'a PullAppRequest, visiting: &'a mut HashSet<Locator>) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if !visiting.insert(req.locator.clone()) {
                return Err(CoreError::BadParameter(format!("cyclic app dependency at {}", req.locator)).into());
            }

            let mut effective_upsert = req.upsert;
            match self.dest_apps.get(&req.locator).await {
                Ok(existing) if existing.envelope.is_metadata_package() => effective_upsert = true,
                Ok(_) if !effective_upsert => return Err(CoreError::AlreadyExists.into()),
                _ => {}
            }

            let app = self.source_apps.get(&req.locator).await?;

            if app.manifest.kind.requires_runtime_dependency() {
                if let Some(base) = app.manifest.base.clone() {
                    swallow_already_exists(
                        self.pull_app_inner(
                            &PullAppRequest {
                                locator: base,
                                upsert: effective_upsert,
                                parallel: req.parallel,
                            },
                            visiting,
                        )
                        .await,
                    )?;
                }

                let pool = Pool::new(req.parallel);
                let package_pulls = app.manifest.dependencies.packages.iter().cloned().map(|dep| {
                    let pool = pool.clone();
                    async move {
                        let dep_req = PullPackageRequest {
                            locator: dep,
                            upsert: effective_upsert,
                            metadata_only: false,
                            labels: HashMap::new(),
                        };
                        pool.run(|| self.pull_package(&dep_req)).await
                    }
                });
                for result in try_join_all(package_pulls.map(swallow_already_exists_future)).await? {
                    let _ = result;
                }

                for dep in app.manifest.dependencies.apps.clone() {
                    swallow_already_exists(
                        self.pull_app_inner(
                            &PullAppRequest {
                                locator: dep,
                                upsert: effective_upsert,
                                parallel: req.parallel,
                            },
                            visiting,
                        )
                        .await,
                    )?;
                }
            }

            let (_, body) = self.source_apps.store().read(&req.locator).await?;
            let manifest_bytes = app.envelope.manifest.clone().unwrap_or_default();

            if effective_upsert {
                self.dest_apps.upsert(&req.locator, &body, HashMap::new()).await?;
            } else {
                self.dest_apps
                    .create_with_manifest(&req.locator, &manifest_bytes, &body, HashMap::new())
                    .await?;
            }

            visiting.remove(&req.locator);
            Ok(())
        })
    }
}

fn swallow_already_exists(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(Error::Core(CoreError::AlreadyExists)) => Ok(()),
        other => other,
    }
}

async fn swallow_already_exists_future(fut: impl Future<Output = Result<(), Error>>) -> Result<(), Error> {
    swallow_already_exists(fut.await)
}
