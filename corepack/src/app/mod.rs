// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! AppService (C6): applications as packages whose envelope carries a
//! manifest, layered over `PackageStore` (spec §4.6).

pub mod index;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::{Backend, BlobStore, ChartRepository, SiteIndex};
use crate::error::CoreError;
use crate::locator::Locator;
use crate::manifest::{self, Kind, Manifest};
use crate::ops::{self, OperationContext, ProgressEntry, UpdateStep};
use crate::store::{PackageEnvelope, PackageStore, PackageType, WriteOptions};
use fnmatch::Pattern;
use index::{ChartIndex, IndexEntry};
use vfs::tree::{builder::TreeBuilder, BlitFile, Kind as VfsKind};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("manifest error: {0}")]
    Manifest(#[from] manifest::Error),
    #[error("malformed package archive: {0}")]
    Archive(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for CoreError {
    fn from(value: Error) -> Self {
        match value {
            Error::Core(e) => e,
            Error::Manifest(e) => e.into(),
            Error::Archive(msg) => CoreError::BadParameter(msg),
            Error::Io(e) => CoreError::ConnectionProblem(e.to_string()),
        }
    }
}

impl From<crate::store::Error> for Error {
    fn from(value: crate::store::Error) -> Self {
        Error::Core(value.into())
    }
}

impl From<ops::Error> for Error {
    fn from(value: ops::Error) -> Self {
        Error::Core(CoreError::ConnectionProblem(value.to_string()))
    }
}

/// `CreateImportOperation(req)` input (spec §4.6): an application body plus
/// where its progress/log should be recorded.
pub struct ImportRequest {
    pub locator: Locator,
    pub manifest_bytes: Vec<u8>,
    pub body: Vec<u8>,
    pub labels: HashMap<String, String>,
    pub progress_tx: Option<mpsc::Sender<ProgressEntry>>,
}

/// An application: its envelope plus the parsed manifest stored alongside
/// it (spec §3 Glossary "Application").
#[derive(Debug, Clone)]
pub struct Application {
    pub envelope: PackageEnvelope,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub repository: Option<String>,
    pub package_type: Option<PackageType>,
    pub name_pattern: Option<Pattern>,
    pub exclude_hidden: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub locator: Locator,
    pub force: bool,
}

/// Finds `resources/app.yaml` inside a gzip-compressed tar package body.
fn extract_manifest_bytes(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut archive = tar::Archive::new(GzDecoder::new(body));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == "resources/app.yaml" {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut buf)?;
            return Ok(buf);
        }
    }
    Err(Error::Archive("package does not contain resources/app.yaml".into()))
}

/// Re-tars just the `resources/` subtree of a package body (spec §4.6
/// `GetAppResources`, §8 scenario 4).
fn extract_resources_subtree(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut archive = tar::Archive::new(GzDecoder::new(body));
    let mut out = Vec::new();
    {
        let mut builder = tar::Builder::new(GzEncoder::new(&mut out, Compression::default()));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            if path.starts_with("resources") {
                let header = entry.header().clone();
                builder.append(&header, &mut entry)?;
            }
        }
        builder.into_inner()?.finish()?;
    }
    Ok(out)
}

fn append_bytes<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, mode: u32, data: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append(&header, data)
}

/// One entry of an installer tarball's composed layout, before it is
/// serialized (spec §6.3). Carried through a [`vfs::tree::Tree`] purely for
/// its path-ordering and implicit-parent-directory synthesis — an installer
/// tarball has no symlinks, so the tree's redirect machinery never triggers
/// here.
#[derive(Debug, Clone)]
struct InstallerEntry {
    path: String,
    mode: u32,
    is_dir: bool,
}

impl From<String> for InstallerEntry {
    fn from(path: String) -> Self {
        Self {
            path,
            mode: 0o755,
            is_dir: true,
        }
    }
}

impl BlitFile for InstallerEntry {
    fn kind(&self) -> VfsKind {
        if self.is_dir {
            VfsKind::Directory
        } else {
            VfsKind::Regular
        }
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn id(&self) -> String {
        self.path.clone()
    }

    fn cloned_to(&self, path: String) -> Self {
        Self { path, ..self.clone() }
    }
}

fn resources_cache_locator(loc: &Locator) -> Locator {
    Locator::new(loc.repository.clone(), format!("{}-resources", loc.name), loc.version.clone()).expect("derived name is valid")
}

fn is_helm(labels: &HashMap<String, String>) -> bool {
    labels.get("kind").map(String::as_str) == Some("helm")
}

/// Layers application semantics — manifests, referential-safety deletes, a
/// resources cache, and a Helm chart index — over a [`PackageStore`] (spec
/// §4.6).
pub struct AppService<B: Backend, S: BlobStore> {
    store: PackageStore<B, S>,
    site_index: Option<Arc<dyn SiteIndex>>,
    chart_repo: Option<Arc<dyn ChartRepository>>,
    index: ChartIndex,
}

impl<B: Backend, S: BlobStore> AppService<B, S> {
    pub fn new(store: PackageStore<B, S>, site_index: Option<Arc<dyn SiteIndex>>, chart_repo: Option<Arc<dyn ChartRepository>>) -> Self {
        Self {
            store,
            site_index,
            chart_repo,
            index: ChartIndex::new(),
        }
    }

    /// `Create(loc, bodyReader, labels)`: fails [`CoreError::AlreadyExists`]
    /// through the underlying store.
    pub async fn create(&self, loc: &Locator, body: &[u8], labels: HashMap<String, String>) -> Result<Application, Error> {
        let manifest_bytes = extract_manifest_bytes(body)?;
        self.write(loc, &manifest_bytes, body, labels, true).await
    }

    pub async fn upsert(&self, loc: &Locator, body: &[u8], labels: HashMap<String, String>) -> Result<Application, Error> {
        let manifest_bytes = extract_manifest_bytes(body)?;
        self.write(loc, &manifest_bytes, body, labels, false).await
    }

    /// Skips re-extracting the manifest from the tarball (spec §4.6).
    pub async fn create_with_manifest(
        &self,
        loc: &Locator,
        manifest_bytes: &[u8],
        body: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<Application, Error> {
        self.write(loc, manifest_bytes, body, labels, true).await
    }

    async fn write(
        &self,
        loc: &Locator,
        manifest_bytes: &[u8],
        body: &[u8],
        labels: HashMap<String, String>,
        create: bool,
    ) -> Result<Application, Error> {
        let manifest = manifest::parse(manifest_bytes)?;
        let helm = is_helm(&labels);

        let opts = WriteOptions {
            labels,
            manifest: Some(manifest_bytes.to_vec()),
            package_type: Some(PackageType::User),
            hidden: manifest.metadata.hidden,
            creator: None,
        };

        let envelope = if create {
            self.store.create(loc, body, opts).await?
        } else {
            self.store.upsert(loc, body, opts).await?
        };

        if helm {
            self.index.add(IndexEntry {
                name: loc.name.clone(),
                version: loc.version.to_string(),
                digest: envelope.digest.clone(),
            });
            if let Some(repo) = &self.chart_repo {
                let _ = repo.publish(&loc.name, &loc.version.to_string(), &envelope.digest).await;
            }
        }

        Ok(Application { envelope, manifest })
    }

    pub async fn get(&self, loc: &Locator) -> Result<Application, Error> {
        let (envelope, _) = self.store.read(loc).await?;
        let manifest_bytes = envelope.manifest.clone().ok_or(CoreError::NotFound)?;
        let manifest = manifest::parse(&manifest_bytes)?;
        Ok(Application { envelope, manifest })
    }

    /// Failures to parse an individual envelope's manifest are swallowed —
    /// forward-compatibility with manifest fields a newer writer added
    /// (spec §4.6).
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Application>, Error> {
        let repo = filter.repository.as_deref().unwrap_or_default();
        let envelopes = self.store.list(repo).await?;

        let mut apps = Vec::new();
        for envelope in envelopes {
            if !envelope.is_application() {
                continue;
            }
            if filter.exclude_hidden && envelope.hidden {
                continue;
            }
            if let Some(pt) = filter.package_type {
                if envelope.package_type != pt {
                    continue;
                }
            }
            if let Some(pattern) = &filter.name_pattern {
                if pattern.match_path(&envelope.locator.name).is_none() {
                    continue;
                }
            }

            let Ok(manifest) = manifest::parse(envelope.manifest.as_deref().unwrap_or_default()) else {
                continue;
            };
            apps.push(Application { envelope, manifest });
        }

        Ok(apps)
    }

    /// Referential-safety check unless `force`; removes the Helm index entry
    /// and derived resources cache; deletes the underlying package (spec
    /// §4.6, §8 scenario 6).
    pub async fn delete(&self, req: DeleteRequest) -> Result<(), Error> {
        if !req.force {
            self.check_referential_safety(&req.locator).await?;
        }

        self.index.remove(&req.locator.name, &req.locator.version.to_string());

        let cache_loc = resources_cache_locator(&req.locator);
        let _ = self.store.delete(&cache_loc).await;

        self.store.delete(&req.locator).await?;
        Ok(())
    }

    async fn check_referential_safety(&self, loc: &Locator) -> Result<(), Error> {
        let siblings = self.store.list(&loc.repository).await?;
        for envelope in siblings {
            if envelope.locator == *loc {
                continue;
            }
            let Some(bytes) = &envelope.manifest else { continue };
            let Ok(manifest) = manifest::parse(bytes) else { continue };

            let references = manifest.base.as_ref() == Some(loc)
                || manifest.dependencies.packages.contains(loc)
                || manifest.dependencies.apps.contains(loc);

            if references {
                return Err(CoreError::BadParameter(format!("{} is a base app for {}", loc.name, envelope.locator.name)).into());
            }
        }
        Ok(())
    }

    /// Returns only the `resources/` subtree, caching the result as
    /// `<name>-resources` (spec §4.6, §8 scenario 4).
    pub async fn get_app_resources(&self, loc: &Locator) -> Result<Vec<u8>, Error> {
        let cache_loc = resources_cache_locator(loc);
        if let Ok((_, cached)) = self.store.read(&cache_loc).await {
            log::debug!("resources cache hit for {loc}");
            return Ok(cached);
        }
        log::debug!("resources cache miss for {loc}");

        let (_, body) = self.store.read(loc).await?;
        let resources = extract_resources_subtree(&body)?;

        let opts = WriteOptions {
            package_type: Some(PackageType::Service),
            ..Default::default()
        };
        let _ = self.store.upsert(&cache_loc, &resources, opts).await;

        Ok(resources)
    }

    pub async fn get_app_manifest(&self, loc: &Locator) -> Result<Vec<u8>, Error> {
        let envelope = self.store.read_envelope(loc).await?;
        envelope.manifest.ok_or_else(|| CoreError::NotFound.into())
    }

    /// Rebuilds the Helm chart index from every Helm-kind envelope currently
    /// in `repo` (spec §8 scenario 5).
    pub async fn rebuild_index(&self, repo: &str) -> Result<(), Error> {
        let envelopes = self.store.list(repo).await?;
        let fresh = envelopes
            .into_iter()
            .filter(|e| is_helm(&e.labels))
            .map(|e| IndexEntry {
                name: e.locator.name.clone(),
                version: e.locator.version.to_string(),
                digest: e.digest.clone(),
            })
            .collect();
        self.index.rebuild(fresh);
        Ok(())
    }

    pub fn chart_index_entries(&self) -> Vec<IndexEntry> {
        self.index.entries()
    }

    pub fn site_index(&self) -> Option<&Arc<dyn SiteIndex>> {
        self.site_index.as_ref()
    }

    /// Exposes the underlying store for callers that need package-level
    /// access alongside application semantics (e.g. `Puller`).
    pub fn store(&self) -> &PackageStore<B, S> {
        &self.store
    }

    /// `CreateImportOperation(req) → AppOperation` (spec §4.6): validates
    /// `req`, creates an operation record and its first "in progress" entry,
    /// then runs the import in a detached task that closes over `self` and
    /// records completion or failure on the returned [`OperationContext`].
    pub async fn create_import_operation(
        self: &Arc<Self>,
        state_dir: &Path,
        req: ImportRequest,
    ) -> Result<Arc<OperationContext>, Error>
    where
        B: 'static,
        S: 'static,
    {
        if req.locator.repository.is_empty() || req.locator.name.is_empty() {
            return Err(CoreError::BadParameter("import request missing repository or name".into()).into());
        }

        let manifest = manifest::parse(&req.manifest_bytes)?;
        for dep in manifest.dependencies.packages.iter().chain(manifest.dependencies.apps.iter()) {
            if self.store.read_envelope(dep).await.is_err() {
                return Err(CoreError::BadParameter(format!("dependency {dep} not present in target store")).into());
            }
        }

        let op = Arc::new(OperationContext::new(state_dir, req.locator.to_string(), req.progress_tx).await?);
        op.update(UpdateStep {
            completion: 0,
            message: "import started".into(),
        })
        .await?;

        let service = Arc::clone(self);
        let op_bg = Arc::clone(&op);
        let ImportRequest {
            locator,
            manifest_bytes,
            body,
            labels,
            ..
        } = req;
        tokio::spawn(async move {
            match service.create_with_manifest(&locator, &manifest_bytes, &body, labels).await {
                Ok(_) => {
                    let _ = op_bg
                        .update(UpdateStep {
                            completion: 100,
                            message: "import complete".into(),
                        })
                        .await;
                }
                Err(e) => {
                    let _ = op_bg.fail(e.to_string()).await;
                }
            }
        });

        Ok(op)
    }

    /// Builds a self-contained installer tarball (spec §6.3). The composed
    /// layout is staged through a [`vfs::tree::Tree`] so implicit parent
    /// directories (e.g. `packages/apps/`) are synthesized once regardless
    /// of how many package paths land under them, then walked in sorted
    /// order to write the tar stream.
    pub async fn get_app_installer(&self, loc: &Locator, incremental: bool) -> Result<Vec<u8>, Error> {
        let app = self.get(loc).await?;
        let manifest_bytes = app.envelope.manifest.clone().unwrap_or_default();

        let mut builder = TreeBuilder::<InstallerEntry>::new();
        let mut bodies: HashMap<String, Vec<u8>> = HashMap::new();

        let stage = |builder: &mut TreeBuilder<InstallerEntry>, bodies: &mut HashMap<String, Vec<u8>>, path: &str, mode: u32, data: Vec<u8>| {
            builder.push(InstallerEntry {
                path: format!("/{path}"),
                mode,
                is_dir: false,
            });
            bodies.insert(path.to_owned(), data);
        };

        stage(&mut builder, &mut bodies, "app.yaml", 0o644, manifest_bytes);

        if let Some(gravity_loc) = app.manifest.dependencies.packages.iter().find(|d| d.name == "gravity") {
            let (_, body) = self.store.read(gravity_loc).await?;
            stage(&mut builder, &mut bodies, "gravity", 0o755, body);
        }

        let mut to_pack = vec![loc.clone()];
        to_pack.extend(app.manifest.dependencies.packages.iter().cloned());
        to_pack.extend(app.manifest.dependencies.apps.iter().cloned());
        for pkg_loc in to_pack {
            let (_, body) = self.store.read(&pkg_loc).await?;
            let path = format!("packages/{}/{}/{}.pkg", pkg_loc.repository, pkg_loc.name, pkg_loc.version);
            stage(&mut builder, &mut bodies, &path, 0o644, body);
        }

        stage(&mut builder, &mut bodies, "gravity.db", 0o644, b"{}".to_vec());

        if matches!(app.manifest.kind, Kind::Bundle | Kind::Cluster) {
            let scripts: &[(&str, u32)] = &[
                ("upload", 0o755),
                ("upgrade", 0o755),
                ("run_preflight_checks", 0o755),
                ("README", 0o644),
            ];
            for (name, mode) in scripts {
                stage(&mut builder, &mut bodies, name, *mode, installer_script(name).into_bytes());
            }
            if !incremental {
                stage(&mut builder, &mut bodies, "install", 0o755, installer_script("install").into_bytes());
            }
        }

        builder.bake();
        let tree = builder.tree().map_err(|e| Error::Archive(e.to_string()))?;

        let mut out = Vec::new();
        {
            let mut tar_builder = tar::Builder::new(GzEncoder::new(&mut out, Compression::default()));
            for entry in tree.iter() {
                if entry.is_dir {
                    continue;
                }
                let relative = entry.path.trim_start_matches('/');
                let data = bodies.get(relative).expect("every staged file has a body");
                append_bytes(&mut tar_builder, relative, entry.mode, data)?;
            }
            tar_builder.into_inner()?.finish()?;
        }

        Ok(out)
    }
}

fn installer_script(name: &str) -> String {
    match name {
        "README" => "See install, upload, upgrade and run_preflight_checks.\n".to_owned(),
        _ => format!("#!/bin/sh\nexec ./gravity {name} \"$@\"\n"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::locator::LocatorVersion;
    use crate::testkit::{MemoryBackend, MemoryBlobStore};
    use chrono::Utc;

    fn manifest_bytes(kind: &str, name: &str, base: Option<&str>) -> Vec<u8> {
        let base_block = base
            .map(|b| format!("base:\n  repository: apps\n  name: {b}\n  version: 1.0.0\n"))
            .unwrap_or_default();
        format!(
            "kind: {kind}\nmetadata:\n  repository: apps\n  name: {name}\n  version: 1.0.0\n  hidden: false\n  created_timestamp: {now}\n{base_block}",
            now = Utc::now().to_rfc3339()
        )
        .into_bytes()
    }

    fn package_body(manifest: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(GzEncoder::new(&mut out, Compression::default()));
            append_bytes(&mut builder, "resources/app.yaml", 0o644, manifest).unwrap();
            append_bytes(&mut builder, "resources/resources.yaml", 0o644, b"kind: ConfigMap\n").unwrap();
            append_bytes(&mut builder, "resources/config/config.yaml", 0o644, b"key: value\n").unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        out
    }

    fn service() -> AppService<MemoryBackend, MemoryBlobStore> {
        let store = PackageStore::new(Arc::new(MemoryBackend::new()), Arc::new(MemoryBlobStore::new()));
        AppService::new(store, None, None)
    }

    fn loc(name: &str) -> Locator {
        Locator::new("apps", name, LocatorVersion::Concrete("1.0.0".parse().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips_manifest() {
        let svc = service();
        let body = package_body(&manifest_bytes("Application", "demo", None));
        svc.create(&loc("demo"), &body, HashMap::new()).await.unwrap();

        let app = svc.get(&loc("demo")).await.unwrap();
        assert_eq!(app.manifest.metadata.name, "demo");
    }

    #[tokio::test]
    async fn get_app_resources_contains_only_resources_subtree() {
        let svc = service();
        let body = package_body(&manifest_bytes("Application", "demo", None));
        svc.create(&loc("demo"), &body, HashMap::new()).await.unwrap();

        let resources = svc.get_app_resources(&loc("demo")).await.unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(resources.as_slice()));
        let names: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_app_and_resources_cache() {
        let svc = service();
        let body = package_body(&manifest_bytes("Application", "demo", None));
        svc.create(&loc("demo"), &body, HashMap::new()).await.unwrap();
        svc.get_app_resources(&loc("demo")).await.unwrap();

        svc.delete(DeleteRequest {
            locator: loc("demo"),
            force: false,
        })
        .await
        .unwrap();

        assert!(svc.get(&loc("demo")).await.is_err());
        assert!(svc.get_app_manifest(&resources_cache_locator(&loc("demo"))).await.is_err());
    }

    #[tokio::test]
    async fn delete_without_force_rejects_referenced_base() {
        let svc = service();
        let base_body = package_body(&manifest_bytes("Application", "base", None));
        svc.create(&loc("base"), &base_body, HashMap::new()).await.unwrap();

        let derived_body = package_body(&manifest_bytes("Application", "derived", Some("base")));
        svc.create(&loc("derived"), &derived_body, HashMap::new()).await.unwrap();

        let err = svc
            .delete(DeleteRequest {
                locator: loc("base"),
                force: false,
            })
            .await;
        assert!(matches!(err, Err(Error::Core(CoreError::BadParameter(_)))));

        svc.delete(DeleteRequest {
            locator: loc("base"),
            force: true,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rebuild_index_restores_helm_entries() {
        let svc = service();
        let mut labels = HashMap::new();
        labels.insert("kind".to_owned(), "helm".to_owned());
        let body = package_body(&manifest_bytes("Application", "alpine", None));
        svc.create(&loc("alpine"), &body, labels).await.unwrap();

        assert_eq!(svc.chart_index_entries().len(), 1);
        svc.index.rebuild(vec![]);
        assert_eq!(svc.chart_index_entries().len(), 0);

        svc.rebuild_index("apps").await.unwrap();
        assert_eq!(svc.chart_index_entries().len(), 1);
    }

    #[tokio::test]
    async fn create_import_operation_completes_in_background() {
        let svc = Arc::new(service());
        let manifest = manifest_bytes("Application", "demo", None);
        let body = package_body(&manifest);
        let tmp = tempfile::tempdir().unwrap();

        let op = svc
            .create_import_operation(
                tmp.path(),
                ImportRequest {
                    locator: loc("demo"),
                    manifest_bytes: manifest,
                    body,
                    labels: HashMap::new(),
                    progress_tx: None,
                },
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if op.state().await == ops::State::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(op.state().await, ops::State::Completed);
        assert!(svc.get(&loc("demo")).await.is_ok());
    }

    #[tokio::test]
    async fn create_import_operation_rejects_missing_dependency() {
        let svc = Arc::new(service());
        let tmp = tempfile::tempdir().unwrap();
        let manifest = format!(
            "kind: Application\nmetadata:\n  repository: apps\n  name: demo\n  version: 1.0.0\n  hidden: false\n  created_timestamp: {now}\ndependencies:\n  packages:\n    - repository: apps\n      name: missing-dep\n      version: 1.0.0\n",
            now = Utc::now().to_rfc3339()
        )
        .into_bytes();
        let body = package_body(&manifest);

        let err = svc
            .create_import_operation(
                tmp.path(),
                ImportRequest {
                    locator: loc("demo"),
                    manifest_bytes: manifest,
                    body,
                    labels: HashMap::new(),
                    progress_tx: None,
                },
            )
            .await;
        assert!(matches!(err, Err(Error::Core(CoreError::BadParameter(_)))));
    }

    #[tokio::test]
    async fn installer_packs_nested_package_paths_for_every_dependency() {
        let svc = service();
        svc.store()
            .create(&loc("gravity"), b"gravity-binary", WriteOptions::default())
            .await
            .unwrap();
        svc.store()
            .create(&loc("dep"), b"dep-body", WriteOptions::default())
            .await
            .unwrap();

        let manifest = format!(
            "kind: Bundle\nmetadata:\n  repository: apps\n  name: demo\n  version: 1.0.0\n  hidden: false\n  created_timestamp: {now}\ndependencies:\n  packages:\n    - repository: apps\n      name: gravity\n      version: 1.0.0\n    - repository: apps\n      name: dep\n      version: 1.0.0\n",
            now = Utc::now().to_rfc3339()
        )
        .into_bytes();
        svc.create(&loc("demo"), &package_body(&manifest), HashMap::new()).await.unwrap();

        let installer = svc.get_app_installer(&loc("demo"), true).await.unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(installer.as_slice()));
        let names: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().into_owned().to_string_lossy().into_owned())
            .collect();

        assert!(names.contains(&"gravity".to_string()));
        assert!(names.contains(&"packages/apps/gravity/1.0.0.pkg".to_string()));
        assert!(names.contains(&"packages/apps/dep/1.0.0.pkg".to_string()));
        assert!(names.contains(&"packages/apps/demo/1.0.0.pkg".to_string()));
    }

    #[tokio::test]
    async fn installer_omits_install_script_when_incremental() {
        let svc = service();
        let body = package_body(&manifest_bytes("Bundle", "demo", None));
        svc.create(&loc("demo"), &body, HashMap::new()).await.unwrap();

        let installer = svc.get_app_installer(&loc("demo"), true).await.unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(installer.as_slice()));
        let names: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().into_owned().to_string_lossy().into_owned())
            .collect();

        assert!(!names.contains(&"install".to_string()));
        assert!(names.contains(&"upload".to_string()));
    }
}
