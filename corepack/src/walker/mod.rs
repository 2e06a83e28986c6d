// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! ResourceWalker (C4): walk an unpacked application directory, classify
//! files, render Helm charts, and extract/rewrite container image
//! references (spec §4.4).

pub mod chart;
pub mod image;

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fnmatch::Pattern;
use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;

pub use chart::RenderParams;
pub use image::ImageRef;

/// Default include patterns (spec §4.4: "default matches `*.yaml`, `*.yml`,
/// `*.json`").
pub fn default_include_patterns() -> Vec<Pattern> {
    ["*.yaml", "*.yml", "*.json"]
        .iter()
        .map(|p| p.parse().expect("built-in include patterns are valid"))
        .collect()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse {path}: {source}")]
    Yaml { path: PathBuf, source: serde_yaml::Error },
    #[error(transparent)]
    Chart(#[from] chart::Error),
    #[error("failed to format {path}: {source}")]
    Format { path: PathBuf, source: yaml::format::Error },
}

/// One discovered resource file: its on-disk path, preserved file mode, the
/// parsed documents it contains (a file may hold several `---`-separated
/// documents), and — if recognized — the image references found in each.
struct ResourceFile {
    path: PathBuf,
    mode: u32,
    documents: Vec<Value>,
    /// Per-document image references, aligned by index with `documents`.
    image_refs: Vec<Vec<ImageRef>>,
    /// `true` for documents whose kind/apiVersion wasn't recognized.
    unrecognized: Vec<bool>,
}

/// Walks an unpacked application directory, classifying files as raw
/// manifest resources or Helm chart templates, extracting container image
/// references for later vendoring.
pub struct ResourceWalker {
    root: PathBuf,
    include: Vec<Pattern>,
    ignore: Vec<Regex>,
    resources: Vec<ResourceFile>,
    render_params: RenderParams,
    manifest_file_name: String,
}

/// Summary returned by [`ResourceWalker::images`] (spec §4.4 `Images()`).
#[derive(Debug, Default)]
pub struct ImageSummary {
    pub images: Vec<String>,
    pub unrecognized_objects: usize,
}

impl ResourceWalker {
    pub fn new(root: impl Into<PathBuf>, include: Vec<Pattern>, ignore: Vec<Regex>, render_params: RenderParams) -> Self {
        Self {
            root: root.into(),
            include,
            ignore,
            resources: Vec::new(),
            render_params,
            manifest_file_name: "app.yaml".to_owned(),
        }
    }

    fn matches_include(&self, relative: &str) -> bool {
        self.include.iter().any(|p| p.match_path(relative).is_some())
    }

    fn matches_ignore(&self, relative: &str) -> bool {
        self.ignore.iter().any(|r| r.is_match(relative))
    }

    /// Traverses the tree, loading chart-rendered and raw resources (spec
    /// §4.4 traversal responsibilities).
    pub fn walk(&mut self) -> Result<(), Error> {
        self.resources.clear();
        let root = self.root.clone();
        self.walk_dir(&root)
    }

    fn walk_dir(&mut self, dir: &Path) -> Result<(), Error> {
        if chart::is_chart_dir(dir) {
            let documents = chart::render_templates(dir, &self.render_params)?;
            self.load_documents(dir.join("templates/rendered.yaml"), 0o644, documents);

            let manifest_path = dir.join(&self.manifest_file_name);
            if manifest_path.is_file() {
                self.load_file(&manifest_path)?;
            }
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_dir(&path)?;
                continue;
            }

            let relative = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();

            if self.matches_ignore(&relative) || !self.matches_include(&relative) {
                continue;
            }

            self.load_file(&path)?;
        }

        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<(), Error> {
        let raw = fs_err::read_to_string(path)?;
        let mode = fs::metadata(path)?.permissions().mode();

        let mut documents = Vec::new();
        for doc in raw.split("\n---") {
            let doc = doc.trim();
            if doc.is_empty() {
                continue;
            }
            documents.push(serde_yaml::from_str(doc).map_err(|source| Error::Yaml {
                path: path.to_path_buf(),
                source,
            })?);
        }

        self.resources.push(Self::build_resource(path.to_path_buf(), mode, documents));
        Ok(())
    }

    /// Injects a synthetic resource file not read from disk — used by
    /// vendoring to add wormhole hook job specs (spec §4.5 step 3).
    pub fn add_document(&mut self, path: PathBuf, mode: u32, document: Value) {
        self.load_documents(path, mode, vec![document]);
    }

    fn load_documents(&mut self, path: PathBuf, mode: u32, documents: Vec<Value>) {
        if documents.is_empty() {
            return;
        }
        self.resources.push(Self::build_resource(path, mode, documents));
    }

    fn build_resource(path: PathBuf, mode: u32, documents: Vec<Value>) -> ResourceFile {
        let mut image_refs = Vec::with_capacity(documents.len());
        let mut unrecognized = Vec::with_capacity(documents.len());

        for doc in &documents {
            match image::extract(doc) {
                Some(refs) => {
                    image_refs.push(refs);
                    unrecognized.push(false);
                }
                None => {
                    image_refs.push(Vec::new());
                    unrecognized.push(true);
                }
            }
        }

        ResourceFile {
            path,
            mode,
            documents,
            image_refs,
            unrecognized,
        }
    }

    /// `Images() → {images, unrecognizedObjects}` (spec §4.4). Image
    /// references are deduplicated; unrecognized objects are counted, not
    /// named, and never fail the walk — they produce a caller-visible
    /// warning instead (logged by `vendor`, which owns the warning policy).
    pub fn images(&self) -> ImageSummary {
        let mut seen = HashSet::new();
        let mut images = Vec::new();
        let mut unrecognized_objects = 0;

        for resource in &self.resources {
            for refs in &resource.image_refs {
                for r in refs {
                    if seen.insert(r.image.clone()) {
                        images.push(r.image.clone());
                    }
                }
            }
            unrecognized_objects += resource.unrecognized.iter().filter(|u| **u).count();
        }

        ImageSummary {
            images,
            unrecognized_objects,
        }
    }

    /// Applies `f` to every image reference in place (spec §4.4).
    pub fn rewrite_images(&mut self, f: impl Fn(&str) -> String) {
        for resource in &mut self.resources {
            for (doc, refs) in resource.documents.iter_mut().zip(resource.image_refs.iter()) {
                image::rewrite(doc, refs, &f);
            }
        }
    }

    /// Applies a sequence of manifest-mutating functions to the root
    /// manifest file only, in declared order, short-circuiting on the first
    /// error (spec §4.4 `RewriteManifest`).
    pub fn rewrite_manifest<E>(&mut self, fns: &[Box<dyn Fn(&mut Value) -> Result<(), E>>]) -> Result<(), E> {
        let Some(resource) = self
            .resources
            .iter_mut()
            .find(|r| r.path.file_name().map(|n| n == self.manifest_file_name.as_str()).unwrap_or(false))
        else {
            return Ok(());
        };

        for f in fns {
            for doc in &mut resource.documents {
                f(doc)?;
            }
        }
        Ok(())
    }

    /// Serializes all mutated files back to disk, preserving original file
    /// mode (spec §4.4 `Write()`).
    pub fn write(&self) -> Result<(), Error> {
        for resource in &self.resources {
            let mut out = String::new();
            for (i, doc) in resource.documents.iter().enumerate() {
                if i > 0 {
                    out.push_str("---\n");
                }
                out.push_str(&yaml::format(doc).map_err(|source| Error::Format {
                    path: resource.path.clone(),
                    source,
                })?);
            }

            fs_err::write(&resource.path, out)?;
            fs::set_permissions(&resource.path, fs::Permissions::from_mode(resource.mode))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn deployment_yaml(image: &str) -> String {
        format!(
            "apiVersion: apps/v1\nkind: Deployment\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          image: {image}\n"
        )
    }

    #[test]
    fn walks_and_extracts_images_from_raw_resources() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("deployment.yaml"), deployment_yaml("nginx:1.0.0")).unwrap();
        fs::write(tmp.path().join("README.md"), "not a resource").unwrap();

        let mut walker = ResourceWalker::new(
            tmp.path(),
            default_include_patterns(),
            vec![],
            RenderParams::default(),
        );
        walker.walk().unwrap();

        let summary = walker.images();
        assert_eq!(summary.images, vec!["nginx:1.0.0".to_string()]);
        assert_eq!(summary.unrecognized_objects, 0);
    }

    #[test]
    fn unrecognized_objects_are_counted_not_failed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("cm.yaml"), "apiVersion: v1\nkind: ConfigMap\ndata: {}\n").unwrap();

        let mut walker = ResourceWalker::new(
            tmp.path(),
            default_include_patterns(),
            vec![],
            RenderParams::default(),
        );
        walker.walk().unwrap();

        let summary = walker.images();
        assert_eq!(summary.images.len(), 0);
        assert_eq!(summary.unrecognized_objects, 1);
    }

    #[test]
    fn ignore_pattern_skips_matching_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("deployment.yaml"), deployment_yaml("nginx:1.0.0")).unwrap();
        fs::write(tmp.path().join("skip.yaml"), deployment_yaml("skip-me:1.0.0")).unwrap();

        let mut walker = ResourceWalker::new(
            tmp.path(),
            default_include_patterns(),
            vec![Regex::new("skip\\.yaml$").unwrap()],
            RenderParams::default(),
        );
        walker.walk().unwrap();

        let summary = walker.images();
        assert_eq!(summary.images, vec!["nginx:1.0.0".to_string()]);
    }

    #[test]
    fn rewrite_images_applies_to_all_resources() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("deployment.yaml"), deployment_yaml("nginx:1.0.0")).unwrap();

        let mut walker = ResourceWalker::new(
            tmp.path(),
            default_include_patterns(),
            vec![],
            RenderParams::default(),
        );
        walker.walk().unwrap();
        walker.rewrite_images(|img| format!("registry.local/{img}"));

        let summary = walker.images();
        assert_eq!(summary.images, vec!["registry.local/nginx:1.0.0".to_string()]);
    }

    #[test]
    fn write_preserves_file_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deployment.yaml");
        fs::write(&path, deployment_yaml("nginx:1.0.0")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let mut walker = ResourceWalker::new(
            tmp.path(),
            default_include_patterns(),
            vec![],
            RenderParams::default(),
        );
        walker.walk().unwrap();
        walker.write().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
