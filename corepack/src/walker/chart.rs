// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Helm chart rendering (spec §4.4: "render with Helm values merged with
//! `--set` overrides"). Grounded in the `tera` templating usage seen in the
//! pack's Helm-deployment example; this isn't Helm's own template language,
//! but `tera`'s `{{ .Values.x }}`-shaped access (mapped onto a context named
//! `Values`) covers the values-substitution behavior this spec needs without
//! vendoring a full Helm engine.

use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;
use tera::{Context, Tera};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("template render failed: {0}")]
    Render(#[from] tera::Error),
    #[error("failed to parse rendered document as yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to read chart template: {0}")]
    Io(#[from] std::io::Error),
}

/// Render parameters accepted by the walker (spec §4.4: `values`, `set`,
/// `setString`, `setFile`).
#[derive(Debug, Clone, Default)]
pub struct RenderParams {
    /// Parsed `values.yaml` contents.
    pub values: HashMap<String, Value>,
    /// `--set key=value` overrides, applied on top of `values`.
    pub set: HashMap<String, String>,
    /// `--set-string key=value` overrides; always rendered as a string.
    pub set_string: HashMap<String, String>,
    /// `--set-file key=path` overrides; the caller resolves file contents
    /// before constructing `RenderParams`.
    pub set_file: HashMap<String, String>,
}

impl RenderParams {
    fn merged_context(&self) -> Context {
        let mut values = self.values.clone();

        for (k, v) in &self.set {
            values.insert(k.clone(), Value::String(v.clone()));
        }
        for (k, v) in &self.set_string {
            values.insert(k.clone(), Value::String(v.clone()));
        }
        for (k, v) in &self.set_file {
            values.insert(k.clone(), Value::String(v.clone()));
        }

        let mut ctx = Context::new();
        ctx.insert("Values", &values);
        ctx
    }
}

/// `true` when `dir` contains a Helm chart file (`Chart.yaml`) and should be
/// treated as a chart rather than walked file-by-file.
pub fn is_chart_dir(dir: &Path) -> bool {
    dir.join("Chart.yaml").exists()
}

/// Renders every `*.yaml`/`*.yml` template under `chart_dir/templates` with
/// `params`, returning one decoded document per rendered, non-empty output.
pub fn render_templates(chart_dir: &Path, params: &RenderParams) -> Result<Vec<Value>, Error> {
    let templates_dir = chart_dir.join("templates");
    if !templates_dir.is_dir() {
        return Ok(Vec::new());
    }

    let ctx = params.merged_context();
    let mut tera = Tera::default();
    let mut documents = Vec::new();

    for entry in walkdir(&templates_dir) {
        let ext = entry.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if ext != "yaml" && ext != "yml" {
            continue;
        }

        let raw = fs_err::read_to_string(&entry)?;
        let name = entry.to_string_lossy().into_owned();
        tera.add_raw_template(&name, &raw)?;
        let rendered = tera.render(&name, &ctx)?;

        for doc in rendered.split("\n---") {
            let doc = doc.trim();
            if doc.is_empty() {
                continue;
            }
            documents.push(serde_yaml::from_str(doc)?);
        }
    }

    Ok(documents)
}

fn walkdir(root: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn write_chart(dir: &Path, template: &str) {
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(dir.join("Chart.yaml"), "name: test\nversion: 0.1.0\n").unwrap();
        fs::write(dir.join("templates/deployment.yaml"), template).unwrap();
    }

    #[test]
    fn detects_chart_dir() {
        let tmp = tempfile::tempdir().unwrap();
        write_chart(tmp.path(), "kind: Deployment\n");
        assert!(is_chart_dir(tmp.path()));
    }

    #[test]
    fn non_chart_dir_is_not_detected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_chart_dir(tmp.path()));
    }

    #[test]
    fn renders_values_substitution() {
        let tmp = tempfile::tempdir().unwrap();
        write_chart(
            tmp.path(),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ Values.name }}\n",
        );

        let mut values = HashMap::new();
        values.insert("name".to_string(), Value::String("my-app".into()));
        let params = RenderParams {
            values,
            ..Default::default()
        };

        let docs = render_templates(tmp.path(), &params).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("metadata").unwrap().get("name").unwrap().as_str(), Some("my-app"));
    }

    #[test]
    fn set_override_wins_over_values() {
        let tmp = tempfile::tempdir().unwrap();
        write_chart(tmp.path(), "kind: Deployment\ntag: {{ Values.tag }}\n");

        let mut values = HashMap::new();
        values.insert("tag".to_string(), Value::String("1.0.0".into()));
        let mut set = HashMap::new();
        set.insert("tag".to_string(), "9.0.0".to_string());

        let params = RenderParams {
            values,
            set,
            ..Default::default()
        };

        let docs = render_templates(tmp.path(), &params).unwrap();
        assert_eq!(docs[0].get("tag").unwrap().as_str(), Some("9.0.0"));
    }
}
