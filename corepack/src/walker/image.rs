// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Container image reference discovery over parsed Kubernetes resource
//! documents (spec §4.4 `Images()`/`RewriteImages`).

use serde_yaml::Value;

/// A path segment into a `serde_yaml::Value` tree, used to locate an image
/// string for in-place rewriting without re-walking the whole document.
#[derive(Debug, Clone)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// One discovered image reference: which document, where in it, and the
/// string value found there.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub path: Vec<Segment>,
    pub image: String,
}

/// Container spec locations recognized by kind/apiVersion (spec §4.4: "pod
/// and container specs"). Anything outside this set is an unrecognized
/// object — its images simply aren't extracted, and the walker flags it
/// separately rather than failing the walk.
fn container_spec_paths(kind: &str) -> Option<Vec<Vec<Segment>>> {
    use Segment::*;
    match kind {
        "Pod" => Some(vec![
            vec![Key("spec".into()), Key("containers".into())],
            vec![Key("spec".into()), Key("initContainers".into())],
        ]),
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => Some(vec![
            vec![Key("spec".into()), Key("template".into()), Key("spec".into()), Key("containers".into())],
            vec![
                Key("spec".into()),
                Key("template".into()),
                Key("spec".into()),
                Key("initContainers".into()),
            ],
        ]),
        "CronJob" => Some(vec![vec![
            Key("spec".into()),
            Key("jobTemplate".into()),
            Key("spec".into()),
            Key("template".into()),
            Key("spec".into()),
            Key("containers".into()),
        ]]),
        _ => None,
    }
}

fn value_at<'a>(root: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match (segment, current) {
            (Segment::Key(k), Value::Mapping(m)) => m.get(Value::String(k.clone()))?,
            (Segment::Index(i), Value::Sequence(s)) => s.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn value_at_mut<'a>(root: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path {
        current = match (segment, current) {
            (Segment::Key(k), Value::Mapping(m)) => m.get_mut(Value::String(k.clone()))?,
            (Segment::Index(i), Value::Sequence(s)) => s.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Extracts image references from a single document. Returns `None` when the
/// document's `kind`/`apiVersion` isn't a recognized container-bearing
/// shape, which the caller treats as an unrecognized object.
pub fn extract(document: &Value) -> Option<Vec<ImageRef>> {
    let kind = document.get("kind")?.as_str()?;
    let container_paths = container_spec_paths(kind)?;

    let mut refs = Vec::new();
    for base_path in container_paths {
        let Some(Value::Sequence(containers)) = value_at(document, &base_path) else {
            continue;
        };

        for (i, container) in containers.iter().enumerate() {
            let Some(image) = container.get("image").and_then(Value::as_str) else {
                continue;
            };

            let mut path = base_path.clone();
            path.push(Segment::Index(i));
            path.push(Segment::Key("image".into()));

            refs.push(ImageRef {
                path,
                image: image.to_owned(),
            });
        }
    }

    Some(refs)
}

/// Applies `f` to every image reference previously located by [`extract`],
/// mutating `document` in place.
pub fn rewrite(document: &mut Value, refs: &[ImageRef], f: &dyn Fn(&str) -> String) {
    for r in refs {
        if let Some(slot) = value_at_mut(document, &r.path) {
            *slot = Value::String(f(&r.image));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn deployment(image: &str) -> Value {
        serde_yaml::from_str(&format!(
            r#"
apiVersion: apps/v1
kind: Deployment
spec:
  template:
    spec:
      containers:
        - name: app
          image: {image}
"#
        ))
        .unwrap()
    }

    #[test]
    fn extracts_image_from_deployment() {
        let doc = deployment("nginx:1.0.0");
        let refs = extract(&doc).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].image, "nginx:1.0.0");
    }

    #[test]
    fn returns_none_for_unrecognized_kind() {
        let doc: Value = serde_yaml::from_str("apiVersion: v1\nkind: ConfigMap\ndata: {}").unwrap();
        assert!(extract(&doc).is_none());
    }

    #[test]
    fn rewrite_replaces_image_in_place() {
        let mut doc = deployment("nginx:1.0.0");
        let refs = extract(&doc).unwrap();
        rewrite(&mut doc, &refs, &|img| format!("registry.local/{img}"));

        let rewritten = extract(&doc).unwrap();
        assert_eq!(rewritten[0].image, "registry.local/nginx:1.0.0");
    }

    #[test]
    fn extracts_from_pod_init_containers() {
        let doc: Value = serde_yaml::from_str(
            r#"
apiVersion: v1
kind: Pod
spec:
  initContainers:
    - name: init
      image: busybox:1.0
  containers:
    - name: app
      image: app:1.0
"#,
        )
        .unwrap();

        let refs = extract(&doc).unwrap();
        assert_eq!(refs.len(), 2);
    }
}
