// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Absolute-path string utilities for the tree, independent of the host
//! filesystem (`/` separators always, no `std::path::Path` normalization
//! quirks) since the paths here describe the composed install root rather
//! than files that necessarily exist on disk yet.

pub fn join(a: &str, b: &str) -> String {
    if b.starts_with('/') {
        b.to_owned()
    } else if a.ends_with('/') {
        format!("{a}{b}")
    } else {
        format!("{a}/{b}")
    }
}

pub fn file_name(path: &str) -> Option<&str> {
    path.trim_end_matches('/').rsplit('/').next()
}

pub fn parent(path: &str) -> Option<&str> {
    path.trim_end_matches('/').rsplit_once('/').map(|(parent, _)| {
        // We had to have split on a direct descendent of `/`
        if parent.is_empty() {
            "/"
        } else {
            parent
        }
    })
}

pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.starts_with('/')
        .then_some("/")
        .into_iter()
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn join_respects_absolute_rhs() {
        assert_eq!(join("/etc/app", "config.yaml"), "/etc/app/config.yaml");
        assert_eq!(join("/etc/app/", "config.yaml"), "/etc/app/config.yaml");
        assert_eq!(join("/etc/app", "/etc/override.yaml"), "/etc/override.yaml");
    }

    #[test]
    fn parent_stops_at_root() {
        assert_eq!(parent("/etc/app/config.yaml"), Some("/etc/app"));
        assert_eq!(parent("/etc"), Some("/"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn components_yields_root_then_segments() {
        let parts: Vec<_> = components("/etc/app/config.yaml").collect();
        assert_eq!(parts, vec!["/", "etc", "app", "config.yaml"]);
    }
}
