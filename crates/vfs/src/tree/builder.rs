// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Build a [`Tree`] incrementally from a flat, possibly-overlapping list of
//! entries: directories implied by a deep path (e.g. the parents of
//! `/etc/app/config.yaml`) are synthesized automatically and suppressed again
//! if the caller also pushed them explicitly, which is how a layered store's
//! upper layer can contribute just the files it changed without restating
//! every directory in the lower layer above them.
use std::collections::BTreeMap;

use crate::path;
use crate::tree::{File, Kind, Tree};

use super::{BlitFile, Error};

/// Builder used to generate a full tree, free of conflicts
pub struct TreeBuilder<T: BlitFile> {
    // Explicitly requested incoming paths
    explicit: Vec<T>,

    // Implicitly created paths
    implicit_dirs: BTreeMap<String, T>,
}

/// Special sort algorithm for files by directory
fn sorted_paths<T: BlitFile>(a: &T, b: &T) -> std::cmp::Ordering {
    let a_path_len = a.path().matches('/').count();
    let b_path_len = b.path().matches('/').count();
    if a_path_len != b_path_len {
        a_path_len.cmp(&b_path_len)
    } else {
        a.path().cmp(&b.path())
    }
}

impl<T: BlitFile> Default for TreeBuilder<T> {
    fn default() -> Self {
        TreeBuilder::new()
    }
}

impl<T: BlitFile> TreeBuilder<T> {
    pub fn new() -> Self {
        TreeBuilder {
            explicit: vec![],
            implicit_dirs: BTreeMap::new(),
        }
    }

    /// Push an item to the builder - we don't care if we have duplicates yet
    pub fn push(&mut self, item: T) {
        let path = item.path();

        // Find all parent paths
        if let Some(parent) = path::parent(&path) {
            let mut leading_path: Option<String> = None;
            // Build a set of parent paths skipping `/`, yielding `usr`, `usr/bin`, etc.
            for component in path::components(parent) {
                let full_path = match leading_path {
                    Some(fp) => path::join(&fp, component),
                    None => component.to_string(),
                };
                leading_path = Some(full_path.clone());
                self.implicit_dirs.insert(full_path.clone(), full_path.into());
            }
        }
        self.explicit.push(item);
    }

    /// Sort incoming entries and remove duplicates
    pub fn bake(&mut self) {
        self.explicit.sort_by(sorted_paths);

        // Walk again to remove accidental dupes
        for i in self.explicit.iter() {
            self.implicit_dirs.remove(&i.path());
        }
    }

    /// Generate the final tree by baking all inputs
    pub fn tree(&self) -> Result<Tree<T>, Error> {
        // Chain all directories, replace implicits with explicit
        let all_dirs = self
            .explicit
            .iter()
            .filter(|f| matches!(f.kind(), Kind::Directory))
            .chain(self.implicit_dirs.values())
            .map(|d| (d.path(), d))
            .collect::<BTreeMap<_, _>>();

        // build a set of redirects
        let mut redirects = BTreeMap::new();

        // Resolve symlinks-to-dirs
        for link in self.explicit.iter() {
            if let Kind::Symlink(target) = link.kind() {
                let path = link.path();

                // Resolve the link.
                let target = if target.starts_with('/') {
                    target
                } else {
                    let parent = path::parent(&path);
                    if let Some(parent) = parent {
                        path::join(parent, &target)
                    } else {
                        target
                    }
                };
                if all_dirs.contains_key(&target) {
                    redirects.insert(path, target);
                }
            }
        }

        // Insert everything WITHOUT redirects, directory first.
        let mut full_set = all_dirs
            .into_values()
            .chain(self.explicit.iter().filter(|m| !matches!(m.kind(), Kind::Directory)))
            .collect::<Vec<_>>();
        full_set.sort_by(|a, b| sorted_paths(*a, *b));

        let mut tree: Tree<T> = Tree::new();

        // Build the initial full tree now.
        for entry in full_set {
            // New node for this guy
            let path = entry.path();
            let node = tree.new_node(File::new(entry.clone()));

            if let Some(parent) = path::parent(&path) {
                tree.add_child_to_node(node, parent)?;
            }
        }

        // Reparent any symlink redirects.
        for (source_tree, target_tree) in redirects {
            tree.reparent(&source_tree, &target_tree)?;
        }
        Ok(tree)
    }
}
