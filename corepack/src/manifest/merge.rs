// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Field-specific merge rules applied when resolving a manifest against its
//! `base` (spec §4.3).

use std::collections::HashSet;

use crate::locator::Locator;

use super::{Endpoint, Error, Manifest};

fn dep_key(loc: &Locator) -> (&str, &str) {
    (&loc.repository, &loc.name)
}

/// Concatenation, base first, de-duplicated by `(repository, name)`; the
/// target's version wins on conflict.
fn merge_dependency_list(base: &[Locator], target: &[Locator]) -> Vec<Locator> {
    let target_keys: HashSet<_> = target.iter().map(dep_key).collect();

    base.iter()
        .filter(|loc| !target_keys.contains(&dep_key(loc)))
        .cloned()
        .chain(target.iter().cloned())
        .collect()
}

/// Union keyed by `name`; the target's definition wins on conflict.
fn merge_endpoints(base: &[Endpoint], target: &[Endpoint]) -> Vec<Endpoint> {
    let target_names: HashSet<_> = target.iter().map(|e| e.name.as_str()).collect();

    base.iter()
        .filter(|e| !target_names.contains(e.name.as_str()))
        .cloned()
        .chain(target.iter().cloned())
        .collect()
}

fn union(base: &[String], target: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for item in base.iter().chain(target.iter()) {
        if seen.insert(item.as_str()) {
            out.push(item.clone());
        }
    }
    out
}

/// Merges `base` and a more-derived `target` manifest per the field-specific
/// rules of spec §4.3, returning the merged result (conceptually "target,
/// with gaps filled from base").
pub fn merge(base: Manifest, target: Manifest) -> Result<Manifest, Error> {
    let mut result = target.clone();

    result.dependencies.packages = merge_dependency_list(&base.dependencies.packages, &target.dependencies.packages);
    result.dependencies.apps = merge_dependency_list(&base.dependencies.apps, &target.dependencies.apps);

    result.endpoints = merge_endpoints(&base.endpoints, &target.endpoints);

    result.installer.setup_endpoints = if target.installer.setup_endpoints.is_empty() {
        base.installer.setup_endpoints.clone()
    } else {
        target.installer.setup_endpoints.clone()
    };

    if result.providers.aws.networking.kind.is_empty() {
        result.providers.aws.networking.kind = base.providers.aws.networking.kind.clone();
    }
    if result.providers.generic.networking.kind.is_empty() {
        result.providers.generic.networking.kind = base.providers.generic.networking.kind.clone();
    }

    if result.providers.aws.iam_policy.version.is_empty() {
        result.providers.aws.iam_policy.version = base.providers.aws.iam_policy.version.clone();
    }
    result.providers.aws.iam_policy.actions = union(&base.providers.aws.iam_policy.actions, &target.providers.aws.iam_policy.actions);

    if result.system_options.dependencies.runtime.is_none() {
        result.system_options.dependencies.runtime = base.system_options.dependencies.runtime.clone();
    }

    Ok(result)
}
