// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Format-preserving YAML editing.
//!
//! `corepack::walker` rewrites image references inside rendered Helm
//! resources in place: a [`Path`] locates the field (e.g. an image tag nested
//! under `spec.template.spec.containers[0].image`) and [`Updater`] applies the
//! replacement, leaving comments, key order and anything the caller didn't
//! touch untouched. [`format`] is used where a whole document is rebuilt from
//! a `serde` value instead (manifest normalization) and needs deterministic,
//! readable output rather than `serde_yaml`'s default flow style.

pub mod format;
pub mod updater;

pub use format::format;
pub use updater::{Path, Updater};
