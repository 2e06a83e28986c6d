// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A minimal virtual filesystem tree used to compose layered package stores
//! and assemble the installer tarball (`corepack::layered`, `corepack::app`)
//! without conflicting paths between the two stacked layers.
pub mod path;
pub mod tree;
