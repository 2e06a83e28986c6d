// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Application packaging and lifecycle core: content-addressed package
//! storage, manifest resolution and merging, image vendoring, dependency-aware
//! replication between two package stores, and the long-running operation
//! bookkeeping that sits above them (spec §1).

pub mod app;
pub mod backend;
pub mod concurrency;
pub mod config;
pub mod environment;
pub mod error;
pub mod layered;
pub mod locator;
pub mod manifest;
pub mod ops;
pub mod pull;
pub mod registry;
pub mod store;
pub mod testkit;
pub mod vendor;
pub mod walker;

pub use app::{AppService, Application};
pub use backend::{Backend, BlobStore, ChartRepository, ImageClient, KubeHooks, RegistryClient, RuntimeImageTranslator, SiteIndex};
pub use config::{PullConfig, StoreConfig, VendorConfig};
pub use error::CoreError;
pub use layered::LayeredStore;
pub use locator::{Locator, LocatorVersion};
pub use manifest::Manifest;
pub use ops::OperationContext;
pub use pull::Puller;
pub use registry::RegistrySyncer;
pub use store::PackageStore;
