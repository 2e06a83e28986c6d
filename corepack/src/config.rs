// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Layered on-disk defaults for the vendoring and pull pipelines (spec §2
//! ambient stack). `ManifestResolver`, `Vendorer`, and `Puller` each take an
//! explicit request/config struct so a caller can always override; this
//! module only supplies what `config::Manager::load` would hand back as the
//! vendor/admin-layered default, the way the CLI/API layer constructs one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::environment::{MAX_DISK_CONCURRENCY, MAX_NETWORK_CONCURRENCY, RETRY_INTERVAL, TRANSIENT_ERROR_TIMEOUT};

/// On-disk defaults for a `Vendorer` pass (spec §4.5), loaded under the
/// `vendor` domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub registry_address: Option<String>,
    pub degree: i64,
    pub vendor_runtime: bool,
    pub runtime_repository: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            registry_address: None,
            degree: MAX_NETWORK_CONCURRENCY as i64,
            vendor_runtime: false,
            runtime_repository: "runtime".to_owned(),
        }
    }
}

impl config::Config for VendorConfig {
    fn domain() -> String {
        "vendor".to_owned()
    }

    /// Admin layers win wholesale over vendor ones, except `registry_address`
    /// which falls back to the earlier layer's value when the later layer
    /// leaves it unset.
    fn merge(self, other: Self) -> Self {
        Self {
            registry_address: other.registry_address.or(self.registry_address),
            ..other
        }
    }
}

/// On-disk defaults for a `Puller` invocation (spec §4.7), loaded under the
/// `pull` domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    pub degree: i64,
    pub transient_error_timeout_secs: u64,
    pub retry_interval_secs: u64,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            degree: MAX_DISK_CONCURRENCY as i64,
            transient_error_timeout_secs: TRANSIENT_ERROR_TIMEOUT.as_secs(),
            retry_interval_secs: RETRY_INTERVAL.as_secs(),
        }
    }
}

impl PullConfig {
    pub fn transient_error_timeout(&self) -> Duration {
        Duration::from_secs(self.transient_error_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl config::Config for PullConfig {
    fn domain() -> String {
        "pull".to_owned()
    }

    fn merge(self, other: Self) -> Self {
        other
    }
}

/// On-disk default for where a `PackageStore` keeps its state, loaded under
/// the `store` domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: Option<std::path::PathBuf>,
}

impl config::Config for StoreConfig {
    fn domain() -> String {
        "store".to_owned()
    }

    fn merge(self, other: Self) -> Self {
        Self {
            root: other.root.or(self.root),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use config::Config as _;

    #[test]
    fn vendor_config_default_matches_environment_constants() {
        let cfg = VendorConfig::default();
        assert_eq!(cfg.degree, MAX_NETWORK_CONCURRENCY as i64);
        assert!(!cfg.vendor_runtime);
    }

    #[test]
    fn vendor_config_merge_keeps_earlier_registry_address_when_unset() {
        let vendor = VendorConfig {
            registry_address: Some("registry.local".into()),
            ..VendorConfig::default()
        };
        let admin = VendorConfig {
            degree: 4,
            ..VendorConfig::default()
        };

        let merged = vendor.merge(admin);
        assert_eq!(merged.registry_address, Some("registry.local".to_string()));
        assert_eq!(merged.degree, 4);
    }

    #[test]
    fn vendor_config_merge_lets_later_layer_override_registry_address() {
        let vendor = VendorConfig {
            registry_address: Some("registry.local".into()),
            ..VendorConfig::default()
        };
        let admin = VendorConfig {
            registry_address: Some("registry.admin".into()),
            ..VendorConfig::default()
        };

        let merged = vendor.merge(admin);
        assert_eq!(merged.registry_address, Some("registry.admin".to_string()));
    }

    #[test]
    fn pull_config_default_matches_environment_constants() {
        let cfg = PullConfig::default();
        assert_eq!(cfg.degree, MAX_DISK_CONCURRENCY as i64);
        assert_eq!(cfg.transient_error_timeout(), TRANSIENT_ERROR_TIMEOUT);
        assert_eq!(cfg.retry_interval(), RETRY_INTERVAL);
    }

    #[test]
    fn pull_config_merge_takes_later_layer_wholesale() {
        let base = PullConfig::default();
        let override_cfg = PullConfig {
            degree: 1,
            transient_error_timeout_secs: 60,
            retry_interval_secs: 5,
        };
        let merged = base.merge(override_cfg.clone());
        assert_eq!(merged, override_cfg);
    }

    #[test]
    fn store_config_merge_prefers_later_root_when_set() {
        let vendor = StoreConfig {
            root: Some("/usr/share/corepack/store".into()),
        };
        let admin = StoreConfig { root: None };
        let merged = vendor.clone().merge(admin);
        assert_eq!(merged, vendor);
    }
}
