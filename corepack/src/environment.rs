// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Process-wide tuning constants (spec §5 Concurrency & Resource Model).

use std::time::Duration;

/// Default bound for "at most N in-flight" package-dependency pulls (§4.7)
/// when the caller doesn't specify a degree.
pub const MAX_DISK_CONCURRENCY: usize = 16;

/// Default bound for in-flight image pull/push operations (§4.5 point 6)
/// when the caller passes a negative (unbounded) degree; kept finite so the
/// semaphore type stays uniform rather than branching on "truly unbounded".
pub const MAX_NETWORK_CONCURRENCY: usize = 8;

/// Buffer size used when streaming package bodies to/from the blob store.
pub const FILE_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Default outer deadline for transient-error retries (§7).
pub const TRANSIENT_ERROR_TIMEOUT: Duration = Duration::from_secs(30);

/// Constant backoff between transient-error retry attempts (§7).
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Hard-coded legacy runtime package names that force a collision-avoidance
/// suffix in `vendor::naming` (§4.5).
pub const LEGACY_RUNTIME_PACKAGE_NAMES: &[&str] = &["planet-master", "planet-node"];

/// Hard-coded default container image appended to every vendoring pass
/// (§4.5 point 5), independent of what the manifest itself references.
pub const DEFAULT_CONTAINER_IMAGE: &str = "quay.io/gravitational/debian-tall:0.0.1";

/// Container image used for the three synthesized wormhole hook jobs when
/// `providers.generic.networking.type == wireguard` (§4.5 point 3).
pub const WORMHOLE_HOOK_IMAGE: &str = "quay.io/gravitational/wormhole:0.0.1";
