// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The wire-visible error taxonomy (spec §6.5, §7).
//!
//! Every component error enum wraps [`CoreError`] for the cases that must
//! cross a component boundary unchanged, and adds structural variants for
//! everything local to that component, following the one-enum-per-module
//! convention used throughout this crate.

use thiserror::Error;

/// The seven error kinds carried over the (out-of-scope) RPC boundary as a
/// JSON envelope of `{message}` plus a retained stack-trace string. This type
/// only models the kind; the envelope itself is the HTTP layer's concern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("access denied")]
    AccessDenied,

    #[error("connection problem: {0}")]
    ConnectionProblem(String),

    #[error("compare failed")]
    CompareFailed,

    #[error("limit exceeded")]
    LimitExceeded,
}

impl CoreError {
    /// Classifies the transient errors of §7: connection reset/refused, an
    /// etcd "cluster unavailable" message, a Kubernetes 500 carrying an etcd
    /// message, or a context deadline on a single attempt. These are the
    /// only kinds the Puller and package-copy layer retry; everything else
    /// is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::ConnectionProblem(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("reset")
                    || msg.contains("refused")
                    || msg.contains("cluster unavailable")
                    || msg.contains("deadline")
                    || msg.contains("timed out")
            }
            _ => false,
        }
    }

    pub fn bad_parameter(msg: impl Into<String>) -> Self {
        CoreError::BadParameter(msg.into())
    }
}
