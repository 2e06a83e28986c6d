// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PackageStore (C2): immutable, content-addressed package blobs with
//! metadata envelopes, labels, and repositories (spec §4.2).

pub mod envelope;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub use envelope::{PackageEnvelope, PackageType, WriteOptions};

use crate::backend::{Backend, BlobStore, Key};
use crate::error::CoreError;
use crate::locator::Locator;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<Error> for CoreError {
    fn from(value: Error) -> Self {
        match value {
            Error::Core(e) => e,
        }
    }
}

/// Repository metadata: a bare expiry hint, no other state (spec §4.2
/// `UpsertRepository`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RepositoryRecord {
    name: String,
    expires_at: Option<DateTime<Utc>>,
}

fn repository_key(repo: &str) -> Key {
    Key(format!("repository/{repo}"))
}

/// Read/write immutable package blobs behind a [`Backend`] (envelopes) and a
/// [`BlobStore`] (bodies).
pub struct PackageStore<B: Backend, S: BlobStore> {
    backend: Arc<B>,
    blobs: Arc<S>,
}

impl<B: Backend, S: BlobStore> Clone for PackageStore<B, S> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            blobs: self.blobs.clone(),
        }
    }
}

impl<B: Backend, S: BlobStore> PackageStore<B, S> {
    pub fn new(backend: Arc<B>, blobs: Arc<S>) -> Self {
        Self { backend, blobs }
    }

    /// Idempotent: repeated calls simply overwrite the expiry hint.
    pub async fn upsert_repository(&self, repo: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), Error> {
        let record = RepositoryRecord {
            name: repo.to_owned(),
            expires_at,
        };
        self.backend
            .put(&repository_key(repo), serde_json::to_vec(&record).expect("serializable"))
            .await?;
        Ok(())
    }

    /// Fails [`CoreError::AlreadyExists`] if `loc` is already present.
    pub async fn create(&self, loc: &Locator, body: &[u8], opts: WriteOptions) -> Result<PackageEnvelope, Error> {
        let envelope = self.write_body_and_envelope(loc, body, opts).await?;
        self.backend
            .create(&Key::envelope(loc), serde_json::to_vec(&envelope).expect("serializable"))
            .await?;
        Ok(envelope)
    }

    /// Creates or overwrites.
    pub async fn upsert(&self, loc: &Locator, body: &[u8], opts: WriteOptions) -> Result<PackageEnvelope, Error> {
        let envelope = self.write_body_and_envelope(loc, body, opts).await?;
        self.backend
            .put(&Key::envelope(loc), serde_json::to_vec(&envelope).expect("serializable"))
            .await?;
        Ok(envelope)
    }

    async fn write_body_and_envelope(
        &self,
        loc: &Locator,
        body: &[u8],
        opts: WriteOptions,
    ) -> Result<PackageEnvelope, Error> {
        let digest = hex::encode(Sha512::digest(body));

        let hint = format!("{}/{}:{}", loc.repository, loc.name, loc.version);
        let mut writer = self.blobs.write(&hint).await?;
        writer.write_all(body).await.map_err(|e| CoreError::ConnectionProblem(e.to_string()))?;
        writer.flush().await.map_err(|e| CoreError::ConnectionProblem(e.to_string()))?;
        self.blobs.finish(&hint, &digest).await?;

        Ok(PackageEnvelope {
            locator: loc.clone(),
            size: body.len() as u64,
            digest,
            created: Utc::now(),
            creator: opts.creator,
            labels: opts.labels,
            runtime_labels: HashMap::new(),
            manifest: opts.manifest,
            package_type: opts.package_type.unwrap_or(PackageType::User),
            hidden: opts.hidden,
        })
    }

    /// Returns the envelope and the body read back from the blob store by
    /// digest. The caller receives the envelope's declared size alongside
    /// the body.
    pub async fn read(&self, loc: &Locator) -> Result<(PackageEnvelope, Vec<u8>), Error> {
        let envelope = self.read_envelope(loc).await?;
        let mut reader = self.blobs.read(&envelope.digest).await?;
        let mut body = Vec::with_capacity(envelope.size as usize);
        reader
            .read_to_end(&mut body)
            .await
            .map_err(|e| CoreError::ConnectionProblem(e.to_string()))?;
        Ok((envelope, body))
    }

    pub async fn read_envelope(&self, loc: &Locator) -> Result<PackageEnvelope, Error> {
        let bytes = self.backend.get(&Key::envelope(loc)).await?;
        Ok(serde_json::from_slice(&bytes).expect("envelope record is internally well-formed"))
    }

    pub async fn list(&self, repo: &str) -> Result<Vec<PackageEnvelope>, Error> {
        let prefix = Key(format!("envelope/{repo}/"));
        let entries = self.backend.list_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).expect("envelope record is internally well-formed"))
            .collect())
    }

    pub async fn delete(&self, loc: &Locator) -> Result<(), Error> {
        let envelope = self.read_envelope(loc).await?;
        self.backend.delete(&Key::envelope(loc)).await?;
        // Best-effort: another envelope may still reference the same digest
        // (identical bodies dedupe naturally), so a failure to delete the
        // blob isn't surfaced as a store error.
        let _ = self.blobs.delete(&envelope.digest).await;
        Ok(())
    }
}
