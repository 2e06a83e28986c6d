// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory reference implementations of the narrow collaborator traits
//! (spec §6.6, §8 "Test tooling"). Used by this crate's own tests and
//! available for downstream integration tests; never wired as a default
//! production backend — there is no such thing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::backend::{
    Backend, BlobStore, ChartRepository, ImageClient, Key, KubeHooks, RegistryClient, RuntimeImageTranslator, SiteIndex,
};
use crate::error::CoreError;
use crate::locator::Locator;

/// In-memory [`Backend`] backed by a `Mutex<HashMap>`. Not for production
/// use; exists to exercise the core's own logic without a real key-value
/// store.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<Key, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &Key) -> Result<Vec<u8>, CoreError> {
        self.records.lock().unwrap().get(key).cloned().ok_or(CoreError::NotFound)
    }

    async fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), CoreError> {
        self.records.lock().unwrap().insert(key.clone(), value);
        Ok(())
    }

    async fn create(&self, key: &Key, value: Vec<u8>) -> Result<(), CoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(key) {
            return Err(CoreError::AlreadyExists);
        }
        records.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), CoreError> {
        self.records
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }

    async fn list_prefix(&self, prefix: &Key) -> Result<Vec<(Key, Vec<u8>)>, CoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| prefix.prefix(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// In-memory [`BlobStore`]. Writes buffer in memory and land in the map on
/// [`BlobStore::finish`], mirroring the rename-from-temp atomicity contract
/// without touching a real filesystem.
#[derive(Default)]
pub struct MemoryBlobStore {
    pending: Mutex<HashMap<String, Vec<u8>>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct PendingWriter {
    hint: String,
    buffer: Vec<u8>,
}

impl AsyncWrite for PendingWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.buffer.extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

impl Drop for PendingWriter {
    fn drop(&mut self) {
        // Best-effort; tests call `finish` explicitly to commit a hint.
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, hint: &str) -> Result<Box<dyn AsyncWrite + Send + Unpin>, CoreError> {
        let writer = PendingWriter {
            hint: hint.to_owned(),
            buffer: Vec::new(),
        };
        self.pending.lock().unwrap().insert(hint.to_owned(), Vec::new());
        Ok(Box::new(writer))
    }

    async fn finish(&self, hint: &str, digest: &str) -> Result<(), CoreError> {
        let data = self
            .pending
            .lock()
            .unwrap()
            .remove(hint)
            .ok_or_else(|| CoreError::BadParameter(format!("no pending write for {hint}")))?;
        self.blobs.lock().unwrap().insert(digest.to_owned(), data);
        Ok(())
    }

    async fn read(&self, digest: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, CoreError> {
        let data = self.blobs.lock().unwrap().get(digest).cloned().ok_or(CoreError::NotFound)?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn delete(&self, digest: &str) -> Result<(), CoreError> {
        self.blobs
            .lock()
            .unwrap()
            .remove(digest)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }
}

impl MemoryBlobStore {
    /// Directly seed a blob, bypassing the write/finish dance; handy for
    /// tests that only need to read a known body back.
    pub fn seed(&self, digest: &str, data: Vec<u8>) {
        self.blobs.lock().unwrap().insert(digest.to_owned(), data);
    }
}

/// Fixed-membership [`SiteIndex`]: the set of installed applications is set
/// up front by the test, never mutated by the core.
#[derive(Default)]
pub struct FixedSiteIndex {
    installed: Vec<Locator>,
}

impl FixedSiteIndex {
    pub fn new(installed: Vec<Locator>) -> Self {
        Self { installed }
    }
}

#[async_trait]
impl SiteIndex for FixedSiteIndex {
    async fn installed_applications(&self) -> Result<Vec<Locator>, CoreError> {
        Ok(self.installed.clone())
    }
}

/// No-op [`KubeHooks`] that records calls for assertions, always succeeding.
#[derive(Default)]
pub struct RecordingKubeHooks {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl KubeHooks for RecordingKubeHooks {
    async fn run_install(&self, loc: &Locator) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(format!("install:{loc}"));
        Ok(())
    }

    async fn run_update(&self, loc: &Locator) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(format!("update:{loc}"));
        Ok(())
    }

    async fn run_rollback(&self, loc: &Locator) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(format!("rollback:{loc}"));
        Ok(())
    }
}

/// No-op [`ChartRepository`] that records calls for assertions.
#[derive(Default)]
pub struct RecordingChartRepository {
    pub published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChartRepository for RecordingChartRepository {
    async fn publish(&self, name: &str, version: &str, _digest: &str) -> Result<(), CoreError> {
        self.published.lock().unwrap().push((name.to_owned(), version.to_owned()));
        Ok(())
    }

    async fn unpublish(&self, name: &str, version: &str) -> Result<(), CoreError> {
        self.published.lock().unwrap().retain(|(n, v)| !(n == name && v == version));
        Ok(())
    }
}

/// In-memory [`ImageClient`]: images "exist locally" once pulled or tagged;
/// pull/tag calls are recorded for assertions.
#[derive(Default)]
pub struct RecordingImageClient {
    present: Mutex<std::collections::HashSet<String>>,
    pub pulls: Mutex<Vec<String>>,
    pub tags: Mutex<Vec<(String, String)>>,
}

impl RecordingImageClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an image as already present, so a vendoring pass skips pulling it.
    pub fn seed_present(&self, image: &str) {
        self.present.lock().unwrap().insert(image.to_owned());
    }
}

#[async_trait]
impl ImageClient for RecordingImageClient {
    async fn exists_locally(&self, image: &str) -> Result<bool, CoreError> {
        Ok(self.present.lock().unwrap().contains(image))
    }

    async fn pull(&self, image: &str) -> Result<(), CoreError> {
        self.pulls.lock().unwrap().push(image.to_owned());
        self.present.lock().unwrap().insert(image.to_owned());
        Ok(())
    }

    async fn tag(&self, image: &str, new_ref: &str) -> Result<(), CoreError> {
        self.tags.lock().unwrap().push((image.to_owned(), new_ref.to_owned()));
        self.present.lock().unwrap().insert(new_ref.to_owned());
        Ok(())
    }
}

/// No-op [`RuntimeImageTranslator`] that records calls for assertions.
#[derive(Default)]
pub struct RecordingRuntimeTranslator {
    pub calls: Mutex<Vec<(String, Locator)>>,
}

#[async_trait]
impl RuntimeImageTranslator for RecordingRuntimeTranslator {
    async fn translate(&self, base_image: &str, locator: &Locator) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push((base_image.to_owned(), locator.clone()));
        Ok(())
    }
}

/// In-memory [`RegistryClient`]: `push_dir`/`fetch_into` just record their
/// arguments, `image_exists` answers from a seeded set.
#[derive(Default)]
pub struct RecordingRegistryClient {
    pub pushes: Mutex<Vec<(std::path::PathBuf, String)>>,
    pub fetches: Mutex<Vec<(std::path::PathBuf, String)>>,
    present: Mutex<std::collections::HashSet<(String, String, String)>>,
}

impl RecordingRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_present(&self, registry_url: &str, repository: &str, tag: &str) {
        self.present
            .lock()
            .unwrap()
            .insert((registry_url.to_owned(), repository.to_owned(), tag.to_owned()));
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistryClient {
    async fn push_dir(&self, dir: &std::path::Path, registry_addr: &str) -> Result<(), CoreError> {
        self.pushes.lock().unwrap().push((dir.to_owned(), registry_addr.to_owned()));
        Ok(())
    }

    async fn fetch_into(&self, dir: &std::path::Path, image: &str) -> Result<(), CoreError> {
        self.fetches.lock().unwrap().push((dir.to_owned(), image.to_owned()));
        Ok(())
    }

    async fn image_exists(&self, registry_url: &str, repository: &str, tag: &str) -> Result<bool, CoreError> {
        Ok(self
            .present
            .lock()
            .unwrap()
            .contains(&(registry_url.to_owned(), repository.to_owned(), tag.to_owned())))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_backend_create_then_create_again_fails() {
        let backend = MemoryBackend::new();
        let key = Key("a".into());
        backend.create(&key, b"one".to_vec()).await.unwrap();
        assert_eq!(backend.create(&key, b"two".to_vec()).await, Err(CoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn memory_backend_list_prefix_filters() {
        let backend = MemoryBackend::new();
        backend.put(&Key("envelope/a".into()), vec![1]).await.unwrap();
        backend.put(&Key("envelope/b".into()), vec![2]).await.unwrap();
        backend.put(&Key("operation/c".into()), vec![3]).await.unwrap();

        let results = backend.list_prefix(&Key("envelope/".into())).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn memory_blob_store_seed_and_read() {
        let blobs = MemoryBlobStore::new();
        blobs.seed("abc123", b"hello".to_vec());

        use tokio::io::AsyncReadExt;
        let mut reader = blobs.read("abc123").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }
}
