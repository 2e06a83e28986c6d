// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! OperationContext (C10): the `{Created → InProgress* → Completed | Failed}`
//! state machine backing long-running operations, with an append-only log
//! file and progress forwarding (spec §4.10).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("completion must be non-decreasing: had {had}, got {got}")]
    NonMonotonicCompletion { had: u8, got: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    InProgress,
    Completed,
    Failed,
}

/// One progress record: the operation's state and completion at the moment
/// of the update, plus a human-readable message (spec §4.10, §7 "Progress
/// entries carry the error's user-facing message").
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    pub state: State,
    pub completion: u8,
    pub message: String,
    pub updated: DateTime<Utc>,
}

/// One `update()` call's input.
#[derive(Debug, Clone)]
pub struct UpdateStep {
    pub completion: u8,
    pub message: String,
}

struct Inner {
    state: State,
    completion: u8,
    updated: DateTime<Utc>,
}

/// Tracks one long-running operation's state, progress history, and
/// append-only log. `update` calls must be serial per operation (spec §5);
/// this type does not itself prevent concurrent callers from interleaving,
/// matching the spec's "caller must not invoke concurrently" contract.
pub struct OperationContext {
    pub id: String,
    log_path: PathBuf,
    inner: Mutex<Inner>,
    progress_tx: Option<mpsc::Sender<ProgressEntry>>,
    log_tx: broadcast::Sender<String>,
}

impl OperationContext {
    /// Creates `<state_dir>/<id>/operation.log` and its parent directory.
    pub async fn new(state_dir: &Path, id: impl Into<String>, progress_tx: Option<mpsc::Sender<ProgressEntry>>) -> Result<Self, Error> {
        let id = id.into();
        let dir = state_dir.join(&id);
        tokio::fs::create_dir_all(&dir).await?;
        let log_path = dir.join("operation.log");
        tokio::fs::OpenOptions::new().create(true).append(true).open(&log_path).await?;

        let (log_tx, _) = broadcast::channel(256);

        Ok(Self {
            id,
            log_path,
            inner: Mutex::new(Inner {
                state: State::Created,
                completion: 0,
                updated: Utc::now(),
            }),
            progress_tx,
            log_tx,
        })
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Applies one progress update. `step.completion` must be `>=` the last
    /// recorded completion (spec §8 "Monotonicity").
    pub async fn update(&self, step: UpdateStep) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        if step.completion < inner.completion {
            return Err(Error::NonMonotonicCompletion {
                had: inner.completion,
                got: step.completion,
            });
        }

        inner.completion = step.completion;
        inner.state = if step.completion >= 100 { State::Completed } else { State::InProgress };
        inner.updated = Utc::now();

        let entry = ProgressEntry {
            state: inner.state,
            completion: inner.completion,
            message: step.message,
            updated: inner.updated,
        };
        drop(inner);

        self.append_log(&entry).await?;

        if let Some(tx) = &self.progress_tx {
            // Per spec §4.10, non-blocking delivery is not guaranteed: a
            // full caller-provided buffered channel legitimately backs up
            // the producer.
            let _ = tx.send(entry).await;
        }

        Ok(())
    }

    /// Transitions directly to `Failed`, recording `message` as the
    /// operation's terminal, user-facing error text (spec §7).
    pub async fn fail(&self, message: impl Into<String>) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.state = State::Failed;
        inner.updated = Utc::now();
        let entry = ProgressEntry {
            state: State::Failed,
            completion: inner.completion,
            message: message.into(),
            updated: inner.updated,
        };
        drop(inner);

        self.append_log(&entry).await?;
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(entry).await;
        }
        Ok(())
    }

    async fn append_log(&self, entry: &ProgressEntry) -> Result<(), Error> {
        let line = format!("{} [{:?}] {}% {}\n", entry.updated.to_rfc3339(), entry.state, entry.completion, entry.message);
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&self.log_path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        let _ = self.log_tx.send(line);
        Ok(())
    }

    /// Reads the log bounded by its size at the moment of the call (spec
    /// §4.10 "full").
    pub async fn read_log_full(&self) -> Result<String, Error> {
        let mut file = tokio::fs::File::open(&self.log_path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Subscribes to log lines appended after this call (spec §4.10
    /// "tail"). Lines written before subscription are not replayed; callers
    /// that need history should call [`OperationContext::read_log_full`]
    /// first.
    pub fn tail_log(&self) -> impl tokio_stream::Stream<Item = String> {
        use futures::StreamExt;
        BroadcastStream::new(self.log_tx.subscribe()).filter_map(|r| async move { r.ok() })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn update_transitions_to_in_progress_then_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let op = OperationContext::new(tmp.path(), "op-1", None).await.unwrap();

        op.update(UpdateStep {
            completion: 10,
            message: "starting".into(),
        })
        .await
        .unwrap();
        assert_eq!(op.state().await, State::InProgress);

        op.update(UpdateStep {
            completion: 100,
            message: "done".into(),
        })
        .await
        .unwrap();
        assert_eq!(op.state().await, State::Completed);
    }

    #[tokio::test]
    async fn update_rejects_non_monotonic_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let op = OperationContext::new(tmp.path(), "op-1", None).await.unwrap();
        op.update(UpdateStep {
            completion: 50,
            message: "half".into(),
        })
        .await
        .unwrap();

        let err = op
            .update(UpdateStep {
                completion: 10,
                message: "backwards".into(),
            })
            .await;
        assert!(matches!(err, Err(Error::NonMonotonicCompletion { .. })));
    }

    #[tokio::test]
    async fn fail_records_message_and_sets_failed_state() {
        let tmp = tempfile::tempdir().unwrap();
        let op = OperationContext::new(tmp.path(), "op-1", None).await.unwrap();
        op.fail("source unreachable").await.unwrap();

        assert_eq!(op.state().await, State::Failed);
        let log = op.read_log_full().await.unwrap();
        assert!(log.contains("source unreachable"));
    }

    #[tokio::test]
    async fn progress_channel_receives_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let op = OperationContext::new(tmp.path(), "op-1", Some(tx)).await.unwrap();

        op.update(UpdateStep {
            completion: 20,
            message: "progressing".into(),
        })
        .await
        .unwrap();

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.completion, 20);
    }
}
