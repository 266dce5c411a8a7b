//! Dead letter queue: append-only NDJSON capture of batches that exhausted retries
//! (spec.md §4.7), grounded in the teacher's `JsonlSink` append-file pattern.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// One on-disk record: a failed batch, its error, and free-form metadata
/// (`worker_id`, `coordinator_id`, shutdown reason, ...).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct DLQRecord<T> {
    pub ts: f64,
    pub error: String,
    pub items: Vec<T>,
    pub metadata: HashMap<String, String>,
}

/// Append-only file-backed dead letter queue. Writes are serialized by a mutex; reads
/// (`replay`) take an independent handle and do not contend with writers (spec.md §5).
pub struct DeadLetterQueue<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> DeadLetterQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// The parent directory of `path` is created on first `save`, not at construction.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()), _marker: std::marker::PhantomData }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `(items, error, metadata)` as one NDJSON line and append it. A failure to
    /// flush is logged and counted by the caller but never rethrown (spec.md §4.7).
    pub async fn save(
        &self,
        items: Vec<T>,
        error: impl std::fmt::Display,
        metadata: HashMap<String, String>,
    ) -> std::io::Result<()> {
        let record = DLQRecord {
            ts: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64(),
            error: error.to_string(),
            items,
            metadata,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
            + "\n";

        // Async mutex: the guard is held across the writes below, so it must stay `Send`.
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read up to `max` records from the head of the file, in order. Missing file yields
    /// an empty list; malformed lines are skipped with a warning, not an error.
    pub async fn replay(&self, max: usize) -> std::io::Result<Vec<DLQRecord<T>>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::with_capacity(max.min(1024));
        while records.len() < max {
            let Some(line) = lines.next_line().await? else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DLQRecord<T>>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "dlq: skipping malformed record"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        v: i64,
    }

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn save_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.ndjson");
        let dlq: DeadLetterQueue<Item> = DeadLetterQueue::new(&path);

        dlq.save(vec![Item { v: 1 }, Item { v: 2 }], "boom", meta(&[("k", "v")])).await.unwrap();
        dlq.save(vec![Item { v: 3 }], "kapow", meta(&[])).await.unwrap();

        let records = dlq.replay(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(records[0].items.len(), 2);
        assert!(records[0].error.to_lowercase().contains("boom"));
    }

    #[tokio::test]
    async fn replay_respects_max_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.ndjson");
        let dlq: DeadLetterQueue<Item> = DeadLetterQueue::new(&path);

        for i in 0..10 {
            dlq.save(vec![Item { v: i }], format!("error-{i}"), meta(&[])).await.unwrap();
        }

        let records = dlq.replay(5).await.unwrap();
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn replay_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.ndjson");
        let dlq: DeadLetterQueue<Item> = DeadLetterQueue::new(&path);

        let records = dlq.replay(10).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn parent_directory_is_created_on_first_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("dlq.ndjson");
        let dlq: DeadLetterQueue<Item> = DeadLetterQueue::new(&path);

        dlq.save(vec![Item { v: 1 }], "err", meta(&[])).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn concurrent_writes_are_all_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.ndjson");
        let dlq = std::sync::Arc::new(DeadLetterQueue::<Item>::new(&path));

        let mut handles = Vec::new();
        for i in 0..20 {
            let dlq = dlq.clone();
            handles.push(tokio::spawn(async move {
                dlq.save(vec![Item { v: i }], format!("error-{i}"), meta(&[])).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let records = dlq.replay(100).await.unwrap();
        assert_eq!(records.len(), 20);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.ndjson");
        let dlq: DeadLetterQueue<Item> = DeadLetterQueue::new(&path);

        dlq.save(vec![Item { v: 1 }], "err", meta(&[])).await.unwrap();
        tokio::fs::write(&path, "{not valid json}\n").await.unwrap();
        tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        dlq.save(vec![Item { v: 2 }], "err2", meta(&[])).await.unwrap();

        let records = dlq.replay(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].items[0].v, 2);
    }
}
