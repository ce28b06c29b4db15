use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{SWEEP_INTERVAL_SECS, UPLOAD_TTL_SECS};

/// Where an upload's bytes live for its TTL window.
#[derive(Debug, Clone)]
pub enum UploadContent {
    Buffer(Vec<u8>),
    TempPath(PathBuf),
}

/// One-shot uploaded file handle. Not owned by any session.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub content: UploadContent,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadedFile {
    pub async fn read_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match &self.content {
            UploadContent::Buffer(bytes) => Ok(bytes.clone()),
            UploadContent::TempPath(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

/// Ephemeral registry of uploaded files: each entry is consumed exactly once
/// by a job or reclaimed by the TTL sweep, whichever comes first.
#[derive(Debug, Clone)]
pub struct UploadLedger {
    inner: Arc<RwLock<HashMap<String, UploadedFile>>>,
    ttl: Duration,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(UPLOAD_TTL_SECS as i64))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Register an in-memory upload; returns its one-shot id.
    pub async fn register(&self, filename: impl Into<String>, bytes: Vec<u8>) -> String {
        let size = bytes.len() as u64;
        self.insert(filename.into(), size, UploadContent::Buffer(bytes))
            .await
    }

    /// Register an upload whose bytes sit in a temp file we own.
    pub async fn register_path(
        &self,
        filename: impl Into<String>,
        path: PathBuf,
        size: u64,
    ) -> String {
        self.insert(filename.into(), size, UploadContent::TempPath(path))
            .await
    }

    async fn insert(&self, filename: String, size: u64, content: UploadContent) -> String {
        let now = Utc::now();
        let file = UploadedFile {
            id: Uuid::new_v4().to_string(),
            filename,
            size,
            content,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let id = file.id.clone();
        self.inner.write().await.insert(id.clone(), file);
        debug!(upload_id = %id, size, "upload registered");
        id
    }

    /// Look up a live entry. Expired entries report not-found even before
    /// the sweep has run.
    pub async fn get(&self, id: &str) -> Option<UploadedFile> {
        let map = self.inner.read().await;
        map.get(id)
            .filter(|f| f.expires_at >= Utc::now())
            .cloned()
    }

    /// Remove the entry and release any backing temp file. A second consume
    /// (or a get) on the same id reports not-found.
    pub async fn consume(&self, id: &str) -> Option<UploadedFile> {
        let removed = self.inner.write().await.remove(id)?;
        if removed.expires_at < Utc::now() {
            release_backing(&removed).await;
            return None;
        }
        release_backing(&removed).await;
        debug!(upload_id = %id, "upload consumed");
        Some(removed)
    }

    /// Drop expired entries and their backing files; returns the count.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<UploadedFile> = {
            let mut map = self.inner.write().await;
            let ids: Vec<String> = map
                .values()
                .filter(|f| f.expires_at < now)
                .map(|f| f.id.clone())
                .collect();
            ids.into_iter().filter_map(|id| map.remove(&id)).collect()
        };
        for file in &expired {
            release_backing(file).await;
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for UploadLedger {
    fn default() -> Self {
        Self::new()
    }
}

async fn release_backing(file: &UploadedFile) {
    if let UploadContent::TempPath(path) = &file.content {
        if let Err(err) = tokio::fs::remove_file(path).await {
            warn!(upload_id = %file.id, path = %path.display(), error = %err,
                "failed to remove backing temp file");
        }
    }
}

/// Background task sweeping expired uploads every 60 seconds.
pub fn spawn_sweeper(ledger: UploadLedger) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            let removed = ledger.sweep(Utc::now()).await;
            if removed > 0 {
                debug!(removed, "expired uploads swept");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_register_then_consume_is_one_shot() {
        let ledger = UploadLedger::new();
        let id = ledger.register("report.pdf", b"content".to_vec()).await;

        let handle = ledger.get(&id).await.expect("registered upload");
        assert_eq!(handle.filename, "report.pdf");
        assert_eq!(handle.size, 7);
        assert_eq!(handle.expires_at, handle.created_at + ledger.ttl);

        let consumed = ledger.consume(&id).await.expect("first consume");
        assert_eq!(consumed.read_bytes().await.unwrap(), b"content");

        // One-shot: the id is gone for both consume and get.
        assert!(ledger.consume(&id).await.is_none());
        assert!(ledger.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_consume_unknown_id() {
        let ledger = UploadLedger::new();
        assert!(ledger.consume("no-such-id").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_entries() {
        let ledger = UploadLedger::new();
        let id = ledger.register("a.txt", b"a".to_vec()).await;
        let expires = ledger.get(&id).await.unwrap().expires_at;

        assert_eq!(ledger.sweep(expires - Duration::seconds(1)).await, 0);
        assert_eq!(ledger.sweep(expires + Duration::seconds(1)).await, 1);
        assert!(ledger.get(&id).await.is_none());
        assert_eq!(ledger.len().await, 0);
    }

    #[tokio::test]
    async fn test_consume_releases_temp_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"spooled bytes").unwrap();
        // Keep the path but drop the guard so the ledger owns cleanup.
        let (_, path) = tmp.keep().unwrap();

        let ledger = UploadLedger::new();
        let id = ledger.register_path("big.bin", path.clone(), 13).await;

        let handle = ledger.get(&id).await.unwrap();
        assert_eq!(handle.read_bytes().await.unwrap(), b"spooled bytes");

        ledger.consume(&id).await.unwrap();
        assert!(!path.exists(), "backing file should be removed on consume");
    }

    #[tokio::test]
    async fn test_expired_entry_hidden_from_get() {
        let ledger = UploadLedger::with_ttl(Duration::seconds(-1));
        let id = ledger.register("x", b"x".to_vec()).await;
        // Already past expiry; hidden even though the sweep has not run.
        assert!(ledger.get(&id).await.is_none());
        assert!(ledger.consume(&id).await.is_none());
    }
}
