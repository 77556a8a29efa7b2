use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use charge_core::Station;
use tokio::sync::Mutex;

/// Durable home of the station state.
///
/// `save` receives the complete state after every committed operation and must
/// either store all of it or fail.
#[async_trait]
pub trait StationStore: Send + Sync {
    async fn load(&self) -> Result<Option<Station>>;

    async fn save(&self, station: &Station) -> Result<()>;
}

/// In-memory store, mostly for tests.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Station>>,
    fail_next: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save` fail, simulating an unavailable backend.
    pub fn fail_next_save(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub async fn saved(&self) -> Option<Station> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl StationStore for MemoryStore {
    async fn load(&self) -> Result<Option<Station>> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, station: &Station) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("memory store configured to fail");
        }
        *self.saved.lock().await = Some(station.clone());
        Ok(())
    }
}

/// Station state kept as a pretty-printed JSON snapshot on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StationStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Station>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No state file at {}, starting fresh", self.path.display());
                return Ok(None);
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read state file {}", self.path.display()));
            }
        };
        let station = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse state file {}", self.path.display()))?;
        Ok(Some(station))
    }

    async fn save(&self, station: &Station) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(station).context("failed to serialize station")?;
        // Write next to the target and rename so readers never see a partial file.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
