//! Persistence of the reconciliation state
//!
//! The engine pushes a [`PersistedState`] snapshot through a
//! [`StatePersister`] after every mutating step. The caller stores it and
//! hands it back verbatim on the next pass.

use crate::error::{FlowError, Result};
use crate::whiteboard::PersistedState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;

/// Receiver of state snapshots
#[async_trait]
pub trait StatePersister: Send + Sync {
    async fn persist(&self, state: &PersistedState) -> Result<()>;
}

/// Adapter turning a plain callback into a [`StatePersister`]
pub struct FnPersister<F>(pub F);

#[async_trait]
impl<F> StatePersister for FnPersister<F>
where
    F: Fn(&PersistedState) -> Result<()> + Send + Sync,
{
    async fn persist(&self, state: &PersistedState) -> Result<()> {
        (self.0)(state)
    }
}

/// Keeps the latest snapshot in memory
#[derive(Debug, Default)]
pub struct MemoryPersister {
    last: Mutex<Option<PersistedState>>,
    writes: AtomicUsize,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<PersistedState> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of snapshots received so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatePersister for MemoryPersister {
    async fn persist(&self, state: &PersistedState) -> Result<()> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stores snapshots as a JSON file, keeping the previous one as `.backup`
#[derive(Debug, Clone)]
pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Load the stored state; `None` when nothing was stored yet
    ///
    /// Falls back to the backup when the state file itself is missing.
    pub async fn load(&self) -> Result<Option<PersistedState>> {
        let source = if self.path.exists() {
            self.path.clone()
        } else {
            let backup = self.backup_path();
            if !backup.exists() {
                tracing::debug!("State file not found, starting from empty state");
                return Ok(None);
            }
            tracing::warn!(path = %backup.display(), "State file missing, loading backup");
            backup
        };

        let content = fs::read_to_string(&source).await?;
        let state = PersistedState::from_json(&content)?;
        if !state.has_valid_version() {
            return Err(FlowError::State(format!(
                "{} has unsupported version {:?}",
                source.display(),
                state.version
            )));
        }

        tracing::debug!(keys = state.data.len(), "Loaded state");
        Ok(Some(state))
    }

    /// Replace the state file, keeping a copy of the previous one
    ///
    /// The new content goes to a temporary file first and is renamed over
    /// the state file, so the path always holds a complete snapshot.
    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let temp = self.temp_path();
        fs::write(&temp, state.to_json()?).await?;
        if self.path.exists() {
            fs::copy(&self.path, self.backup_path()).await?;
        }
        fs::rename(&temp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), keys = state.data.len(), "Saved state");
        Ok(())
    }
}

#[async_trait]
impl StatePersister for FilePersister {
    async fn persist(&self, state: &PersistedState) -> Result<()> {
        self.save(state)
            .await
            .map_err(|e| FlowError::Persist(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn state(vpc: &str) -> PersistedState {
        PersistedState::new(BTreeMap::from([("VPC".to_string(), vpc.to_string())]))
    }

    #[tokio::test]
    async fn test_file_save_load_and_backup() {
        let dir = TempDir::new().unwrap();
        let persister = FilePersister::new(dir.path().join("nested").join("state.json"));

        assert!(persister.load().await.unwrap().is_none());

        persister.persist(&state("vpc-1")).await.unwrap();
        assert_eq!(persister.load().await.unwrap(), Some(state("vpc-1")));
        assert!(!persister.backup_path().exists());

        persister.persist(&state("vpc-2")).await.unwrap();
        assert_eq!(persister.load().await.unwrap(), Some(state("vpc-2")));

        let backup = std::fs::read_to_string(persister.backup_path()).unwrap();
        assert_eq!(PersistedState::from_json(&backup).unwrap(), state("vpc-1"));
    }

    #[tokio::test]
    async fn test_file_load_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let persister = FilePersister::new(dir.path().join("state.json"));

        persister.persist(&state("vpc-1")).await.unwrap();
        persister.persist(&state("vpc-2")).await.unwrap();
        assert!(!persister.temp_path().exists());

        std::fs::remove_file(persister.path()).unwrap();
        assert_eq!(persister.load().await.unwrap(), Some(state("vpc-1")));

        persister.persist(&state("vpc-3")).await.unwrap();
        assert_eq!(persister.load().await.unwrap(), Some(state("vpc-3")));
    }

    #[tokio::test]
    async fn test_file_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version":"v9","data":{}}"#).unwrap();

        let err = FilePersister::new(&path).load().await.unwrap_err();
        assert!(matches!(err, FlowError::State(_)));
    }

    #[tokio::test]
    async fn test_memory_and_callback() {
        let memory = MemoryPersister::new();
        memory.persist(&state("vpc-1")).await.unwrap();
        memory.persist(&state("vpc-2")).await.unwrap();
        assert_eq!(memory.writes(), 2);
        assert_eq!(memory.last(), Some(state("vpc-2")));

        let failing = FnPersister(|_: &PersistedState| Err(FlowError::Persist("disk full".into())));
        assert!(failing.persist(&state("vpc-1")).await.is_err());
    }
}
