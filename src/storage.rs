use crate::raft::PersistentState;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STATE_FILE: &str = "state.json";

/// Durable home for a node's term and vote.
#[async_trait::async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    async fn save(&mut self, state: &PersistentState) -> Result<()>;
    async fn load(&self) -> Result<Option<PersistentState>>;
}

/// In-memory storage. Clones share the same slot, so a restarted node can
/// be handed the storage of its previous incarnation.
#[derive(Clone, Default)]
pub struct MemStorage {
    state: Arc<Mutex<Option<PersistentState>>>,
}

impl std::fmt::Debug for MemStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStorage").finish()
    }
}

#[async_trait::async_trait]
impl Storage for MemStorage {
    async fn save(&mut self, state: &PersistentState) -> Result<()> {
        let mut s = self.state.lock().await;
        *s = Some(*state);
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistentState>> {
        let s = self.state.lock().await;
        Ok(*s)
    }
}

/// Stores the state as JSON in `<dir>/state.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}.tmp"))
    }
}

#[async_trait::async_trait]
impl Storage for FileStorage {
    async fn save(&mut self, state: &PersistentState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.with_context(|| {
            format!("failed to create {}", self.dir.display())
        })?;

        // The temp file is synced before the rename replaces the old state.
        let tmp = self.tmp_path();
        let data = serde_json::to_vec(state)?;
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&data)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("failed to sync {}", tmp.display()))?;
        drop(file);
        tokio::fs::rename(&tmp, self.path()).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistentState>> {
        let path = self.path();
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let state = serde_json::from_slice(&data).with_context(|| {
                    format!("corrupt state file {}", path.display())
                })?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
