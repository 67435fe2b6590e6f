use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::capabilities::PolicyPersistence;
use crate::error::PersistenceError;
use crate::policy::{PersistedState, CURRENT_SCHEMA_VERSION};

pub const POLICY_FILE_NAME: &str = "unlock-policy.json";

/// Stores the unlock policy as pretty JSON. Writes go to a temp file in the
/// same directory and are renamed over the target, so a crash mid-write
/// leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(POLICY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicyPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<PersistedState, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no policy file; using defaults");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(e.into()),
        };
        let mut state: PersistedState = serde_json::from_slice(&bytes)?;
        migrate(&mut state)?;
        Ok(state)
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let path = self.path.clone();
        let json = serde_json::to_vec_pretty(state)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| PersistenceError::IoFailure(io::Error::other(e)))??;
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn migrate(state: &mut PersistedState) -> Result<(), PersistenceError> {
    if state.version > CURRENT_SCHEMA_VERSION {
        return Err(PersistenceError::UnsupportedVersion(state.version));
    }
    if state.version < 2 {
        // v1 predates biometric lock; serde already filled in a disabled entry.
        info!(from = state.version, to = CURRENT_SCHEMA_VERSION, "migrated unlock policy");
        state.version = CURRENT_SCHEMA_VERSION;
    }
    Ok(())
}
