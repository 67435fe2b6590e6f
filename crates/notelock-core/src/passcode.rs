use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::PasscodeError;

pub const MIN_PASSCODE_LEN: usize = 4;
pub const PASSCODE_FILE_NAME: &str = "passcode.json";

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: KDF_MEMORY_COST,
            time_cost: KDF_TIME_COST,
            parallelism: KDF_PARALLELISM,
        }
    }
}

/// Argon2id hash of the local passcode in PHC string form. The hash carries
/// its own salt and cost parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasscodeCredential {
    phc: String,
}

impl PasscodeCredential {
    pub fn create(passcode: &str) -> Result<Self, PasscodeError> {
        Self::create_with(passcode, KdfParams::default())
    }

    pub fn create_with(passcode: &str, kdf: KdfParams) -> Result<Self, PasscodeError> {
        if passcode.chars().count() < MIN_PASSCODE_LEN {
            return Err(PasscodeError::TooShort(MIN_PASSCODE_LEN));
        }
        let params = Params::new(kdf.memory_kib, kdf.time_cost, kdf.parallelism, None)
            .map_err(|e| PasscodeError::Hash(format!("argon2 params: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let hash = argon
            .hash_password(passcode.as_bytes(), &salt)
            .map_err(|e| PasscodeError::Hash(e.to_string()))?;
        Ok(Self {
            phc: hash.to_string(),
        })
    }

    pub fn verify(&self, passcode: &str) -> bool {
        let parsed = match PasswordHash::new(&self.phc) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "stored passcode hash is malformed");
                return false;
            }
        };
        Argon2::default()
            .verify_password(passcode.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Passcode credential stored next to the unlock policy.
#[derive(Debug, Clone)]
pub struct PasscodeFile {
    path: PathBuf,
}

impl PasscodeFile {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(PASSCODE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<PasscodeCredential>, PasscodeError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, credential: &PasscodeCredential) -> Result<(), PasscodeError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(credential)?)?;
        tmp.as_file().sync_all()?;
        restrict_permissions(tmp.path());
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<(), PasscodeError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("cannot restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
