use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::paths;
use crate::policy::LockMethod;
use crate::settings::DefaultTimings;
use crate::store::{RepeatEnable, StoreOptions};
use crate::timing::UnlockTiming;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountConfig {
    #[serde(default)]
    pub signed_in: bool,
    #[serde(default)]
    pub email: Option<String>,
}

/// What the host reports about biometric hardware. Real devices answer these
/// through the platform API; the CLI reads them from config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub biometrics_available: bool,
    #[serde(default)]
    pub biometrics_enrolled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotelockConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub repeat_enable: RepeatEnable,
    #[serde(default = "default_passcode_timing")]
    pub passcode_default_timing: UnlockTiming,
    #[serde(default = "default_biometrics_timing")]
    pub biometrics_default_timing: UnlockTiming,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for NotelockConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            repeat_enable: RepeatEnable::default(),
            passcode_default_timing: default_passcode_timing(),
            biometrics_default_timing: default_biometrics_timing(),
            account: AccountConfig::default(),
            device: DeviceConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl NotelockConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("read config {}", path.display())),
        };
        let cfg: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        Self::load(paths::config_path()?)
    }

    fn validate(&self) -> Result<()> {
        for (method, timing) in [
            (LockMethod::Passcode, self.passcode_default_timing),
            (LockMethod::Biometrics, self.biometrics_default_timing),
        ] {
            if !timing.is_valid() {
                anyhow::bail!("{method} default timing must be at least one minute");
            }
        }
        Ok(())
    }

    /// Data directory precedence: explicit override, `NOTELOCK_DATA_DIR`,
    /// config file, platform default.
    pub fn resolve_data_dir(&self, override_dir: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = override_dir {
            return Ok(dir);
        }
        if let Ok(env_dir) = std::env::var(paths::DATA_DIR_ENV) {
            if !env_dir.is_empty() {
                return Ok(PathBuf::from(env_dir));
            }
        }
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::data_dir(),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            repeat_enable: self.repeat_enable,
        }
    }

    pub fn default_timings(&self) -> DefaultTimings {
        DefaultTimings {
            passcode: self.passcode_default_timing,
            biometrics: self.biometrics_default_timing,
        }
    }
}

fn default_passcode_timing() -> UnlockTiming {
    LockMethod::Passcode.default_timing()
}

fn default_biometrics_timing() -> UnlockTiming {
    LockMethod::Biometrics.default_timing()
}

fn default_log_filter() -> String {
    "info".to_string()
}
