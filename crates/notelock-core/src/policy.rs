use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::timing::UnlockTiming;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageEncryptionPolicy {
    /// Local data is encrypted at rest.
    #[default]
    Default,
    /// Local data is stored in plaintext.
    Disabled,
}

impl StorageEncryptionPolicy {
    pub fn toggled(self) -> Self {
        match self {
            StorageEncryptionPolicy::Default => StorageEncryptionPolicy::Disabled,
            StorageEncryptionPolicy::Disabled => StorageEncryptionPolicy::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LockMethod {
    Passcode,
    Biometrics,
}

impl LockMethod {
    pub const ALL: [LockMethod; 2] = [LockMethod::Passcode, LockMethod::Biometrics];

    pub fn requires_confirmation(self) -> bool {
        matches!(self, LockMethod::Passcode)
    }

    /// Timing a method falls back to while disabled.
    pub fn default_timing(self) -> UnlockTiming {
        match self {
            LockMethod::Passcode => UnlockTiming::Immediately,
            LockMethod::Biometrics => UnlockTiming::OnQuit,
        }
    }
}

impl fmt::Display for LockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMethod::Passcode => f.write_str("passcode"),
            LockMethod::Biometrics => f.write_str("biometrics"),
        }
    }
}

impl FromStr for LockMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passcode" => Ok(LockMethod::Passcode),
            "biometrics" | "biometric" => Ok(LockMethod::Biometrics),
            other => Err(format!("unknown lock method `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockMethodState {
    pub enabled: bool,
    pub timing: UnlockTiming,
}

impl LockMethodState {
    pub fn disabled(method: LockMethod) -> Self {
        Self {
            enabled: false,
            timing: method.default_timing(),
        }
    }

    pub fn effective_timing(&self) -> Option<UnlockTiming> {
        self.enabled.then_some(self.timing)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub encryption_policy: StorageEncryptionPolicy,
    pub passcode: LockMethodState,
    #[serde(default = "default_biometrics")]
    pub biometrics: LockMethodState,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            encryption_policy: StorageEncryptionPolicy::Default,
            passcode: LockMethodState::disabled(LockMethod::Passcode),
            biometrics: LockMethodState::disabled(LockMethod::Biometrics),
        }
    }
}

impl PolicySnapshot {
    pub fn lock(&self, method: LockMethod) -> &LockMethodState {
        match method {
            LockMethod::Passcode => &self.passcode,
            LockMethod::Biometrics => &self.biometrics,
        }
    }

    pub fn lock_mut(&mut self, method: LockMethod) -> &mut LockMethodState {
        match method {
            LockMethod::Passcode => &mut self.passcode,
            LockMethod::Biometrics => &mut self.biometrics,
        }
    }
}

/// On-disk layout written by the file persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub snapshot: PolicySnapshot,
}

impl PersistedState {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            updated_at: Utc::now(),
            snapshot,
        }
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new(PolicySnapshot::default())
    }
}

fn legacy_version() -> u32 {
    1
}

fn default_biometrics() -> LockMethodState {
    LockMethodState::disabled(LockMethod::Biometrics)
}
