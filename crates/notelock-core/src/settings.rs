//! Security settings section: toggles for storage encryption, passcode lock
//! and biometric lock, driven entirely through the store and the injected
//! capabilities.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::capabilities::{BiometricCapability, ConfirmationPrompt};
use crate::error::{LockError, PolicyError};
use crate::policy::{LockMethod, PolicySnapshot, StorageEncryptionPolicy};
use crate::store::{InFlight, UnlockPolicyStore};
use crate::timing::{mark_selected, TimingChoice, UnlockTiming};

pub const DISABLE_PASSCODE_TITLE: &str = "Disable Passcode";
pub const DISABLE_PASSCODE_WITH_ACCOUNT: &str = "Are you sure you want to disable your local passcode? This will not affect your encryption status, as your data is currently being encrypted through your sync account keys.";
pub const DISABLE_PASSCODE_WITHOUT_ACCOUNT: &str =
    "Are you sure you want to disable your local passcode? This will disable encryption on your data.";

const STORAGE_SUBTEXT: &str = "Encrypts your data before saving to your device's local storage.";
const APPLYING_CHANGES: &str = "Applying changes...";

#[derive(Debug, Clone, Copy)]
pub struct DefaultTimings {
    pub passcode: UnlockTiming,
    pub biometrics: UnlockTiming,
}

impl Default for DefaultTimings {
    fn default() -> Self {
        Self {
            passcode: LockMethod::Passcode.default_timing(),
            biometrics: LockMethod::Biometrics.default_timing(),
        }
    }
}

/// Everything the section shows, derived from one snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SectionView {
    pub storage_title: &'static str,
    pub storage_subtext: String,
    pub passcode_title: &'static str,
    pub biometrics_title: &'static str,
    pub biometrics_toggle_enabled: bool,
    /// Present only while the passcode lock is on.
    pub passcode_timing: Option<Vec<TimingChoice>>,
    /// Present only while the biometric lock is on.
    pub biometrics_timing: Option<Vec<TimingChoice>>,
}

impl SectionView {
    pub fn build(
        snapshot: &PolicySnapshot,
        encryption_available: bool,
        busy: bool,
        supports_biometrics: bool,
    ) -> Self {
        let encrypted = snapshot.encryption_policy == StorageEncryptionPolicy::Default;

        let storage_title = match (encryption_available, encrypted) {
            (false, _) => "Storage Encryption",
            (true, true) => "Disable Storage Encryption",
            (true, false) => "Enable Storage Encryption",
        };

        let storage_subtext = if busy {
            APPLYING_CHANGES.to_string()
        } else {
            let hint = match (encryption_available, encrypted) {
                (false, _) => " Sign in, register, or add a local passcode to enable this option.",
                (true, true) => " Disable to improve app start-up speed.",
                (true, false) => " May decrease app start-up speed.",
            };
            format!("{STORAGE_SUBTEXT}{hint}")
        };

        let timing_rows = |method: LockMethod| {
            let state = snapshot.lock(method);
            state
                .enabled
                .then(|| mark_selected(method, state.effective_timing()))
        };

        Self {
            storage_title,
            storage_subtext,
            passcode_title: if snapshot.passcode.enabled {
                "Disable Passcode Lock"
            } else {
                "Enable Passcode Lock"
            },
            biometrics_title: if snapshot.biometrics.enabled {
                "Disable Biometrics Lock"
            } else {
                "Enable Biometrics Lock"
            },
            biometrics_toggle_enabled: supports_biometrics,
            passcode_timing: timing_rows(LockMethod::Passcode),
            biometrics_timing: timing_rows(LockMethod::Biometrics),
        }
    }
}

pub struct LockSettings {
    store: Arc<UnlockPolicyStore>,
    biometrics: Arc<dyn BiometricCapability>,
    confirmation: Arc<dyn ConfirmationPrompt>,
    defaults: DefaultTimings,
    supports_biometrics: AtomicBool,
    /// Held across capability awaits (biometric probes, the confirmation
    /// prompt) so those checks are serialized with the store write.
    in_flight: AtomicBool,
}

impl LockSettings {
    pub fn new(
        store: Arc<UnlockPolicyStore>,
        biometrics: Arc<dyn BiometricCapability>,
        confirmation: Arc<dyn ConfirmationPrompt>,
        defaults: DefaultTimings,
    ) -> Self {
        Self {
            store,
            biometrics,
            confirmation,
            defaults,
            supports_biometrics: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<UnlockPolicyStore> {
        &self.store
    }

    /// Query device biometric support once and cache it for `view`.
    pub async fn refresh_capabilities(&self) -> bool {
        let available = self.biometrics.is_available().await;
        self.supports_biometrics.store(available, Ordering::SeqCst);
        debug!(available, "biometric support probed");
        available
    }

    /// Encryption can be turned off only when something protects the keys:
    /// a local passcode or sync account keys.
    pub fn encryption_available(&self) -> bool {
        self.store.is_enabled(LockMethod::Passcode) || self.store.has_account()
    }

    pub fn view(&self) -> SectionView {
        SectionView::build(
            &self.store.snapshot(),
            self.encryption_available(),
            self.store.is_busy(),
            self.supports_biometrics.load(Ordering::SeqCst),
        )
    }

    pub async fn toggle_encryption(&self) -> Result<StorageEncryptionPolicy, PolicyError> {
        let _op = InFlight::acquire(&self.in_flight).ok_or(PolicyError::OperationInProgress)?;
        let available = self.encryption_available();
        if !available {
            return Err(PolicyError::Unavailable);
        }
        let next = self.store.encryption_policy().toggled();
        self.store.set_encryption_policy(next, available).await?;
        Ok(next)
    }

    pub async fn enable_passcode(&self) -> Result<(), LockError> {
        let _op = self.begin()?;
        self.store
            .enable_lock(LockMethod::Passcode, self.defaults.passcode)
            .await
    }

    /// Ask for confirmation, then disable the passcode. The wording depends on
    /// whether account keys keep the data encrypted afterwards. Nothing is
    /// asked when the passcode is already off.
    pub async fn disable_passcode(&self) -> Result<(), LockError> {
        let _op = self.begin()?;
        if !self.store.is_enabled(LockMethod::Passcode) {
            debug!("passcode lock already disabled");
            return Ok(());
        }
        let message = if self.store.has_account() {
            DISABLE_PASSCODE_WITH_ACCOUNT
        } else {
            DISABLE_PASSCODE_WITHOUT_ACCOUNT
        };
        let confirmed = self
            .confirmation
            .confirm(message, DISABLE_PASSCODE_TITLE, DISABLE_PASSCODE_TITLE, None)
            .await;
        if !confirmed {
            info!("passcode removal cancelled");
        }
        self.store
            .disable_lock(LockMethod::Passcode, confirmed)
            .await
    }

    pub async fn enable_biometrics(&self) -> Result<(), LockError> {
        let _op = self.begin()?;
        if !self.refresh_capabilities().await {
            return Err(LockError::BiometricsUnavailable);
        }
        if !self.biometrics.is_enrolled().await {
            return Err(LockError::BiometricsNotEnrolled);
        }
        self.store
            .enable_lock(LockMethod::Biometrics, self.defaults.biometrics)
            .await
    }

    pub async fn disable_biometrics(&self) -> Result<(), LockError> {
        let _op = self.begin()?;
        self.store.disable_lock(LockMethod::Biometrics, true).await
    }

    pub async fn set_timing(&self, method: LockMethod, timing: UnlockTiming) -> Result<(), LockError> {
        let _op = self.begin()?;
        self.store.set_timing(method, timing).await
    }

    fn begin(&self) -> Result<InFlight<'_>, LockError> {
        InFlight::acquire(&self.in_flight).ok_or(LockError::OperationInProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LockMethodState;

    #[test]
    fn view_without_encryption_keys() {
        let view = SectionView::build(&PolicySnapshot::default(), false, false, false);
        assert_eq!(view.storage_title, "Storage Encryption");
        assert!(view.storage_subtext.ends_with("add a local passcode to enable this option."));
        assert_eq!(view.passcode_title, "Enable Passcode Lock");
        assert!(!view.biometrics_toggle_enabled);
        assert!(view.passcode_timing.is_none());
        assert!(view.biometrics_timing.is_none());
    }

    #[test]
    fn view_with_passcode_shows_timing_rows() {
        let mut snapshot = PolicySnapshot::default();
        snapshot.passcode = LockMethodState {
            enabled: true,
            timing: UnlockTiming::OnQuit,
        };
        let view = SectionView::build(&snapshot, true, false, true);
        assert_eq!(view.storage_title, "Disable Storage Encryption");
        assert!(view.storage_subtext.ends_with("Disable to improve app start-up speed."));
        assert_eq!(view.passcode_title, "Disable Passcode Lock");

        let rows = view.passcode_timing.unwrap();
        let selected: Vec<_> = rows.iter().filter(|r| r.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].option.timing, UnlockTiming::OnQuit);
        assert!(view.biometrics_timing.is_none());
    }

    #[test]
    fn busy_view_shows_progress() {
        let mut snapshot = PolicySnapshot::default();
        snapshot.encryption_policy = StorageEncryptionPolicy::Disabled;
        let view = SectionView::build(&snapshot, true, true, false);
        assert_eq!(view.storage_title, "Enable Storage Encryption");
        assert_eq!(view.storage_subtext, APPLYING_CHANGES);
    }
}
