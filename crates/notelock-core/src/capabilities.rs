//! Boundary contracts the store and the settings coordinator depend on.
//!
//! The traits are implemented by the host (file persistence, terminal prompts,
//! device probes). The in-memory implementations here are for embedding and
//! tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::PersistenceError;
use crate::policy::PersistedState;

#[async_trait]
pub trait PolicyPersistence: Send + Sync {
    /// Load the stored state; an empty store yields the default state.
    async fn load(&self) -> Result<PersistedState, PersistenceError>;

    /// Durably store `state`. Returns once the write is complete.
    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait BiometricCapability: Send + Sync {
    /// Device hardware supports biometric unlock.
    async fn is_available(&self) -> bool;

    async fn is_enrolled(&self) -> bool;
}

#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(
        &self,
        message: &str,
        title: &str,
        confirm_label: &str,
        cancel_label: Option<&str>,
    ) -> bool;
}

pub trait AccountSession: Send + Sync {
    fn has_account(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    stored: Mutex<Option<PersistedState>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            stored: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make every following save fail with an I/O error until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<PersistedState> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl PolicyPersistence for MemoryPersistence {
    async fn load(&self) -> Result<PersistedState, PersistenceError> {
        Ok(self.stored.lock().clone().unwrap_or_default())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::IoFailure(std::io::Error::other(
                "simulated write failure",
            )));
        }
        *self.stored.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StaticBiometrics {
    pub available: bool,
    pub enrolled: bool,
}

#[async_trait]
impl BiometricCapability for StaticBiometrics {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn is_enrolled(&self) -> bool {
        self.enrolled
    }
}

/// Answers every prompt the same way and remembers the last message shown.
#[derive(Debug)]
pub struct FixedConfirmation {
    answer: bool,
    last_message: Mutex<Option<String>>,
}

impl FixedConfirmation {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            last_message: Mutex::new(None),
        }
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().clone()
    }
}

#[async_trait]
impl ConfirmationPrompt for FixedConfirmation {
    async fn confirm(
        &self,
        message: &str,
        _title: &str,
        _confirm_label: &str,
        _cancel_label: Option<&str>,
    ) -> bool {
        *self.last_message.lock() = Some(message.to_string());
        self.answer
    }
}

#[derive(Debug, Default)]
pub struct StaticAccount {
    signed_in: AtomicBool,
}

impl StaticAccount {
    pub fn new(signed_in: bool) -> Self {
        Self {
            signed_in: AtomicBool::new(signed_in),
        }
    }

    pub fn set_signed_in(&self, signed_in: bool) {
        self.signed_in.store(signed_in, Ordering::SeqCst);
    }
}

impl AccountSession for StaticAccount {
    fn has_account(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }
}
