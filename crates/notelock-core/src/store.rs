//! Single source of truth for lock-related settings.
//!
//! Every mutation is validated against the current snapshot, written through
//! the persistence capability, and only then published to readers. A mutation
//! that arrives while another one is awaiting persistence is rejected instead
//! of queued.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capabilities::{AccountSession, PolicyPersistence};
use crate::error::{LockError, PersistenceError, PolicyError};
use crate::policy::{
    LockMethod, LockMethodState, PersistedState, PolicySnapshot, StorageEncryptionPolicy,
};
use crate::timing::{mark_selected, timing_options, TimingChoice, TimingOption, UnlockTiming};

/// What `enable_lock` does when the method is already enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatEnable {
    #[default]
    NoOp,
    Reject,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    pub repeat_enable: RepeatEnable,
}

pub struct UnlockPolicyStore {
    persistence: Arc<dyn PolicyPersistence>,
    account: Arc<dyn AccountSession>,
    options: StoreOptions,
    current: RwLock<PolicySnapshot>,
    in_flight: AtomicBool,
    changes: watch::Sender<PolicySnapshot>,
}

impl UnlockPolicyStore {
    pub async fn load(
        persistence: Arc<dyn PolicyPersistence>,
        account: Arc<dyn AccountSession>,
        options: StoreOptions,
    ) -> Result<Self, PersistenceError> {
        let persisted = persistence.load().await?;
        let snapshot = sanitize(persisted.snapshot);
        debug!(?snapshot, "unlock policy loaded");
        let (changes, _) = watch::channel(snapshot);
        Ok(Self {
            persistence,
            account,
            options,
            current: RwLock::new(snapshot),
            in_flight: AtomicBool::new(false),
            changes,
        })
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        *self.current.read()
    }

    pub fn encryption_policy(&self) -> StorageEncryptionPolicy {
        self.current.read().encryption_policy
    }

    pub fn lock_state(&self, method: LockMethod) -> LockMethodState {
        *self.current.read().lock(method)
    }

    pub fn is_enabled(&self, method: LockMethod) -> bool {
        self.lock_state(method).enabled
    }

    /// A mutation is currently waiting on persistence.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Receives every snapshot published after a successful mutation.
    pub fn subscribe(&self) -> watch::Receiver<PolicySnapshot> {
        self.changes.subscribe()
    }

    pub fn timing_options(method: LockMethod) -> &'static [TimingOption] {
        timing_options(method)
    }

    pub fn timing_choices(&self, method: LockMethod) -> Vec<TimingChoice> {
        mark_selected(method, self.lock_state(method).effective_timing())
    }

    pub fn has_account(&self) -> bool {
        self.account.has_account()
    }

    pub async fn set_encryption_policy(
        &self,
        policy: StorageEncryptionPolicy,
        encryption_available: bool,
    ) -> Result<(), PolicyError> {
        let _op = InFlight::acquire(&self.in_flight).ok_or(PolicyError::OperationInProgress)?;

        if policy == StorageEncryptionPolicy::Disabled && !encryption_available {
            warn!("refusing to disable storage encryption: encryption unavailable");
            return Err(PolicyError::Unavailable);
        }

        let mut next = self.snapshot();
        if next.encryption_policy == policy {
            debug!(?policy, "storage encryption policy unchanged");
            return Ok(());
        }
        next.encryption_policy = policy;
        self.commit(next).await?;
        info!(?policy, "storage encryption policy updated");
        Ok(())
    }

    pub async fn enable_lock(
        &self,
        method: LockMethod,
        default_timing: UnlockTiming,
    ) -> Result<(), LockError> {
        let _op = InFlight::acquire(&self.in_flight).ok_or(LockError::OperationInProgress)?;

        if !default_timing.is_valid() {
            return Err(LockError::InvalidTiming);
        }

        let mut next = self.snapshot();
        if next.lock(method).enabled {
            return match self.options.repeat_enable {
                RepeatEnable::NoOp => {
                    debug!(%method, "lock already enabled");
                    Ok(())
                }
                RepeatEnable::Reject => Err(LockError::AlreadyEnabled),
            };
        }

        *next.lock_mut(method) = LockMethodState {
            enabled: true,
            timing: default_timing,
        };
        self.commit(next).await?;
        info!(%method, timing = %default_timing, "lock enabled");
        Ok(())
    }

    /// Disable a lock method. Turning off the passcode while no account keys
    /// exist also switches storage encryption to `Disabled` in the same write.
    pub async fn disable_lock(&self, method: LockMethod, confirmed: bool) -> Result<(), LockError> {
        let _op = InFlight::acquire(&self.in_flight).ok_or(LockError::OperationInProgress)?;

        if method.requires_confirmation() && !confirmed {
            warn!(%method, "disable rejected: not confirmed");
            return Err(LockError::NotConfirmed);
        }

        let mut next = self.snapshot();
        if !next.lock(method).enabled {
            debug!(%method, "lock already disabled");
            return Ok(());
        }
        *next.lock_mut(method) = LockMethodState::disabled(method);

        let cascade = method == LockMethod::Passcode
            && !self.account.has_account()
            && next.encryption_policy == StorageEncryptionPolicy::Default;
        if cascade {
            next.encryption_policy = StorageEncryptionPolicy::Disabled;
        }

        self.commit(next).await?;
        info!(%method, encryption_disabled = cascade, "lock disabled");
        Ok(())
    }

    pub async fn set_timing(&self, method: LockMethod, timing: UnlockTiming) -> Result<(), LockError> {
        let _op = InFlight::acquire(&self.in_flight).ok_or(LockError::OperationInProgress)?;

        if !timing.is_valid() {
            return Err(LockError::InvalidTiming);
        }

        let mut next = self.snapshot();
        let state = next.lock_mut(method);
        if !state.enabled {
            return Err(LockError::MethodNotEnabled);
        }
        if state.timing == timing {
            return Ok(());
        }
        state.timing = timing;
        self.commit(next).await?;
        info!(%method, %timing, "lock timing updated");
        Ok(())
    }

    /// Persist `next`, then publish it. Memory is untouched when the write
    /// fails.
    async fn commit(&self, next: PolicySnapshot) -> Result<(), PersistenceError> {
        let persisted = PersistedState::new(next);
        if let Err(err) = self.persistence.save(&persisted).await {
            warn!(error = %err, "failed to persist unlock policy");
            return Err(err);
        }
        *self.current.write() = next;
        self.changes.send_replace(next);
        Ok(())
    }
}

/// Marks a mutation as running until dropped. Readers only ever `load` the
/// flag, so checking it can never make a mutation fail.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn sanitize(mut snapshot: PolicySnapshot) -> PolicySnapshot {
    for method in LockMethod::ALL {
        let state = snapshot.lock_mut(method);
        if !state.timing.is_valid() {
            warn!(%method, "stored timing invalid; using default");
            state.timing = method.default_timing();
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MemoryPersistence, StaticAccount};

    async fn store_with(
        persistence: Arc<MemoryPersistence>,
        has_account: bool,
        options: StoreOptions,
    ) -> UnlockPolicyStore {
        UnlockPolicyStore::load(persistence, Arc::new(StaticAccount::new(has_account)), options)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enable_sets_timing_for_every_method() {
        let store = store_with(Arc::new(MemoryPersistence::new()), false, StoreOptions::default()).await;
        for method in LockMethod::ALL {
            store
                .enable_lock(method, UnlockTiming::AfterMinutes(5))
                .await
                .unwrap();
            let state = store.lock_state(method);
            assert!(state.enabled);
            assert_eq!(state.timing, UnlockTiming::AfterMinutes(5));
        }
    }

    #[tokio::test]
    async fn repeat_enable_follows_options() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(persistence.clone(), false, StoreOptions::default()).await;
        store
            .enable_lock(LockMethod::Biometrics, UnlockTiming::OnQuit)
            .await
            .unwrap();
        store
            .enable_lock(LockMethod::Biometrics, UnlockTiming::Immediately)
            .await
            .unwrap();
        assert_eq!(store.lock_state(LockMethod::Biometrics).timing, UnlockTiming::OnQuit);
        assert_eq!(persistence.save_count(), 1);

        let strict = store_with(
            persistence,
            false,
            StoreOptions {
                repeat_enable: RepeatEnable::Reject,
            },
        )
        .await;
        let err = strict
            .enable_lock(LockMethod::Biometrics, UnlockTiming::OnQuit)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::AlreadyEnabled));
    }

    #[tokio::test]
    async fn unconfirmed_passcode_disable_changes_nothing() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(persistence.clone(), false, StoreOptions::default()).await;
        store
            .enable_lock(LockMethod::Passcode, UnlockTiming::Immediately)
            .await
            .unwrap();
        let before = store.snapshot();

        let err = store.disable_lock(LockMethod::Passcode, false).await.unwrap_err();
        assert!(matches!(err, LockError::NotConfirmed));
        assert_eq!(store.snapshot(), before);
        assert_eq!(persistence.save_count(), 1);
    }

    #[tokio::test]
    async fn biometrics_disable_needs_no_confirmation() {
        let store = store_with(Arc::new(MemoryPersistence::new()), false, StoreOptions::default()).await;
        store
            .enable_lock(LockMethod::Biometrics, UnlockTiming::AfterMinutes(15))
            .await
            .unwrap();
        store.disable_lock(LockMethod::Biometrics, false).await.unwrap();
        let state = store.lock_state(LockMethod::Biometrics);
        assert!(!state.enabled);
        assert_eq!(state.timing, LockMethod::Biometrics.default_timing());
        assert_eq!(store.encryption_policy(), StorageEncryptionPolicy::Default);
    }

    #[tokio::test]
    async fn timing_requires_enabled_method() {
        let store = store_with(Arc::new(MemoryPersistence::new()), false, StoreOptions::default()).await;
        let err = store
            .set_timing(LockMethod::Passcode, UnlockTiming::OnQuit)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::MethodNotEnabled));

        store
            .enable_lock(LockMethod::Passcode, UnlockTiming::Immediately)
            .await
            .unwrap();
        let err = store
            .set_timing(LockMethod::Passcode, UnlockTiming::AfterMinutes(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidTiming));
    }

    #[tokio::test]
    async fn disabling_requires_availability() {
        let store = store_with(Arc::new(MemoryPersistence::new()), false, StoreOptions::default()).await;
        let err = store
            .set_encryption_policy(StorageEncryptionPolicy::Disabled, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Unavailable));
        assert_eq!(store.encryption_policy(), StorageEncryptionPolicy::Default);

        store
            .set_encryption_policy(StorageEncryptionPolicy::Disabled, true)
            .await
            .unwrap();
        assert_eq!(store.encryption_policy(), StorageEncryptionPolicy::Disabled);

        // Re-enabling never depends on availability.
        store
            .set_encryption_policy(StorageEncryptionPolicy::Default, false)
            .await
            .unwrap();
        assert_eq!(store.encryption_policy(), StorageEncryptionPolicy::Default);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(persistence.clone(), false, StoreOptions::default()).await;
        persistence.set_fail_saves(true);

        let err = store
            .enable_lock(LockMethod::Passcode, UnlockTiming::Immediately)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.is_enabled(LockMethod::Passcode));
        assert!(persistence.stored().is_none());

        persistence.set_fail_saves(false);
        store
            .enable_lock(LockMethod::Passcode, UnlockTiming::Immediately)
            .await
            .unwrap();
        assert_eq!(persistence.stored().unwrap().snapshot, store.snapshot());
    }

    #[tokio::test]
    async fn failed_cascade_write_keeps_passcode_and_encryption() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(persistence.clone(), false, StoreOptions::default()).await;
        store
            .enable_lock(LockMethod::Passcode, UnlockTiming::OnQuit)
            .await
            .unwrap();
        let before = store.snapshot();
        let rx = store.subscribe();

        persistence.set_fail_saves(true);
        let err = store.disable_lock(LockMethod::Passcode, true).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.snapshot(), before);
        assert!(store.is_enabled(LockMethod::Passcode));
        assert_eq!(store.encryption_policy(), StorageEncryptionPolicy::Default);
        assert_eq!(persistence.stored().unwrap().snapshot, before);
        assert!(!rx.has_changed().unwrap());
        assert!(!store.is_busy());

        persistence.set_fail_saves(false);
        store.disable_lock(LockMethod::Passcode, true).await.unwrap();
        assert_eq!(store.encryption_policy(), StorageEncryptionPolicy::Disabled);
    }

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::acquire(&flag).unwrap();
        assert!(InFlight::acquire(&flag).is_none());
        assert!(flag.load(Ordering::Acquire));
        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlight::acquire(&flag).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_polling_never_rejects_sequential_mutations() {
        let store = Arc::new(
            store_with(Arc::new(MemoryPersistence::new()), false, StoreOptions::default()).await,
        );
        store
            .enable_lock(LockMethod::Passcode, UnlockTiming::Immediately)
            .await
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let poller = {
            let store = store.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut polls = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    std::hint::black_box(store.is_busy());
                    polls += 1;
                }
                polls
            })
        };

        let timings = [UnlockTiming::OnQuit, UnlockTiming::AfterMinutes(5)];
        for i in 0..20_000 {
            store
                .set_timing(LockMethod::Passcode, timings[i % 2])
                .await
                .unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        assert!(poller.join().unwrap() > 0);
        assert!(!store.is_busy());
    }

    #[tokio::test]
    async fn subscribers_see_committed_snapshots() {
        let store = store_with(Arc::new(MemoryPersistence::new()), false, StoreOptions::default()).await;
        let mut rx = store.subscribe();
        store
            .enable_lock(LockMethod::Passcode, UnlockTiming::OnQuit)
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().passcode.enabled);
        assert!(!store.is_busy());
    }

    #[tokio::test]
    async fn invalid_stored_timing_is_reset_on_load() {
        let mut snapshot = PolicySnapshot::default();
        snapshot.passcode = LockMethodState {
            enabled: true,
            timing: UnlockTiming::AfterMinutes(0),
        };
        let persistence = Arc::new(MemoryPersistence::with_state(PersistedState::new(snapshot)));
        let store = store_with(persistence, false, StoreOptions::default()).await;
        assert_eq!(
            store.lock_state(LockMethod::Passcode).timing,
            UnlockTiming::Immediately
        );
    }
}
