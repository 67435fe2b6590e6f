//! notelock-core: unlock policy for the local note store
//!
//! Tracks whether local data is encrypted at rest, which lock methods
//! (passcode, biometrics) gate the app and when each one re-engages.
//!
//! # Module layout
//! - `policy`: encryption policy, lock methods, snapshots, on-disk state
//! - `timing`: re-lock timings and the selectable option list
//! - `store`: `UnlockPolicyStore`, the validated and persisted source of truth
//! - `settings`: settings-section coordinator and its view model
//! - `relock`: which locks a launch or resume must satisfy
//! - `capabilities`: persistence / biometrics / confirmation / account contracts
//! - `persistence`: JSON file persistence with atomic writes
//! - `passcode`: Argon2id passcode credential
//! - `config`, `paths`: configuration and platform directories
//! - `error`: error types

pub mod capabilities;
pub mod config;
pub mod error;
pub mod passcode;
pub mod paths;
pub mod persistence;
pub mod policy;
pub mod relock;
pub mod settings;
pub mod store;
pub mod timing;

pub use error::{LockError, PasscodeError, PersistenceError, PolicyError};
pub use policy::{LockMethod, LockMethodState, PersistedState, PolicySnapshot, StorageEncryptionPolicy};
pub use settings::{LockSettings, SectionView};
pub use store::{RepeatEnable, StoreOptions, UnlockPolicyStore};
pub use timing::{TimingOption, UnlockTiming};
