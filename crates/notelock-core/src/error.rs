use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("policy storage I/O failed: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("policy file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("unsupported policy schema version {0}")]
    UnsupportedVersion(u32),
}

impl PersistenceError {
    /// Only I/O failures are transient; a corrupt or future-version file
    /// stays broken until something else changes it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::IoFailure(_))
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("storage encryption cannot be disabled: no passcode or account keys")]
    Unavailable,

    #[error("another policy change is still being applied")]
    OperationInProgress,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl PolicyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PolicyError::Persistence(e) if e.is_retryable())
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock method is already enabled")]
    AlreadyEnabled,

    #[error("disabling this lock method requires confirmation")]
    NotConfirmed,

    #[error("lock method is not enabled")]
    MethodNotEnabled,

    #[error("another policy change is still being applied")]
    OperationInProgress,

    #[error("timing must be at least one minute")]
    InvalidTiming,

    #[error("biometrics are not supported on this device")]
    BiometricsUnavailable,

    #[error("no biometrics are enrolled on this device")]
    BiometricsNotEnrolled,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl LockError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Persistence(e) if e.is_retryable())
    }
}

#[derive(Debug, Error)]
pub enum PasscodeError {
    #[error("passcode must be at least {0} characters")]
    TooShort(usize),

    #[error("passcode hashing failed: {0}")]
    Hash(String),

    #[error("passcode file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("passcode file is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}
