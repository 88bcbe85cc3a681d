//! Library-facing error taxonomy and its mapping to CLI exit codes.

use forgestate_lock::LockError;
use forgestate_manager::ManagerError;
use forgestate_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("corrupt state: {0}")]
    CorruptState(String),
    #[error("already locked: owner={owner} operation={operation} id={id} created={created_at}")]
    AlreadyLocked {
        owner: String,
        operation: String,
        id: String,
        created_at: String,
    },
    #[error("lock stolen: {0}")]
    LockStolen(String),
    #[error("no active session")]
    NoSession,
    #[error("no such build: {0}")]
    NoSuchBuild(String),
    #[error("engine error: {0}")]
    EngineError(String),
}

impl ForgeError {
    /// Exit code for the CLI boundary, layered on top of the spec's
    /// baseline 0/success, 1/any-core-error contract as an ergonomics
    /// enhancement — callers that only care about the core contract can
    /// still treat anything nonzero as failure.
    pub fn to_exit_code(&self) -> i32 {
        match self {
            ForgeError::IoError(_) => 1,
            ForgeError::CorruptState(_) => 3,
            ForgeError::AlreadyLocked { .. } => 9,
            ForgeError::LockStolen(_) => 9,
            ForgeError::NoSession => 4,
            ForgeError::NoSuchBuild(_) => 5,
            ForgeError::EngineError(_) => 70,
        }
    }
}

impl From<ManagerError> for ForgeError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::Lock(lock_err) => lock_err.into(),
            ManagerError::Store(store_err) => store_err.into(),
            ManagerError::NoSuchBuild(name) => ForgeError::NoSuchBuild(name),
            ManagerError::NoSession => ForgeError::NoSession,
        }
    }
}

impl From<LockError> for ForgeError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyLocked {
                who,
                operation,
                id,
                created_at,
            } => ForgeError::AlreadyLocked {
                owner: who,
                operation,
                id,
                created_at,
            },
            LockError::LockStolen { expected, found } => {
                ForgeError::LockStolen(format!("expected {expected}, found {found}"))
            }
            LockError::Io { path, source } => ForgeError::IoError(format!("{path}: {source}")),
        }
    }
}

impl From<StoreError> for ForgeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io { path, source } => ForgeError::IoError(format!("{path}: {source}")),
            StoreError::CorruptState { path, reason } => {
                ForgeError::CorruptState(format!("{path}: {reason}"))
            }
        }
    }
}

impl From<forgestate_engine::WrapperError> for ForgeError {
    fn from(e: forgestate_engine::WrapperError) -> Self {
        match e {
            forgestate_engine::WrapperError::Manager(m) => m.into(),
            forgestate_engine::WrapperError::Engine(eng) => ForgeError::EngineError(eng.0),
        }
    }
}
