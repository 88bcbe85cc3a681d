//! `forgestate`: a durable, crash-safe state engine wrapping an external
//! image-build provisioner. See `SPEC_FULL.md` for the full design.

pub mod cli;
pub mod config;
pub mod error;
pub mod shell_engine;

pub use config::Config;
pub use error::ForgeError;

pub use forgestate_engine::{run_build, BuildEngine, BuildSpec, DecisionTrace, EngineError, WrapperError};
pub use forgestate_fingerprint::{hash_file, hash_string};
pub use forgestate_lock::{self as lock, LockError, LockRecord};
pub use forgestate_manager::{ManagerError, Session};
pub use forgestate_store::{
    self as store, ArtifactRecord, BuildRecord, BuildStatus, InstanceRecord, StateDocument,
    StepRecord, StepStatus, StoreError, TemplateRecord,
};
