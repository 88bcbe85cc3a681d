//! The build wrapper: drives one build's state machine and translates
//! calls into the external build engine into durable checkpoints.
//!
//! ```text
//! pending -> creating -> provisioning -> post_processing -> complete
//!               |             |                 |
//!               +--- failed <-+-----------------+
//! ```
//! Transitions out of `failed` go back to `creating` (fresh) or
//! `provisioning` (resume) only.

mod wrapper;

pub use wrapper::{run_build, DecisionTrace};

use forgestate_store::{ArtifactRecord, InstanceRecord, StepRecord};

/// Opaque error from the external build engine.
#[derive(Debug, thiserror::Error)]
#[error("engine error: {0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Capability the build wrapper needs from the external build engine.
/// A real implementation would delegate to the actual provisioning
/// engine; tests use a scripted fake.
pub trait BuildEngine {
    /// Bring up the compute/build target for this build.
    fn create_instance(&self, build_name: &str) -> Result<InstanceRecord, EngineError>;

    /// Execute a single provisioning or post-processing step against an
    /// already-created instance.
    fn run_step(
        &self,
        build_name: &str,
        instance: &InstanceRecord,
        step: &StepRecord,
    ) -> Result<(), EngineError>;

    /// Produce the final artifact set once all steps have completed.
    fn finalize(
        &self,
        build_name: &str,
        instance: &InstanceRecord,
    ) -> Result<Vec<ArtifactRecord>, EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    #[error(transparent)]
    Manager(#[from] forgestate_manager::ManagerError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Declarative description of a build to run: its logical name, engine
/// kind, and the ordered provisioner steps it should have.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub name: String,
    pub build_type: String,
    pub provisioners: Vec<(String, String)>,
}
