//! A [`BuildEngine`] that shells out to external commands.
//!
//! The actual image-build engine is an out-of-scope collaborator (see
//! `SPEC_FULL.md` §1/§6); this adapter is the thinnest possible bridge
//! between the durable state engine and *some* real process, so the
//! `build` command has something concrete to drive. It substitutes
//! `{build}` and `{step}` into caller-supplied command templates and
//! treats a nonzero exit status as step/engine failure.

use camino::Utf8Path;
use chrono::Utc;
use forgestate_engine::{BuildEngine, EngineError};
use forgestate_store::{ArtifactRecord, InstanceRecord, StepRecord};
use std::process::Command;

pub struct ShellEngine {
    pub create_cmd: Option<String>,
    pub step_cmd: String,
    pub finalize_cmd: Option<String>,
    pub artifact_dir: camino::Utf8PathBuf,
}

impl ShellEngine {
    fn run_shell(&self, cmd: &str) -> Result<(), EngineError> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .map_err(|e| EngineError::new(format!("failed to spawn `{cmd}`: {e}")))?;
        if !status.success() {
            return Err(EngineError::new(format!(
                "command `{cmd}` exited with {status}"
            )));
        }
        Ok(())
    }
}

impl BuildEngine for ShellEngine {
    fn create_instance(&self, build_name: &str) -> Result<InstanceRecord, EngineError> {
        if let Some(cmd) = &self.create_cmd {
            self.run_shell(&cmd.replace("{build}", build_name))?;
        }
        Ok(InstanceRecord {
            id: format!("local-{build_name}"),
            builder_id: "shell".to_string(),
            provider: "local".to_string(),
            region: "local".to_string(),
            created_at: Utc::now(),
            keep_on_failure: true,
            ..Default::default()
        })
    }

    fn run_step(
        &self,
        build_name: &str,
        _instance: &InstanceRecord,
        step: &StepRecord,
    ) -> Result<(), EngineError> {
        let cmd = self
            .step_cmd
            .replace("{build}", build_name)
            .replace("{step}", &step.name);
        self.run_shell(&cmd)
    }

    fn finalize(
        &self,
        build_name: &str,
        _instance: &InstanceRecord,
    ) -> Result<Vec<ArtifactRecord>, EngineError> {
        if let Some(cmd) = &self.finalize_cmd {
            self.run_shell(&cmd.replace("{build}", build_name))?;
        }
        let files = match std::fs::read_dir(self.artifact_dir.as_std_path()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        Ok(vec![ArtifactRecord {
            id: format!("{build_name}-artifact"),
            builder_id: "shell".to_string(),
            artifact_type: "directory".to_string(),
            files,
            ..Default::default()
        }])
    }
}

pub fn default_artifact_dir(state_path: &Utf8Path) -> camino::Utf8PathBuf {
    state_path
        .parent()
        .unwrap_or_else(|| Utf8Path::new("."))
        .join("artifacts")
}
