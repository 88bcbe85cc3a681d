use crate::{BuildEngine, BuildSpec, EngineError, WrapperError};
use chrono::Utc;
use forgestate_manager::Session;
use forgestate_store::{ArtifactRecord, BuildRecord, BuildStatus, StepRecord, StepStatus};

/// What the decision tree chose to do — returned alongside the result so
/// callers and tests can assert on it without re-deriving it from status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionTrace {
    CacheHit,
    Resumed,
    Fresh,
}

/// Run (or skip, or resume) `spec` against `session`, checkpointing after
/// every state transition per the checkpoint discipline.
///
/// `doc_inputs_unchanged` is the caller's `Session::inputs_changed`
/// result, negated: true means the template-level inputs are identical
/// to what produced the build's last recorded `complete` status.
pub fn run_build(
    session: &mut Session,
    spec: &BuildSpec,
    doc_inputs_unchanged: bool,
    engine: &dyn BuildEngine,
) -> Result<(Vec<ArtifactRecord>, DecisionTrace), WrapperError> {
    let existing = session.document().builds.get(&spec.name).cloned();

    if let Some(build) = &existing {
        if build.status == BuildStatus::Complete && doc_inputs_unchanged {
            tracing::info!(build = %spec.name, "cache hit, skipping build");
            return Ok((build.artifacts.clone(), DecisionTrace::CacheHit));
        }
        if build.instance.is_some() {
            tracing::info!(build = %spec.name, "resuming build");
            let artifacts = resume(session, spec, engine)?;
            return Ok((artifacts, DecisionTrace::Resumed));
        }
    }

    tracing::info!(build = %spec.name, "starting fresh build");
    let artifacts = fresh_build(session, spec, engine)?;
    Ok((artifacts, DecisionTrace::Fresh))
}

/// First index in `provisioners` whose status is `pending` or `failed`;
/// `len` if every step is in a terminal-complete state.
pub fn next_pending_step(provisioners: &[StepRecord]) -> usize {
    provisioners
        .iter()
        .position(|s| matches!(s.status, StepStatus::Pending | StepStatus::Failed))
        .unwrap_or(provisioners.len())
}

fn resume(
    session: &mut Session,
    spec: &BuildSpec,
    engine: &dyn BuildEngine,
) -> Result<Vec<ArtifactRecord>, WrapperError> {
    let mut build = session
        .document()
        .builds
        .get(&spec.name)
        .cloned()
        .expect("resume called only when a build record exists");

    // A step still `running` at entry means the process driving it is
    // gone; treat it like any other interrupted attempt.
    for step in &mut build.provisioners {
        if step.status == StepStatus::Running {
            step.status = StepStatus::Failed;
            step.error = Some("interrupted: process exited while step was running".to_string());
        }
    }

    let instance = build
        .instance
        .clone()
        .expect("resume called only when an instance is recorded");

    build.status = BuildStatus::Provisioning;
    session.document_mut().builds.insert(spec.name.clone(), build);
    session.save()?;

    run_provisioners_from(session, spec, &instance, engine)
}

fn fresh_build(
    session: &mut Session,
    spec: &BuildSpec,
    engine: &dyn BuildEngine,
) -> Result<Vec<ArtifactRecord>, WrapperError> {
    let steps: Vec<(&str, &str)> = spec
        .provisioners
        .iter()
        .map(|(t, n)| (t.as_str(), n.as_str()))
        .collect();
    let mut build = BuildRecord::new(spec.name.clone(), spec.build_type.clone(), &steps);
    build.started_at = Some(Utc::now());
    session.document_mut().builds.insert(spec.name.clone(), build);
    session.save()?;

    set_status(session, &spec.name, BuildStatus::Creating);
    session.save()?;

    let instance = match engine.create_instance(&spec.name) {
        Ok(instance) => instance,
        Err(e) => return Err(fail_build(session, spec, e)?),
    };

    {
        let doc = session.document_mut();
        let build = doc.builds.get_mut(&spec.name).unwrap();
        build.instance = Some(instance.clone());
        build.status = BuildStatus::Provisioning;
    }
    session.save()?;

    run_provisioners_from(session, spec, &instance, engine)
}

fn run_provisioners_from(
    session: &mut Session,
    spec: &BuildSpec,
    instance: &forgestate_store::InstanceRecord,
    engine: &dyn BuildEngine,
) -> Result<Vec<ArtifactRecord>, WrapperError> {
    loop {
        let start_index = {
            let build = session.document().builds.get(&spec.name).unwrap();
            next_pending_step(&build.provisioners)
        };

        let total = session.document().builds.get(&spec.name).unwrap().provisioners.len();
        if start_index >= total {
            break;
        }

        {
            let doc = session.document_mut();
            let build = doc.builds.get_mut(&spec.name).unwrap();
            let step = &mut build.provisioners[start_index];
            step.status = StepStatus::Running;
            step.error = None;
            step.started_at = Some(Utc::now());
        }
        session.save()?;

        let step_snapshot = session
            .document()
            .builds
            .get(&spec.name)
            .unwrap()
            .provisioners[start_index]
            .clone();

        let outcome = engine.run_step(&spec.name, instance, &step_snapshot);

        match outcome {
            Ok(()) => {
                let doc = session.document_mut();
                let build = doc.builds.get_mut(&spec.name).unwrap();
                let step = &mut build.provisioners[start_index];
                step.status = StepStatus::Complete;
                step.ended_at = Some(Utc::now());
                session.save()?;
            }
            Err(e) => {
                {
                    let doc = session.document_mut();
                    let build = doc.builds.get_mut(&spec.name).unwrap();
                    let step = &mut build.provisioners[start_index];
                    step.status = StepStatus::Failed;
                    step.error = Some(e.0.clone());
                    step.ended_at = Some(Utc::now());
                }
                return Err(fail_build(session, spec, e)?);
            }
        }
    }

    set_status(session, &spec.name, BuildStatus::PostProcessing);
    session.save()?;

    let artifacts = match engine.finalize(&spec.name, instance) {
        Ok(artifacts) => artifacts,
        Err(e) => return Err(fail_build(session, spec, e)?),
    };

    {
        let doc = session.document_mut();
        let build = doc.builds.get_mut(&spec.name).unwrap();
        build.status = BuildStatus::Complete;
        build.completed_at = Some(Utc::now());
        build.artifacts = artifacts.clone();
    }
    session.save()?;

    Ok(artifacts)
}

fn set_status(session: &mut Session, name: &str, status: BuildStatus) {
    let doc = session.document_mut();
    let build = doc.builds.get_mut(name).unwrap();
    build.status = status;
}

/// Record the failure on the build (preserving the instance if the
/// engine asked to keep it on failure) and return the error to the
/// caller. Always checkpoints before returning.
fn fail_build(session: &mut Session, spec: &BuildSpec, e: EngineError) -> Result<WrapperError, WrapperError> {
    {
        let doc = session.document_mut();
        let build = doc.builds.get_mut(&spec.name).unwrap();
        build.status = BuildStatus::Failed;
        build.error = Some(e.0.clone());
        let keep = build.instance.as_ref().is_some_and(|i| i.keep_on_failure);
        if !keep {
            build.instance = None;
        }
    }
    session.save()?;
    Ok(WrapperError::Engine(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use forgestate_store::InstanceRecord;
    use std::sync::Mutex;

    struct ScriptedEngine {
        fail_step: Option<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(fail_step: Option<usize>) -> Self {
            Self {
                fail_step,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl BuildEngine for ScriptedEngine {
        fn create_instance(&self, build_name: &str) -> Result<InstanceRecord, EngineError> {
            self.calls.lock().unwrap().push(format!("create:{build_name}"));
            Ok(InstanceRecord {
                id: "i-1".into(),
                builder_id: "qemu".into(),
                provider: "local".into(),
                region: "local".into(),
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
            self.calls.lock().unwrap().push(format!("step:{build_name}:{}", step.name));
            let index: usize = step.name.trim_start_matches("step").parse().unwrap_or(0);
            if self.fail_step == Some(index) {
                return Err(EngineError::new(format!("step {index} failed")));
            }
            Ok(())
        }

        fn finalize(
            &self,
            build_name: &str,
            _instance: &InstanceRecord,
        ) -> Result<Vec<ArtifactRecord>, EngineError> {
            self.calls.lock().unwrap().push(format!("finalize:{build_name}"));
            Ok(vec![ArtifactRecord {
                id: "a-1".into(),
                builder_id: "qemu".into(),
                artifact_type: "qcow2".into(),
                files: vec!["disk.qcow2".into()],
                ..Default::default()
            }])
        }
    }

    fn spec() -> BuildSpec {
        BuildSpec {
            name: "web".into(),
            build_type: "qemu".into(),
            provisioners: vec![
                ("shell".into(), "step0".into()),
                ("shell".into(), "step1".into()),
                ("shell".into(), "step2".into()),
            ],
        }
    }

    fn open(dir: &tempfile::TempDir) -> Session {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("builder-state.json")).unwrap();
        Session::open(&path, "build", "t@h").unwrap()
    }

    #[test]
    fn s1_fresh_success_all_three_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(&dir);
        let engine = ScriptedEngine::new(None);

        let (artifacts, trace) = run_build(&mut session, &spec(), false, &engine).unwrap();
        assert_eq!(trace, DecisionTrace::Fresh);
        assert_eq!(artifacts.len(), 1);

        let build = session.document().builds.get("web").unwrap();
        assert_eq!(build.status, BuildStatus::Complete);
        assert!(build.provisioners.iter().all(|s| s.status == StepStatus::Complete));
        assert!(build.completed_at.is_some());
    }

    #[test]
    fn s2_idempotent_rerun_is_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(&dir);
        let engine = ScriptedEngine::new(None);
        run_build(&mut session, &spec(), false, &engine).unwrap();

        let (artifacts, trace) = run_build(&mut session, &spec(), true, &engine).unwrap();
        assert_eq!(trace, DecisionTrace::CacheHit);
        assert_eq!(artifacts.len(), 1);
        // engine was not invoked again beyond the first run's three calls
        assert_eq!(engine.calls.lock().unwrap().len(), 5);
    }

    #[test]
    fn s3_failure_at_step_two_of_three() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(&dir);
        let engine = ScriptedEngine::new(Some(1));

        let result = run_build(&mut session, &spec(), false, &engine);
        assert!(result.is_err());

        let build = session.document().builds.get("web").unwrap();
        assert_eq!(build.status, BuildStatus::Failed);
        assert!(build.error.is_some());
        assert_eq!(build.provisioners[0].status, StepStatus::Complete);
        assert_eq!(build.provisioners[1].status, StepStatus::Failed);
        assert_eq!(build.provisioners[2].status, StepStatus::Pending);
        assert!(build.instance.as_ref().unwrap().keep_on_failure);
    }

    #[test]
    fn s4_resume_after_failure_clears_error_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(&dir);
        let failing_engine = ScriptedEngine::new(Some(1));
        let _ = run_build(&mut session, &spec(), false, &failing_engine);

        let fixed_engine = ScriptedEngine::new(None);
        let (artifacts, trace) = run_build(&mut session, &spec(), false, &fixed_engine).unwrap();
        assert_eq!(trace, DecisionTrace::Resumed);
        assert_eq!(artifacts.len(), 1);

        let build = session.document().builds.get("web").unwrap();
        assert_eq!(build.status, BuildStatus::Complete);
        assert!(build.provisioners.iter().all(|s| s.status == StepStatus::Complete));
        assert!(build.provisioners[1].error.is_none());
    }

    #[test]
    fn next_pending_step_skips_completed_prefix() {
        let mut steps = vec![
            StepRecord::pending("shell", "a"),
            StepRecord::pending("shell", "b"),
            StepRecord::pending("shell", "c"),
        ];
        steps[0].status = StepStatus::Complete;
        assert_eq!(next_pending_step(&steps), 1);

        steps[1].status = StepStatus::Complete;
        steps[2].status = StepStatus::Complete;
        assert_eq!(next_pending_step(&steps), 3);
    }

    #[test]
    fn running_step_found_on_resume_is_treated_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(&dir);
        let engine = ScriptedEngine::new(Some(1));
        let _ = run_build(&mut session, &spec(), false, &engine);

        // Simulate a crash mid-step: step 1 left `running` instead of `failed`.
        {
            let doc = session.document_mut();
            let build = doc.builds.get_mut("web").unwrap();
            build.provisioners[1].status = StepStatus::Running;
            build.provisioners[1].error = None;
        }
        session.save().unwrap();

        let fixed_engine = ScriptedEngine::new(None);
        let (_, trace) = run_build(&mut session, &spec(), false, &fixed_engine).unwrap();
        assert_eq!(trace, DecisionTrace::Resumed);
        let build = session.document().builds.get("web").unwrap();
        assert_eq!(build.status, BuildStatus::Complete);
    }
}
