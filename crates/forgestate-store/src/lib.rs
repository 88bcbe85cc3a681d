//! On-disk representation of a [`StateDocument`]: load, save, and the
//! per-build mapping operations. Serialization is indented JSON; writes
//! are atomic (see `forgestate_utils::atomic_write`).

pub mod error;
pub mod model;

pub use error::StoreError;
pub use model::{
    ArtifactRecord, BuildRecord, BuildStatus, InstanceRecord, RunInfo, StateDocument, StepRecord,
    StepStatus, TemplateRecord, CURRENT_VERSION,
};

use camino::Utf8Path;
use forgestate_lock::LockHandle;
use forgestate_utils::write_file_atomic;

/// Load the document at `path`, or `None` if no file exists there.
///
/// A file that exists but cannot be parsed, or whose `version` is not
/// [`CURRENT_VERSION`], is reported as `CorruptState` rather than treated
/// as absent — silently discarding prior progress is never the right
/// recovery for a state engine.
pub fn load(path: &Utf8Path) -> Result<Option<StateDocument>, StoreError> {
    let body = match std::fs::read_to_string(path.as_std_path()) {
        Ok(body) => body,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_string(),
                source,
            });
        }
    };

    if body.trim().is_empty() {
        return Err(StoreError::CorruptState {
            path: path.to_string(),
            reason: "file is empty".to_string(),
        });
    }

    let doc: StateDocument = serde_json::from_str(&body).map_err(|e| StoreError::CorruptState {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    if doc.version != CURRENT_VERSION {
        return Err(StoreError::CorruptState {
            path: path.to_string(),
            reason: format!(
                "unrecognized schema version {} (expected {CURRENT_VERSION})",
                doc.version
            ),
        });
    }

    Ok(Some(doc))
}

/// Durably persist `doc` to `path`, incrementing `serial` first.
///
/// Requires proof that the caller holds the lock guarding `path` (a
/// [`LockHandle`]) — this is the concrete enforcement of the rule that
/// `save` is never called outside a locked session, rather than a
/// runtime re-check that would itself be racy.
pub fn save(doc: &mut StateDocument, path: &Utf8Path, _guard: &LockHandle) -> Result<(), StoreError> {
    doc.serial += 1;
    let body = serde_json::to_string_pretty(doc).expect("StateDocument always serializes");
    write_file_atomic(path, &body).map_err(|e| StoreError::Io {
        path: path.to_string(),
        source: std::io::Error::other(e.to_string()),
    })?;
    Ok(())
}

pub fn get_build<'a>(doc: &'a StateDocument, name: &str) -> Option<&'a BuildRecord> {
    doc.builds.get(name)
}

pub fn set_build(doc: &mut StateDocument, name: impl Into<String>, record: BuildRecord) {
    doc.builds.insert(name.into(), record);
}

pub fn remove_build(doc: &mut StateDocument, name: &str) -> Option<BuildRecord> {
    doc.builds.remove(name)
}

/// Content hash over template hash, variables, and files — order-
/// independent since `TemplateRecord`'s maps are `BTreeMap`s, which
/// always iterate in sorted key order.
pub fn compute_fingerprint(doc: &StateDocument) -> String {
    let mut buf = String::new();
    buf.push_str(&doc.template.hash);
    buf.push('\n');
    for (k, v) in &doc.template.variables {
        buf.push_str(k);
        buf.push('=');
        buf.push_str(v);
        buf.push('\n');
    }
    for (k, v) in &doc.template.files {
        buf.push_str(k);
        buf.push('=');
        buf.push_str(v);
        buf.push('\n');
    }
    forgestate_fingerprint::hash_string(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn temp_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("builder-state.json")).unwrap()
    }

    #[test]
    fn load_on_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips_and_increments_serial() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        let lock = forgestate_lock::acquire(&path, "build", "t@h").unwrap();

        let mut doc = StateDocument::new("lineage-1".into(), "1.0.0".into());
        doc.template.hash = "sha256:aaaa".into();
        save(&mut doc, &path, &lock).unwrap();
        assert_eq!(doc.serial, 1);

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.lineage, "lineage-1");
        assert_eq!(loaded.serial, 1);

        save(&mut doc, &path, &lock).unwrap();
        assert_eq!(doc.serial, 2);

        forgestate_lock::release(lock).unwrap();
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        std::fs::write(path.as_std_path(), "").unwrap();
        assert!(matches!(load(&path), Err(StoreError::CorruptState { .. })));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        std::fs::write(
            path.as_std_path(),
            r#"{"version":999,"serial":0,"lineage":"x","builder_version":"","engine_version":"","template":{"path":"","hash":"","variables":{},"files":{}},"builds":{}}"#,
        )
        .unwrap();
        assert!(matches!(load(&path), Err(StoreError::CorruptState { .. })));
    }

    #[test]
    fn build_mapping_operations() {
        let mut doc = StateDocument::new("l".into(), "1.0.0".into());
        assert!(get_build(&doc, "web").is_none());

        set_build(&mut doc, "web", BuildRecord::new("web", "qemu", &[("shell", "install")]));
        assert!(get_build(&doc, "web").is_some());

        let removed = remove_build(&mut doc, "web");
        assert!(removed.is_some());
        assert!(get_build(&doc, "web").is_none());
    }

    #[test]
    fn fingerprint_is_order_independent_over_maps() {
        let mut a = StateDocument::new("l".into(), "1.0.0".into());
        a.template.hash = "sha256:base".into();
        a.template.variables.insert("b".into(), "2".into());
        a.template.variables.insert("a".into(), "1".into());

        let mut b = StateDocument::new("l".into(), "1.0.0".into());
        b.template.hash = "sha256:base".into();
        b.template.variables.insert("a".into(), "1".into());
        b.template.variables.insert("b".into(), "2".into());

        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn fingerprint_changes_when_a_variable_changes() {
        let mut a = StateDocument::new("l".into(), "1.0.0".into());
        a.template.hash = "sha256:base".into();
        a.template.variables.insert("a".into(), "1".into());

        let mut b = a.clone();
        b.template.variables.insert("a".into(), "2".into());

        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&b));
    }
}
