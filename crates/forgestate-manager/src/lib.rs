//! Binds [`forgestate_store`] and [`forgestate_lock`] into a session with
//! a single, well-defined lifecycle: `open` acquires the lock and loads
//! (or creates) the document; `save` persists pending changes; `close`
//! saves and releases; `unlock` releases without saving.

use camino::{Utf8Path, Utf8PathBuf};
use forgestate_lock::{LockError, LockHandle, LockRecord};
use forgestate_store::{StateDocument, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no build named {0}")]
    NoSuchBuild(String),
    #[error("no active session")]
    NoSession,
}

/// An open, locked session against one state path.
pub struct Session {
    path: Utf8PathBuf,
    lock: Option<LockHandle>,
    doc: StateDocument,
}

impl Session {
    /// Acquire the lock for `path` (operation label `operation`, identity
    /// `who`) and load the document, synthesizing a fresh one with a new
    /// lineage if none exists yet.
    pub fn open(path: &Utf8Path, operation: &str, who: &str) -> Result<Self, ManagerError> {
        let lock = forgestate_lock::acquire(path, operation, who)?;

        let doc = match forgestate_store::load(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => StateDocument::new(new_lineage(), env!("CARGO_PKG_VERSION").to_string()),
            Err(e) => {
                let _ = forgestate_lock::release(lock);
                return Err(ManagerError::Store(e));
            }
        };

        Ok(Self {
            path: path.to_owned(),
            lock: Some(lock),
            doc,
        })
    }

    pub fn document(&self) -> &StateDocument {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut StateDocument {
        &mut self.doc
    }

    pub fn lock_record(&self) -> Option<&LockRecord> {
        self.lock.as_ref().map(|l| l.record())
    }

    /// Persist pending changes. Must be called while the lock is held.
    pub fn save(&mut self) -> Result<(), ManagerError> {
        let lock = self.lock.as_ref().ok_or(ManagerError::NoSession)?;
        forgestate_store::save(&mut self.doc, &self.path, lock)?;
        tracing::debug!(path = %self.path, serial = self.doc.serial, "saved state document");
        Ok(())
    }

    /// Save any pending changes, then release the lock.
    pub fn close(mut self) -> Result<(), ManagerError> {
        self.save()?;
        self.unlock()
    }

    /// Release the lock without saving.
    pub fn unlock(mut self) -> Result<(), ManagerError> {
        if let Some(lock) = self.lock.take() {
            forgestate_lock::release(lock)?;
        }
        Ok(())
    }

    /// Whether `(template_hash, variables, files)` differ from the
    /// currently loaded `TemplateRecord`. Absence of a key counts as a
    /// difference from any present key; comparison is deep equality.
    pub fn inputs_changed(
        &self,
        template_hash: &str,
        variables: &std::collections::BTreeMap<String, String>,
        files: &std::collections::BTreeMap<String, String>,
    ) -> bool {
        self.doc.template.hash != template_hash
            || &self.doc.template.variables != variables
            || &self.doc.template.files != files
    }

    /// Overwrite the template record. Does not save; call `save`
    /// explicitly afterward.
    pub fn update_template_inputs(
        &mut self,
        path: impl Into<String>,
        hash: impl Into<String>,
        variables: std::collections::BTreeMap<String, String>,
        files: std::collections::BTreeMap<String, String>,
    ) {
        self.doc.template.path = path.into();
        self.doc.template.hash = hash.into();
        self.doc.template.variables = variables;
        self.doc.template.files = files;
    }
}

fn new_lineage() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("lineage-{nanos:x}-{}", std::process::id())
}
