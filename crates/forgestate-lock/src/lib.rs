//! Single-writer exclusion over a state path, backed by an exclusively
//! created lock file.
//!
//! This is deliberately narrower than a general-purpose advisory lock:
//! one non-blocking attempt, no staleness TTL, no liveness check of the
//! holder, no retry loop. A caller that wants to wait for a lock to free
//! up must poll `acquire` itself.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

/// Identity and provenance of a held lock, persisted as the lock file's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub id: String,
    pub operation: String,
    pub who: String,
    pub created: DateTime<Utc>,
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock already held by {who} (operation={operation}, id={id}, created={created_at})")]
    AlreadyLocked {
        who: String,
        operation: String,
        id: String,
        created_at: String,
    },
    #[error("lock stolen: expected id {expected}, found {found}")]
    LockStolen { expected: String, found: String },
    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A held lock. Dropping without calling `release` leaves the lock file
/// in place; this is intentional — the spec has no finalizer-based
/// auto-release, only explicit `release` and `force_release`.
#[derive(Debug)]
pub struct LockHandle {
    lock_path: Utf8PathBuf,
    record: LockRecord,
}

impl LockHandle {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn lock_path(&self) -> &Utf8Path {
        &self.lock_path
    }
}

/// Attempt to acquire the lock guarding `state_path`. Single non-blocking
/// attempt: if the lock file already exists, fails immediately with
/// `AlreadyLocked`, best-effort populated from whatever can be parsed out
/// of the existing file.
pub fn acquire(state_path: &Utf8Path, operation: &str, who: &str) -> Result<LockHandle, LockError> {
    let lock_path = forgestate_utils::paths::lock_path_for(state_path);

    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path.as_std_path());

    let mut file = match file {
        Ok(f) => f,
        Err(source) if source.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(existing_lock_error(&lock_path));
        }
        Err(source) => {
            return Err(LockError::Io {
                path: lock_path.to_string(),
                source,
            });
        }
    };

    let record = LockRecord {
        id: new_lock_id(),
        operation: operation.to_string(),
        who: who.to_string(),
        created: Utc::now(),
        path: state_path.to_string(),
    };

    let body = serde_json::to_string_pretty(&record).expect("LockRecord always serializes");
    if let Err(source) = file.write_all(body.as_bytes()).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(lock_path.as_std_path());
        return Err(LockError::Io {
            path: lock_path.to_string(),
            source,
        });
    }

    Ok(LockHandle { lock_path, record })
}

fn existing_lock_error(lock_path: &Utf8Path) -> LockError {
    match fs::read_to_string(lock_path.as_std_path()) {
        Ok(body) => match serde_json::from_str::<LockRecord>(&body) {
            Ok(record) => LockError::AlreadyLocked {
                who: record.who,
                operation: record.operation,
                id: record.id,
                created_at: record.created.to_rfc3339(),
            },
            Err(_) => LockError::AlreadyLocked {
                who: "unknown".to_string(),
                operation: "unknown".to_string(),
                id: "unknown".to_string(),
                created_at: "unknown".to_string(),
            },
        },
        Err(_) => LockError::AlreadyLocked {
            who: "unknown".to_string(),
            operation: "unknown".to_string(),
            id: "unknown".to_string(),
            created_at: "unknown".to_string(),
        },
    }
}

/// Release a held lock. Reads the lock file back and compares its `id`
/// against the handle's own id; a mismatch means something else force-
/// released and re-acquired the lock in the meantime, surfaced as
/// `LockStolen`. A missing lock file at release time is not an error.
pub fn release(handle: LockHandle) -> Result<(), LockError> {
    match fs::read_to_string(handle.lock_path.as_std_path()) {
        Ok(body) => {
            let on_disk: LockRecord =
                serde_json::from_str(&body).map_err(|_| LockError::LockStolen {
                    expected: handle.record.id.clone(),
                    found: "<unparseable>".to_string(),
                })?;
            if on_disk.id != handle.record.id {
                return Err(LockError::LockStolen {
                    expected: handle.record.id.clone(),
                    found: on_disk.id,
                });
            }
            fs::remove_file(handle.lock_path.as_std_path()).map_err(|source| LockError::Io {
                path: handle.lock_path.to_string(),
                source,
            })
        }
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: handle.lock_path.to_string(),
            source,
        }),
    }
}

/// Unconditionally remove the lock file for `state_path`, regardless of
/// ownership. The only supported recovery from an abandoned lock.
pub fn force_release(state_path: &Utf8Path) -> Result<(), LockError> {
    let lock_path = forgestate_utils::paths::lock_path_for(state_path);
    match fs::remove_file(lock_path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: lock_path.to_string(),
            source,
        }),
    }
}

fn new_lock_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("{nanos:x}-{pid:x}")
}
