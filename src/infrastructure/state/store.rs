//! State Store: atomic, versioned persistence of each template's `next_run`.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Bumped whenever the on-disk shape changes; a mismatch discards the file
/// rather than attempting a migration.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode state file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    next_run: HashMap<String, NaiveDateTime>,
}

/// Loads `next_run` timestamps keyed by template name. A missing file is
/// treated as empty state, not an error; a version mismatch or corrupt file
/// is logged and treated as empty state rather than propagated, since state
/// loss is always recoverable by rescheduling from "now".
pub fn load_state(path: &Path) -> HashMap<String, NaiveDateTime> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to read state file, starting fresh");
            return HashMap::new();
        }
    };

    match serde_json::from_str::<StateFile>(&contents) {
        Ok(state) if state.version == STATE_VERSION => state.next_run,
        Ok(state) => {
            warn!(
                found = state.version,
                expected = STATE_VERSION,
                "ignoring obsolete state file"
            );
            HashMap::new()
        }
        Err(e) => {
            warn!(error = %e, "state file is corrupt, starting fresh");
            HashMap::new()
        }
    }
}

/// Writes `next_run` atomically: a temp file in the same directory, then a
/// rename over the target.
pub fn save_state(path: &Path, next_run: &HashMap<String, NaiveDateTime>) -> Result<(), StateError> {
    let state = StateFile {
        version: STATE_VERSION,
        next_run: next_run.clone(),
    };
    let serialized = serde_json::to_string_pretty(&state)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, serialized.as_bytes())?;
    tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        assert!(load_state(&path).is_empty());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let mut next_run = HashMap::new();
        next_run.insert("backup".to_string(), dt(2024, 3, 1));

        save_state(&path, &next_run).unwrap();
        let loaded = load_state(&path);
        assert_eq!(loaded.get("backup"), Some(&dt(2024, 3, 1)));
    }

    #[test]
    fn version_mismatch_is_ignored_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        std::fs::write(&path, r#"{"version": 99, "next_run": {}}"#).unwrap();
        assert!(load_state(&path).is_empty());
    }

    #[test]
    fn corrupt_file_is_ignored_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_state(&path).is_empty());
    }
}
