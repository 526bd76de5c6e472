//! Persistence Bridge: `load`/`save` round-trips of the auth tree and the
//! state plane. The on-disk format is opaque to the rest of the core —
//! only this module knows it is `serde_json`.
//!
//! Snapshots are written via a temp-file-then-rename idiom (`tempfile` +
//! `std::fs::rename`) to avoid torn writes on crash, the same safe-write
//! idiom used elsewhere in this codebase's file-backed config/cache paths.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use vocsdb_errors::DispatchError;

use crate::domain::state::StateSnapshot;
use crate::domain::tree::Tree;

const AUTH_FILE: &str = "auth.json";
const STATE_FILE: &str = "state.json";

/// Write `value` to `path` atomically: serialize into a temp file in the
/// same directory, then rename over the destination.
fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), DispatchError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| DispatchError::processing(format!("creating persistence dir failed: {e}")))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| DispatchError::processing(format!("creating temp file failed: {e}")))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|e| DispatchError::processing(format!("serializing snapshot failed: {e}")))?;
    tmp.persist(path)
        .map_err(|e| DispatchError::processing(format!("persisting snapshot failed: {e}")))?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DispatchError> {
    let bytes = fs::read(path)
        .map_err(|e| DispatchError::processing(format!("reading {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DispatchError::processing(format!("parsing {}: {e}", path.display())))
}

/// Serialize the auth tree to `<root>/auth.json`.
pub fn save_auth(root: &Path, tree: &Tree) -> Result<(), DispatchError> {
    write_atomic(&auth_path(root), tree)
}

/// Load the auth tree from `<root>/auth.json`.
pub fn load_auth(root: &Path) -> Result<Tree, DispatchError> {
    read_json(&auth_path(root))
}

/// Serialize the state plane to `<root>/state.json`.
pub fn save_state(root: &Path, state: &StateSnapshot) -> Result<(), DispatchError> {
    write_atomic(&state_path(root), state)
}

/// Load the state plane from `<root>/state.json`.
pub fn load_state(root: &Path) -> Result<StateSnapshot, DispatchError> {
    read_json(&state_path(root))
}

fn auth_path(root: &Path) -> PathBuf {
    root.join(AUTH_FILE)
}

fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::DomainNode;

    #[test]
    fn save_then_load_auth_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = Tree::default();
        tree.domains.insert(
            "localhost".to_owned(),
            DomainNode {
                id: "localhost".to_owned(),
                ..Default::default()
            },
        );

        save_auth(dir.path(), &tree).unwrap();
        let loaded = load_auth(dir.path()).unwrap();
        assert!(loaded.domains.contains_key("localhost"));
    }

    #[test]
    fn save_then_load_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = StateSnapshot::default();
        save_state(dir.path(), &snapshot).unwrap();
        let loaded = load_state(dir.path()).unwrap();
        assert!(loaded.talk_state.is_empty());
    }

    #[test]
    fn load_missing_file_is_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_auth(dir.path());
        assert!(result.is_err());
    }
}
