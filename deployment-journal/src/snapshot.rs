//! Deployment state snapshots.
//!
//! A snapshot caches the state reached after the first `applied_messages`
//! journal entries. Loading replays only the entries after that point. The
//! journal stays the source of truth: a snapshot that claims more messages
//! than the journal holds is ignored.

use crate::journal::{Journal, JournalError};
use crate::messages::JournalMessage;
use crate::state::DeploymentState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Name of the snapshot file inside a deployment directory.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    applied_messages: u64,
    state: DeploymentState,
}

/// Writes a snapshot of `state` into `dir`, replacing any previous one.
pub fn write_snapshot(dir: &Path, state: &DeploymentState) -> Result<(), JournalError> {
    let snapshot = Snapshot {
        applied_messages: state.applied_messages(),
        state: state.clone(),
    };
    let json = serde_json::to_vec_pretty(&snapshot).map_err(JournalError::Encode)?;
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
    debug!(applied_messages = snapshot.applied_messages, "Wrote deployment snapshot");
    Ok(())
}

/// Reads the snapshot in `dir`, if there is one.
pub fn read_snapshot(dir: &Path) -> Result<Option<DeploymentState>, JournalError> {
    let path = dir.join(SNAPSHOT_FILE);
    let contents = match fs::read(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let snapshot: Snapshot = serde_json::from_slice(&contents)
        .map_err(|source| JournalError::Snapshot { path, source })?;
    Ok(Some(snapshot.state))
}

/// Rebuilds the deployment state from a journal, starting from the snapshot
/// in `snapshot_dir` when it is usable.
pub fn load_state(
    journal: &dyn Journal,
    snapshot_dir: Option<&Path>,
) -> Result<DeploymentState, JournalError> {
    let messages = journal.read()?;

    let snapshot = match snapshot_dir {
        Some(dir) => read_snapshot(dir)?,
        None => None,
    };

    match snapshot {
        Some(state) if state.applied_messages() as usize <= messages.len() => {
            let suffix = &messages[state.applied_messages() as usize..];
            debug!(
                from_snapshot = state.applied_messages(),
                replayed = suffix.len(),
                "Loading deployment state"
            );
            Ok(replay_from(state, suffix)?)
        }
        Some(state) => {
            warn!(
                snapshot_messages = state.applied_messages(),
                journal_messages = messages.len(),
                "Snapshot is ahead of the journal, replaying from scratch"
            );
            Ok(DeploymentState::replay(&messages)?)
        }
        None => Ok(DeploymentState::replay(&messages)?),
    }
}

fn replay_from(
    state: DeploymentState,
    messages: &[JournalMessage],
) -> Result<DeploymentState, crate::reducer::ReduceError> {
    messages
        .iter()
        .try_fold(state, |state, message| state.apply(message))
}
