//! Local machine identity.
//!
//! Each daemon owns exactly one [`LocalMachine`]: the stable identity and
//! attributes it publishes to the cluster. The ID is minted on first boot and
//! persisted under the state directory so the host keeps its identity across
//! restarts.

use std::path::Path;
use std::sync::{PoisonError, RwLock};

use armada_core::{Error, MachineId, MachineState, Result};

/// File name under the state directory holding the persisted machine ID.
const MACHINE_ID_FILE: &str = "machine-id";

/// Loads the persisted machine ID, minting and persisting a fresh one on
/// first boot.
///
/// # Errors
///
/// A present-but-unparsable ID file is a [`Error::Fatal`] startup error:
/// refusing to start beats minting a second identity for the same host.
pub fn load_or_create_machine_id(state_dir: &Path) -> Result<MachineId> {
    let path = state_dir.join(MACHINE_ID_FILE);

    if path.exists() {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::fatal(format!("failed to read {}: {e}", path.display()))
        })?;
        return raw.trim().parse().map_err(|_| {
            Error::fatal(format!(
                "machine ID file {} is corrupt; refusing to mint a new identity",
                path.display()
            ))
        });
    }

    let id = MachineId::generate();
    std::fs::create_dir_all(state_dir)
        .map_err(|e| Error::fatal(format!("failed to create {}: {e}", state_dir.display())))?;
    std::fs::write(&path, format!("{id}\n"))
        .map_err(|e| Error::fatal(format!("failed to write {}: {e}", path.display())))?;
    Ok(id)
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::fatal("local machine lock poisoned")
}

/// The daemon's view of its own machine record.
///
/// Cheap to share; readers take a snapshot, the heartbeat loop publishes it.
#[derive(Debug)]
pub struct LocalMachine {
    state: RwLock<MachineState>,
}

impl LocalMachine {
    /// Creates a local machine from its initial state.
    #[must_use]
    pub fn new(state: MachineState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Returns this machine's ID. The ID never changes after boot, so a
    /// poisoned lock still yields the correct value.
    #[must_use]
    pub fn id(&self) -> MachineId {
        self.state.read().unwrap_or_else(PoisonError::into_inner).id
    }

    /// Returns a snapshot of the current machine state.
    pub fn state(&self) -> Result<MachineState> {
        Ok(self.state.read().map_err(poison_err)?.clone())
    }

    /// Replaces an operator-facing attribute, e.g. after a metadata reload.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.metadata.insert(key.into(), value.into());
        Ok(())
    }
}
