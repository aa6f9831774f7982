//! In-memory state snapshots with hash verification, used to resynchronise
//! a simulation and to detect divergence after a restore.

use crate::error::{SerializeError, SerializeResult};
use crate::manager::ComponentManager;
use crate::serialization::StateHash;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    State(#[from] SerializeError),
    #[error("restored state hash {actual} does not match snapshot hash {expected}")]
    HashMismatch { expected: StateHash, actual: StateHash },
}

/// Serialized state plus the state hash taken at the same moment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSnapshot {
    pub bytes: Vec<u8>,
    pub hash: StateHash,
}

impl StateSnapshot {
    pub fn capture(manager: &ComponentManager) -> SerializeResult<Self> {
        let mut bytes = Vec::new();
        manager.serialize_state(&mut bytes)?;
        let hash = manager.compute_state_hash()?;
        Ok(Self { bytes, hash })
    }

    /// Loads the snapshot into `manager` and checks that the rebuilt state
    /// hashes to the captured value.
    pub fn restore(&self, manager: &mut ComponentManager) -> Result<StateHash, SnapshotError> {
        manager.deserialize_state(self.bytes.as_slice())?;
        let actual = manager.compute_state_hash()?;
        if actual != self.hash {
            log::error!("snapshot restore diverged: expected {}, got {actual}", self.hash);
            return Err(SnapshotError::HashMismatch { expected: self.hash, actual });
        }
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::SimContext;
    use crate::components::{POSITION_TYPE, Position, stock_registry};
    use crate::params::ParamNode;
    use crate::types::EntityId;

    fn manager_with_position(x: &str) -> ComponentManager {
        let mut manager = ComponentManager::new(SimContext::default(), stock_registry().unwrap());
        let position = manager.lookup_type_id(POSITION_TYPE).unwrap();
        let params = ParamNode::new().with_child("x", ParamNode::leaf(x));
        manager.add_component(EntityId(5), position, &params).unwrap();
        manager
    }

    #[test]
    fn restore_rebuilds_the_captured_state() {
        let source = manager_with_position("10");
        let snapshot = StateSnapshot::capture(&source).unwrap();

        let mut target = manager_with_position("99");
        let hash = snapshot.restore(&mut target).unwrap();
        assert_eq!(hash, snapshot.hash);

        let position = target.lookup_type_id(POSITION_TYPE).unwrap();
        let restored = target.query::<Position>(EntityId(5), position).unwrap();
        assert_eq!(restored.position(), Some((10.0, 0.0)));
    }

    #[test]
    fn restore_detects_a_diverging_hash() {
        let mut snapshot = StateSnapshot::capture(&manager_with_position("10")).unwrap();
        snapshot.hash = StateHash([0; StateHash::LEN]);

        let mut target = manager_with_position("10");
        let result = snapshot.restore(&mut target);
        assert!(matches!(result, Err(SnapshotError::HashMismatch { .. })));
    }

    #[test]
    fn restore_propagates_decode_failures() {
        let snapshot = StateSnapshot { bytes: vec![1, 0], hash: StateHash([0; StateHash::LEN]) };
        let mut target = manager_with_position("10");
        let result = snapshot.restore(&mut target);
        assert!(matches!(result, Err(SnapshotError::State(SerializeError::TruncatedData { .. }))));
        assert_eq!(target.component_count(), 0);
    }
}
