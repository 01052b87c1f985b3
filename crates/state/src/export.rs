//! Expected-state export.
//!
//! On validation and on freeze each node writes its expected map to
//! `expected_state_node{node}_{timestamp}.json` so runs can be compared
//! offline.

use crate::expected::{DivergenceSummary, ExpectedMap, ExpectedValue};
use replaygate_types::{ConsensusTimestamp, EntityKey, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors writing or reading an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// On-disk form of an expected map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedState {
    pub node: NodeId,
    pub timestamp: ConsensusTimestamp,
    pub divergences: DivergenceSummary,
    pub entities: BTreeMap<EntityKey, ExpectedValue>,
}

impl ExportedState {
    /// Build the export record from an expected map.
    pub fn new(node: NodeId, timestamp: ConsensusTimestamp, expected: &ExpectedMap) -> Self {
        Self {
            node,
            timestamp,
            divergences: expected.divergences(),
            entities: expected.iter().map(|(k, v)| (*k, v.clone())).collect(),
        }
    }

    /// Rebuild an expected map from the record.
    pub fn to_expected_map(&self) -> ExpectedMap {
        let mut map = ExpectedMap::new();
        for (key, value) in &self.entities {
            map.expect(*key, value.clone());
        }
        map
    }
}

/// File name for an export keyed by node and consensus time.
pub fn expected_state_file_name(node: NodeId, timestamp: ConsensusTimestamp) -> String {
    format!("expected_state_node{}_{}.json", node.0, timestamp.as_nanos())
}

/// Write the expected map of `node` into `dir`.
pub fn export_expected_state(
    dir: &Path,
    node: NodeId,
    timestamp: ConsensusTimestamp,
    expected: &ExpectedMap,
) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(expected_state_file_name(node, timestamp));
    let exported = ExportedState::new(node, timestamp, expected);
    let json = serde_json::to_vec_pretty(&exported)?;
    fs::write(&path, json).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;

    info!(
        node = %node,
        timestamp = %timestamp,
        entities = exported.entities.len(),
        path = %path.display(),
        "Exported expected state"
    );
    Ok(path)
}

/// Read an export written by [`export_expected_state`].
pub fn load_expected_state(path: &Path) -> Result<ExportedState, ExportError> {
    let bytes = fs::read(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaygate_types::{EntityKind, LifecycleOp};

    #[test]
    fn test_file_name_is_keyed_by_node_and_time() {
        assert_eq!(
            expected_state_file_name(NodeId(3), ConsensusTimestamp(1_500)),
            "expected_state_node3_1500.json"
        );
    }

    #[test]
    fn test_export_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut expected = ExpectedMap::new();
        let key = EntityKey::new(0, 1, 2);
        expected
            .apply(
                &LifecycleOp::Create {
                    key,
                    kind: EntityKind::Queue,
                    balance: 9,
                    lease_secs: None,
                },
                ConsensusTimestamp(10),
            )
            .0
            .unwrap();

        let path =
            export_expected_state(dir.path(), NodeId(1), ConsensusTimestamp(2_000), &expected)
                .unwrap();
        assert!(path.ends_with("expected_state_node1_2000.json"));

        let loaded = load_expected_state(&path).unwrap();
        assert_eq!(loaded.node, NodeId(1));
        assert_eq!(loaded.to_expected_map(), expected);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_expected_state(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(ExportError::Io { .. })));
    }
}
