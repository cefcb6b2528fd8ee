//! Per-node execution state for the current run
//!
//! Every node moves `idle -> queued -> processing -> completed | error` and
//! never backward. Only the executor writes; readers take snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::types::{ModuleProgress, NodeId};

/// Lifecycle status of a node within one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Queued,
    Processing,
    Completed,
    Error,
}

impl NodeStatus {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Queued)
                | (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// State of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ModuleProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

/// Point-in-time copy of the state table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub is_executing: bool,
    /// Nodes in execution order
    pub nodes: Vec<(NodeId, NodeExecutionState)>,
}

impl StateSnapshot {
    pub fn get(&self, node_id: &str) -> Option<&NodeExecutionState> {
        self.nodes.iter().find(|(id, _)| id == node_id).map(|(_, s)| s)
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.get(node_id).map(|s| s.status)
    }

    /// Ids of nodes currently in `status`
    pub fn with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Default)]
struct Table {
    order: Vec<NodeId>,
    states: HashMap<NodeId, NodeExecutionState>,
}

/// State table of the current run
#[derive(Default)]
pub struct ExecutionTracker {
    table: RwLock<Table>,
    executing: AtomicBool,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let table = self.table.read();
        StateSnapshot {
            is_executing: self.is_executing(),
            nodes: table
                .order
                .iter()
                .filter_map(|id| table.states.get(id).map(|s| (id.clone(), s.clone())))
                .collect(),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeExecutionState> {
        self.table.read().states.get(node_id).cloned()
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.table.read().states.get(node_id).map(|s| s.status)
    }

    /// Fresh table with every node in `order` queued
    pub(crate) fn begin_run(&self, order: &[NodeId]) {
        let mut table = self.table.write();
        table.order = order.to_vec();
        table.states = order
            .iter()
            .map(|id| {
                let state = NodeExecutionState {
                    status: NodeStatus::Queued,
                    ..NodeExecutionState::default()
                };
                (id.clone(), state)
            })
            .collect();
    }

    /// Claim the executing flag; false if a run already holds it
    pub(crate) fn try_start(&self) -> bool {
        self.executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn set_executing(&self, executing: bool) {
        self.executing.store(executing, Ordering::SeqCst);
    }

    pub(crate) fn mark_processing(&self, node_id: &str) -> Result<()> {
        self.transition(node_id, NodeStatus::Processing, |_| {})
    }

    pub(crate) fn mark_completed(&self, node_id: &str, data: Value, processing_time_ms: u64) -> Result<()> {
        self.transition(node_id, NodeStatus::Completed, |state| {
            state.data = Some(data);
            state.processing_time_ms = Some(processing_time_ms);
        })
    }

    pub(crate) fn mark_error(&self, node_id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.transition(node_id, NodeStatus::Error, |state| state.error = Some(error))
    }

    pub(crate) fn update_progress(&self, node_id: &str, progress: ModuleProgress) {
        if let Some(state) = self.table.write().states.get_mut(node_id) {
            state.progress = Some(progress);
        }
    }

    pub(crate) fn clear(&self) {
        *self.table.write() = Table::default();
    }

    fn transition(
        &self,
        node_id: &str,
        next: NodeStatus,
        update: impl FnOnce(&mut NodeExecutionState),
    ) -> Result<()> {
        let mut table = self.table.write();
        let state = table
            .states
            .get_mut(node_id)
            .ok_or_else(|| PipelineError::NodeNotFound(node_id.to_string()))?;

        if !state.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                node: node_id.to_string(),
                from: state.status,
                to: next,
            });
        }

        state.status = next;
        update(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order() -> Vec<NodeId> {
        vec!["doc".into(), "split".into(), "grammar".into()]
    }

    #[test]
    fn test_begin_run_queues_every_node() {
        let tracker = ExecutionTracker::new();
        tracker.begin_run(&order());

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.with_status(NodeStatus::Queued).len(), 3);
        assert_eq!(snapshot.nodes[1].0, "split");
    }

    #[test]
    fn test_forward_transitions() {
        let tracker = ExecutionTracker::new();
        tracker.begin_run(&order());

        tracker.mark_processing("doc").unwrap();
        tracker.mark_completed("doc", json!({"text": "x"}), 3).unwrap();

        let state = tracker.get("doc").unwrap();
        assert_eq!(state.status, NodeStatus::Completed);
        assert_eq!(state.processing_time_ms, Some(3));

        tracker.mark_processing("split").unwrap();
        tracker.mark_error("split", "boom").unwrap();
        assert_eq!(tracker.get("split").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_never_moves_backward_or_skips() {
        let tracker = ExecutionTracker::new();
        tracker.begin_run(&order());

        // queued -> completed skips processing
        assert!(matches!(
            tracker.mark_completed("doc", json!(null), 0),
            Err(PipelineError::InvalidTransition { .. })
        ));

        tracker.mark_processing("doc").unwrap();
        tracker.mark_completed("doc", json!(null), 0).unwrap();

        // completed -> processing is backward
        let err = tracker.mark_processing("doc").unwrap_err();
        assert_eq!(err.to_string(), "Invalid state transition for 'doc': completed -> processing");
        assert!(tracker.mark_error("doc", "late").is_err());
    }

    #[test]
    fn test_unknown_node() {
        let tracker = ExecutionTracker::new();
        assert!(matches!(
            tracker.mark_processing("ghost"),
            Err(PipelineError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_clear_discards_state() {
        let tracker = ExecutionTracker::new();
        tracker.begin_run(&order());
        tracker.clear();
        assert!(tracker.snapshot().nodes.is_empty());
        assert!(tracker.get("doc").is_none());
    }

    #[test]
    fn test_status_transition_table() {
        use NodeStatus::*;
        assert!(Idle.can_transition_to(Queued));
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Queued));
        assert!(Completed.is_terminal());
    }
}
