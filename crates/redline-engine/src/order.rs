//! Execution order over the pipeline graph

use std::collections::{HashSet, VecDeque};

use crate::types::{NodeId, PipelineEdge};

/// Breadth-first order of every node reachable from `start`
///
/// Targets are enqueued in edge order. Each node appears once, at its first
/// visit; cycles are cut there. Nodes not reachable from `start` are left out.
pub fn resolve_execution_order(start: &str, edges: &[PipelineEdge]) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    visited.insert(start);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());

        for edge in edges.iter().filter(|e| e.source == node) {
            if visited.insert(edge.target.as_str()) {
                queue.push_back(edge.target.as_str());
            }
        }
    }

    log::debug!("Resolved execution order from '{}': {:?}", start, order);
    order
}
