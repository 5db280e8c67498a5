//! The node graph: an arena of nodes with a free list, adjacency lists, a
//! cached topological order, and a cached sink set — published to the
//! realtime thread as a single atomically-swapped [`GraphSnapshot`].
//!
//! Grounded in the teacher crate's `DependencyGraph` (`dependency_graph.rs`,
//! built on `petgraph`), but this graph owns its nodes directly (an arena
//! with a free list, following the original source's `Graph` rather than
//! wrapping a generic graph crate) because node identity must stay stable
//! across `removeNode`/`addNode` cycles and nodes themselves carry the
//! per-sample atomics the realtime thread reads.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::GraphError;
use crate::node::{Node, NodeId};

/// The (nodes, topoOrder, sinkedNodes) triple published together to the
/// realtime thread by [`Graph::sort`], so that a single `load()` per device
/// callback sees all three consistently (see the concurrency contract in
/// the crate root docs).
pub struct GraphSnapshot {
    pub nodes: Arc<Vec<Option<Arc<dyn Node>>>>,
    pub topo_order: Arc<Vec<NodeId>>,
    pub sinked_nodes: Arc<Vec<NodeId>>,
}

impl GraphSnapshot {
    fn empty() -> Self {
        Self {
            nodes: Arc::new(Vec::new()),
            topo_order: Arc::new(Vec::new()),
            sinked_nodes: Arc::new(Vec::new()),
        }
    }
}

/// Owns every node by stable integer id and the adjacency lists between
/// them. Mutated only by the control thread; reads from the realtime thread
/// go through [`Graph::snapshot_handle`] instead of this struct directly.
pub struct Graph {
    nodes: Vec<Option<Arc<dyn Node>>>,
    parents: Vec<Vec<NodeId>>,
    children: Vec<Vec<NodeId>>,
    free_ids: VecDeque<NodeId>,
    topo_order: Vec<NodeId>,
    snapshot: Arc<ArcSwap<GraphSnapshot>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
            free_ids: VecDeque::new(),
            topo_order: Vec::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(GraphSnapshot::empty())),
        }
    }

    /// A cheaply-cloneable handle the renderer can hold and `load()` from
    /// its own thread, independent of the `Graph` itself (which lives on
    /// the control thread).
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<GraphSnapshot>> {
        self.snapshot.clone()
    }

    /// Number of slots (live or free) currently allocated.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id).and_then(|slot| slot.as_ref())
    }

    /// Reuse a free slot if one exists, otherwise extend every parallel
    /// vector by one. Does not alter `topoOrder` — callers must `sort()`
    /// before the next render that needs this node visible.
    pub fn add_node(&mut self, node: Arc<dyn Node>) -> NodeId {
        if let Some(id) = self.free_ids.pop_front() {
            self.nodes[id] = Some(node);
            self.parents[id].clear();
            self.children[id].clear();
            id
        } else {
            self.nodes.push(Some(node));
            self.parents.push(Vec::new());
            self.children.push(Vec::new());
            self.nodes.len() - 1
        }
    }

    /// Append to `children[parent]` and `parents[child]`. Duplicates are
    /// accepted (they are harmless for Kahn's algorithm as long as removal
    /// stays symmetric, which `remove_node` guarantees by removing every
    /// occurrence).
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        self.children[parent].push(child);
        self.parents[child].push(parent);
    }

    /// Empty the slot, strip every incident edge symmetrically, re-queue the
    /// slot, and re-sort. Removing edges can never introduce a cycle, so the
    /// re-sort here is infallible.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if self.nodes.get(id).map(Option::is_some) != Some(true) {
            return Err(GraphError::InvalidNode(id));
        }

        self.nodes[id] = None;

        let parents = std::mem::take(&mut self.parents[id]);
        for parent in parents {
            self.children[parent].retain(|&child| child != id);
        }

        let children = std::mem::take(&mut self.children[id]);
        for child in children {
            self.parents[child].retain(|&parent| parent != id);
        }

        self.free_ids.push_back(id);

        self.sort()
            .expect("removing edges cannot introduce a cycle");
        Ok(())
    }

    /// Kahn's algorithm over the live node set. On success, publishes a new
    /// [`GraphSnapshot`] (nodes + topo order + sink set) atomically for the
    /// realtime thread. On failure (a cycle would exist), the previous
    /// `topoOrder` and published snapshot are left untouched.
    pub fn sort(&mut self) -> Result<(), GraphError> {
        let live_count = self.nodes.iter().filter(|n| n.is_some()).count();

        let mut in_degree: Vec<usize> = self
            .parents
            .iter()
            .map(|p| p.len())
            .collect();

        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for (i, slot) in self.nodes.iter().enumerate() {
            if slot.is_some() && in_degree[i] == 0 {
                queue.push_back(i);
            }
        }

        let mut order = Vec::with_capacity(live_count);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &child in &self.children[id] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != live_count {
            return Err(GraphError::CycleDetected);
        }

        let sinked_nodes: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&i| {
                self.nodes[i]
                    .as_ref()
                    .map(|n| n.sinked())
                    .unwrap_or(false)
            })
            .collect();

        self.topo_order = order.clone();
        self.snapshot.store(Arc::new(GraphSnapshot {
            nodes: Arc::new(self.nodes.clone()),
            topo_order: Arc::new(order),
            sinked_nodes: Arc::new(sinked_nodes),
        }));

        Ok(())
    }

    /// Invoke `f` on each live node in the cached topological order.
    pub fn traverse(&self, mut f: impl FnMut(&Arc<dyn Node>)) {
        for &id in &self.topo_order {
            if let Some(node) = &self.nodes[id] {
                f(node);
            }
        }
    }

    pub fn topo_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    /// Mark `id` as a sink and re-sort so the renderer picks it up.
    pub fn set_sinked(&mut self, id: NodeId, sinked: bool) -> Result<(), GraphError> {
        let node = self.get(id).ok_or(GraphError::InvalidNode(id))?;
        node.set_sinked(sinked);
        self.sort()
    }

    /// Remove every live node and clear the sink set, used by the file
    /// watcher's hot-reload to reset the graph before re-running a script.
    pub fn clear(&mut self) {
        let live_ids: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_some())
            .collect();
        for id in live_ids {
            self.remove_node(id).expect("id was just confirmed live");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::oscillator::Oscillator;
    use crate::param::Waveform;

    fn osc() -> Arc<dyn Node> {
        Arc::new(Oscillator::new(1.0, 440.0, Waveform::Sine))
    }

    #[test]
    fn linear_chain_sorts_in_dependency_order() {
        let mut graph = Graph::new();
        let a = graph.add_node(osc());
        let b = graph.add_node(osc());
        let c = graph.add_node(osc());
        graph.add_edge(a, b);
        graph.add_edge(b, c);

        graph.sort().unwrap();

        let order = graph.topo_order().to_vec();
        assert_eq!(order.len(), 3);
        let pos = |id: NodeId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn cycle_is_rejected_and_previous_order_survives() {
        let mut graph = Graph::new();
        let a = graph.add_node(osc());
        let b = graph.add_node(osc());
        let c = graph.add_node(osc());
        graph.add_edge(a, b);
        graph.sort().unwrap();
        let order_before = graph.topo_order().to_vec();

        graph.add_edge(b, c);
        graph.add_edge(c, a);

        let result = graph.sort();
        assert_eq!(result, Err(GraphError::CycleDetected));
        assert_eq!(graph.topo_order().to_vec(), order_before);
    }

    #[test]
    fn remove_node_strips_incident_edges_and_frees_the_slot() {
        let mut graph = Graph::new();
        let a = graph.add_node(osc());
        let b = graph.add_node(osc());
        graph.add_edge(a, b);
        graph.sort().unwrap();

        graph.remove_node(a).unwrap();
        assert!(graph.get(a).is_none());
        assert!(graph.parents[b].is_empty());

        let c = graph.add_node(osc());
        assert_eq!(c, a, "freed slot should be reused before extending");
    }

    #[test]
    fn snapshot_reflects_last_successful_sort() {
        let mut graph = Graph::new();
        let a = graph.add_node(osc());
        graph.set_sinked(a, true).unwrap();

        let handle = graph.snapshot_handle();
        let snap = handle.load();
        assert_eq!(snap.sinked_nodes.as_slice(), &[a]);
        assert_eq!(snap.topo_order.as_slice(), &[a]);
    }

    #[test]
    fn clear_removes_every_live_node() {
        let mut graph = Graph::new();
        let a = graph.add_node(osc());
        let b = graph.add_node(osc());
        graph.add_edge(a, b);
        graph.sort().unwrap();

        graph.clear();

        assert!(graph.get(a).is_none());
        assert!(graph.get(b).is_none());
        let handle = graph.snapshot_handle();
        assert!(handle.load().topo_order.is_empty());
    }
}
