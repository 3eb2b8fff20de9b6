//! Search node pool and open list used by the graph searches
//!
//! Nodes live in a fixed-capacity arena and are addressed by index. Parent
//! links are arena indices, so the arena can be cleared between searches
//! without dangling references.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bitflags::bitflags;

use crate::PolyRef;

bitflags! {
    /// Search state of a node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Node is in the open list
        const OPEN = 0x01;
        /// Node has been expanded
        const CLOSED = 0x02;
        /// Parent is not adjacent, found by a visibility shortcut
        const PARENT_DETACHED = 0x04;
    }
}

/// Index of a node in its pool
pub type NodeIndex = usize;

/// Search node
#[derive(Debug, Clone)]
pub struct Node {
    /// Position of the node, usually on the portal it was entered through
    pub pos: [f32; 3],
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    /// Parent node
    pub parent: Option<NodeIndex>,
    /// Extra per-polygon state, allows several nodes per polygon
    pub state: u8,
    pub flags: NodeFlags,
    /// Polygon the node corresponds to
    pub id: PolyRef,
}

impl Node {
    fn new(id: PolyRef, state: u8) -> Self {
        Self {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            parent: None,
            state,
            flags: NodeFlags::empty(),
            id,
        }
    }
}

/// Fixed-capacity node arena with a hash lookup by polygon reference
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<Option<NodeIndex>>,
    next: Vec<Option<NodeIndex>>,
    max_nodes: usize,
    hash_mask: usize,
}

impl NodePool {
    /// Creates a pool holding at most `max_nodes` nodes; `hash_size` is
    /// rounded up to a power of two
    pub fn new(max_nodes: usize, hash_size: usize) -> Self {
        let hash_size = hash_size.max(1).next_power_of_two();
        Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![None; hash_size],
            next: Vec::with_capacity(max_nodes),
            max_nodes,
            hash_mask: hash_size - 1,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.next.clear();
        self.first.fill(None);
    }

    #[inline]
    fn bucket(&self, id: PolyRef) -> usize {
        let a = id.id() as usize;
        (a ^ (a >> 16)) & self.hash_mask
    }

    /// Index of the node of `id` and `state`, allocating it if needed.
    /// `None` when the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        if let Some(idx) = self.find_node(id, state) {
            return Some(idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len();
        let bucket = self.bucket(id);
        self.nodes.push(Node::new(id, state));
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(idx);
        Some(idx)
    }

    /// Index of an existing node
    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        let mut cur = self.first[self.bucket(id)];
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if node.id == id && node.state == state {
                return Some(idx);
            }
            cur = self.next[idx];
        }
        None
    }

    /// All nodes of a polygon, up to `max`
    pub fn find_nodes(&self, id: PolyRef, max: usize) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut cur = self.first[self.bucket(id)];
        while let Some(idx) = cur {
            if out.len() >= max {
                break;
            }
            if self.nodes[idx].id == id {
                out.push(idx);
            }
            cur = self.next[idx];
        }
        out
    }

    #[inline]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx]
    }

    #[inline]
    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx]
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Follows parent links from `idx` back to the start and returns the
    /// visited polygons in start-to-`idx` order
    pub fn path_to(&self, idx: NodeIndex) -> Vec<PolyRef> {
        let mut path = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            path.push(self.nodes[i].id);
            cur = self.nodes[i].parent;
            // Parent chains are acyclic unless the pool was corrupted
            if path.len() > self.nodes.len() {
                break;
            }
        }
        path.reverse();
        path
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    total: f32,
    idx: NodeIndex,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    // Reversed so the max-heap pops the cheapest node
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Open list ordered by node total cost
///
/// Updating a node pushes it again; stale entries are skipped on pop by
/// comparing against the node's current total and open flag.
#[derive(Debug, Default)]
pub struct NodeQueue {
    heap: BinaryHeap<OpenEntry>,
}

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Adds a node, or records a cheaper total for a node already queued
    pub fn push(&mut self, pool: &NodePool, idx: NodeIndex) {
        self.heap.push(OpenEntry {
            total: pool.node(idx).total,
            idx,
        });
    }

    /// Removes and returns the cheapest open node
    pub fn pop(&mut self, pool: &NodePool) -> Option<NodeIndex> {
        while let Some(entry) = self.heap.pop() {
            let node = pool.node(entry.idx);
            if node.flags.contains(NodeFlags::OPEN) && node.total == entry.total {
                return Some(entry.idx);
            }
        }
        None
    }

    /// Returns true when no live entry remains
    pub fn is_empty(&mut self, pool: &NodePool) -> bool {
        while let Some(entry) = self.heap.peek() {
            let node = pool.node(entry.idx);
            if node.flags.contains(NodeFlags::OPEN) && node.total == entry.total {
                return false;
            }
            self.heap.pop();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pool() {
        let mut pool = NodePool::new(4, 3);
        let a = PolyRef::new(1);

        let n0 = pool.get_node(a, 0).unwrap();
        assert_eq!(pool.get_node(a, 0), Some(n0));
        let n1 = pool.get_node(a, 1).unwrap();
        assert_ne!(n0, n1);
        assert_eq!(pool.find_nodes(a, 8).len(), 2);
        assert_eq!(pool.find_node(PolyRef::new(2), 0), None);

        pool.get_node(PolyRef::new(2), 0).unwrap();
        pool.get_node(PolyRef::new(3), 0).unwrap();
        assert_eq!(pool.get_node(PolyRef::new(4), 0), None);

        pool.clear();
        assert_eq!(pool.node_count(), 0);
        assert!(pool.find_node(a, 0).is_none());
    }

    #[test]
    fn test_path_to_follows_parents() {
        let mut pool = NodePool::new(8, 8);
        let a = pool.get_node(PolyRef::new(1), 0).unwrap();
        let b = pool.get_node(PolyRef::new(2), 0).unwrap();
        let c = pool.get_node(PolyRef::new(3), 0).unwrap();
        pool.node_mut(b).parent = Some(a);
        pool.node_mut(c).parent = Some(b);
        assert_eq!(
            pool.path_to(c),
            vec![PolyRef::new(1), PolyRef::new(2), PolyRef::new(3)]
        );
    }

    #[test]
    fn test_queue_orders_by_total_and_skips_stale() {
        let mut pool = NodePool::new(8, 8);
        let mut queue = NodeQueue::new(8);
        for (i, total) in [5.0, 3.0, 7.0].into_iter().enumerate() {
            let idx = pool.get_node(PolyRef::new(i as u32 + 1), 0).unwrap();
            let node = pool.node_mut(idx);
            node.total = total;
            node.flags = NodeFlags::OPEN;
            queue.push(&pool, idx);
        }

        // Lower the total of the last node; its old entry becomes stale
        pool.node_mut(2).total = 1.0;
        queue.push(&pool, 2);

        let order: Vec<NodeIndex> = std::iter::from_fn(|| {
            let idx = queue.pop(&pool)?;
            pool.node_mut(idx).flags = NodeFlags::CLOSED;
            Some(idx)
        })
        .collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(queue.is_empty(&pool));
    }
}
