//! An arena-backed intrusive dependency graph.
//!
//! Both the task graph (TDAG) and the command graph (CDAG) are
//! instances of the same shape: nodes with typed, bidirectional
//! dependency edges, referenced by stable integer ids rather than
//! pointers, which sidesteps the borrow-checker friction of cyclic
//! structures built from owned pointers. This crate factors that shape
//! out once, generic over the node payload `N` and the edge
//! label `K` (a dependency kind, e.g. true/anti/order), so the task
//! manager and the command graph generator each only have to supply
//! their own payload and edge-kind types.
//!
//! A node's id doubles as its slot in a contiguous arena: `insert`
//! requires ids to arrive in non-decreasing order (which every caller
//! satisfies, since ids come from a single [`gridflow_ids::IdGenerator`]),
//! and `erase` frees a slot by id without renumbering the ids that
//! remain, exactly as the design notes call for.

use std::collections::HashMap;

use gridflow_ids::Id;

struct Entry<N, K> {
    payload: N,
    /// Edges to nodes this one depends on.
    outbound: Vec<(u64, K)>,
    /// Edges from nodes that depend on this one.
    inbound: Vec<(u64, K)>,
}

/// An arena of nodes of type `N` connected by edges labeled `K`,
/// indexed by the raw value of an id type `Id`.
pub struct Graph<I, N, K> {
    entries: Vec<Option<Entry<N, K>>>,
    live: usize,
    _marker: std::marker::PhantomData<I>,
}

impl<I, N, K> Default for Graph<I, N, K> {
    fn default() -> Self {
        Graph { entries: Vec::new(), live: 0, _marker: std::marker::PhantomData }
    }
}

impl<I: Id, N, K: Clone> Graph<I, N, K> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of live (non-erased) nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if the graph has no live nodes.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn slot(&self, id: I) -> usize {
        id.into_raw() as usize
    }

    /// Inserts a new node under `id`. Panics if `id` is already present;
    /// ids must be allocated by a single generator and inserted once.
    pub fn insert(&mut self, id: I, payload: N) {
        let slot = self.slot(id);
        if slot >= self.entries.len() {
            self.entries.resize_with(slot + 1, || None);
        }
        assert!(self.entries[slot].is_none(), "node inserted twice");
        self.entries[slot] = Some(Entry { payload, outbound: Vec::new(), inbound: Vec::new() });
        self.live += 1;
    }

    /// True if `id` names a live node.
    pub fn contains(&self, id: I) -> bool {
        let slot = self.slot(id);
        slot < self.entries.len() && self.entries[slot].is_some()
    }

    /// Borrows the payload of a live node.
    pub fn get(&self, id: I) -> Option<&N> {
        self.entry(id).map(|e| &e.payload)
    }

    /// Mutably borrows the payload of a live node.
    pub fn get_mut(&mut self, id: I) -> Option<&mut N> {
        let slot = self.slot(id);
        self.entries.get_mut(slot).and_then(|e| e.as_mut()).map(|e| &mut e.payload)
    }

    fn entry(&self, id: I) -> Option<&Entry<N, K>> {
        let slot = self.slot(id);
        self.entries.get(slot).and_then(|e| e.as_ref())
    }

    /// Adds a dependency edge `from -> to` labeled `kind`: `from`
    /// depends on `to`. Both nodes must already be live; `to` is
    /// expected to have been inserted no later than `from`.
    ///
    /// A self-loop (`from == to`) is refused: no edge may ever reach
    /// its own origin.
    pub fn add_edge(&mut self, from: I, to: I, kind: K) {
        assert!(from.into_raw() != to.into_raw(), "self-loop edge rejected");
        assert!(self.contains(from), "edge source does not exist");
        assert!(self.contains(to), "edge target does not exist");

        let from_slot = self.slot(from);
        let to_slot = self.slot(to);
        self.entries[from_slot].as_mut().unwrap().outbound.push((to.into_raw(), kind.clone()));
        self.entries[to_slot].as_mut().unwrap().inbound.push((from.into_raw(), kind));
    }

    /// The edges from `id` to the nodes it depends on.
    pub fn outbound(&self, id: I) -> impl Iterator<Item = (I, &K)> {
        self.entry(id)
            .into_iter()
            .flat_map(|e| e.outbound.iter())
            .map(|(raw, kind)| (I::from_raw(*raw), kind))
    }

    /// The edges from the nodes that depend on `id`.
    pub fn inbound(&self, id: I) -> impl Iterator<Item = (I, &K)> {
        self.entry(id)
            .into_iter()
            .flat_map(|e| e.inbound.iter())
            .map(|(raw, kind)| (I::from_raw(*raw), kind))
    }

    /// Removes `id` and every edge touching it, on both sides, so that
    /// no dangling edge survives.
    pub fn erase(&mut self, id: I) -> Option<N> {
        let slot = self.slot(id);
        let removed = self.entries.get_mut(slot).and_then(|e| e.take())?;
        self.live -= 1;

        for &(neighbor, _) in &removed.outbound {
            if let Some(Some(entry)) = self.entries.get_mut(neighbor as usize) {
                entry.inbound.retain(|(target, _)| *target != id.into_raw());
            }
        }
        for &(neighbor, _) in &removed.inbound {
            if let Some(Some(entry)) = self.entries.get_mut(neighbor as usize) {
                entry.outbound.retain(|(target, _)| *target != id.into_raw());
            }
        }

        Some(removed.payload)
    }

    /// Frees trailing erased slots from the back of the arena. Does not
    /// renumber any surviving id, matching the "compacts lazily" design
    /// note: compaction only reclaims memory, it never changes what an
    /// id means.
    pub fn compact(&mut self) {
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
        self.entries.shrink_to_fit();
    }

    /// Iterates over the ids of all live nodes, in id order.
    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.as_ref().map(|_| I::from_raw(slot as u64)))
    }

    /// True if `id` has an edge (in either direction) to itself. Always
    /// false given `add_edge` refuses self-loops; kept as an explicit
    /// check callers can assert on.
    pub fn has_self_loop(&self, id: I) -> bool {
        self.entry(id)
            .map(|e| e.outbound.iter().any(|(t, _)| *t == id.into_raw()))
            .unwrap_or(false)
    }

    /// True if no live node can reach itself by following outbound
    /// edges (full acyclicity, strictly stronger than
    /// [`Graph::has_self_loop`] on every node).
    pub fn is_acyclic(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<u64, Mark> = HashMap::new();

        fn visit<I: Id, N, K>(
            graph: &Graph<I, N, K>,
            raw: u64,
            marks: &mut HashMap<u64, Mark>,
        ) -> bool {
            match marks.get(&raw) {
                Some(Mark::Done) => return true,
                Some(Mark::Visiting) => return false,
                None => {}
            }
            marks.insert(raw, Mark::Visiting);
            if let Some(entry) = graph.entries.get(raw as usize).and_then(|e| e.as_ref()) {
                for &(next, _) in &entry.outbound {
                    if !visit(graph, next, marks) {
                        return false;
                    }
                }
            }
            marks.insert(raw, Mark::Done);
            true
        }

        for id in self.ids() {
            if !visit(self, id.into_raw(), &mut marks) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_ids::TaskId;

    #[derive(Clone, Debug, PartialEq)]
    enum EdgeKind {
        True,
        Anti,
        Order,
    }

    fn tid(v: u64) -> TaskId {
        TaskId::from_raw(v)
    }

    #[test]
    fn insert_and_lookup() {
        let mut g: Graph<TaskId, &'static str, EdgeKind> = Graph::new();
        g.insert(tid(0), "a");
        g.insert(tid(1), "b");
        assert_eq!(g.get(tid(0)), Some(&"a"));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn edges_are_bidirectional() {
        let mut g: Graph<TaskId, &'static str, EdgeKind> = Graph::new();
        g.insert(tid(0), "a");
        g.insert(tid(1), "b");
        g.add_edge(tid(1), tid(0), EdgeKind::True);

        let out: Vec<_> = g.outbound(tid(1)).map(|(id, _)| id).collect();
        assert_eq!(out, vec![tid(0)]);
        let inb: Vec<_> = g.inbound(tid(0)).map(|(id, _)| id).collect();
        assert_eq!(inb, vec![tid(1)]);
    }

    #[test]
    #[should_panic(expected = "self-loop")]
    fn self_loop_is_rejected() {
        let mut g: Graph<TaskId, &'static str, EdgeKind> = Graph::new();
        g.insert(tid(0), "a");
        g.add_edge(tid(0), tid(0), EdgeKind::Order);
    }

    #[test]
    fn erase_drops_dangling_edges_on_both_sides() {
        let mut g: Graph<TaskId, &'static str, EdgeKind> = Graph::new();
        g.insert(tid(0), "a");
        g.insert(tid(1), "b");
        g.insert(tid(2), "c");
        g.add_edge(tid(1), tid(0), EdgeKind::True);
        g.add_edge(tid(2), tid(1), EdgeKind::Anti);

        g.erase(tid(1));

        assert!(!g.contains(tid(1)));
        assert_eq!(g.inbound(tid(0)).count(), 0);
        assert_eq!(g.outbound(tid(2)).count(), 0);
    }

    #[test]
    fn compact_trims_trailing_erased_slots() {
        let mut g: Graph<TaskId, &'static str, EdgeKind> = Graph::new();
        g.insert(tid(0), "a");
        g.insert(tid(1), "b");
        g.insert(tid(2), "c");
        g.erase(tid(2));
        g.erase(tid(1));
        g.compact();
        assert!(g.contains(tid(0)));
        assert!(!g.contains(tid(1)));
    }

    #[test]
    fn acyclicity_check() {
        let mut g: Graph<TaskId, &'static str, EdgeKind> = Graph::new();
        g.insert(tid(0), "a");
        g.insert(tid(1), "b");
        g.insert(tid(2), "c");
        g.add_edge(tid(1), tid(0), EdgeKind::True);
        g.add_edge(tid(2), tid(1), EdgeKind::True);
        assert!(g.is_acyclic());
    }
}
