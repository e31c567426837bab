//! Node/edge iterators and deterministic topological sort (spec component D).
//!
//! Grounded on the teacher's `graphs::iteration` — ported close to verbatim,
//! since this module has no dependency on the old channel/state types: it
//! operates purely on [`NodeKind`] and an edge adjacency map.

use std::collections::hash_map::Keys;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::node::Node;
use crate::types::NodeKind;

/// Iterator over a graph's declared node ids (excludes the virtual
/// `Start`/`End` sentinels, which are never inserted into the node map).
pub struct NodesIter<'a> {
    inner: Keys<'a, NodeKind, Arc<dyn Node>>,
}

impl<'a> NodesIter<'a> {
    #[must_use]
    pub(super) fn new(nodes: &'a FxHashMap<NodeKind, Arc<dyn Node>>) -> Self {
        Self {
            inner: nodes.keys(),
        }
    }
}

impl<'a> Iterator for NodesIter<'a> {
    type Item = &'a NodeKind;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Iterator over `(from, to)` edge pairs.
pub struct EdgesIter<'a> {
    edges: &'a FxHashMap<NodeKind, Vec<NodeKind>>,
    outer: Keys<'a, NodeKind, Vec<NodeKind>>,
    current_from: Option<&'a NodeKind>,
    current_targets: std::slice::Iter<'a, NodeKind>,
}

impl<'a> EdgesIter<'a> {
    #[must_use]
    pub(super) fn new(edges: &'a FxHashMap<NodeKind, Vec<NodeKind>>) -> Self {
        Self {
            edges,
            outer: edges.keys(),
            current_from: None,
            current_targets: [].iter(),
        }
    }
}

impl<'a> Iterator for EdgesIter<'a> {
    type Item = (&'a NodeKind, &'a NodeKind);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(to) = self.current_targets.next() {
                return self.current_from.map(|from| (from, to));
            }
            let from = self.outer.next()?;
            self.current_from = Some(from);
            self.current_targets = self
                .edges
                .get(from)
                .map(|v| v.iter())
                .unwrap_or_else(|| [].iter());
        }
    }
}

/// Orders `Custom` node names lexicographically within a tie, `Start`
/// always first, `End` always last — gives `topological_sort` and the
/// petgraph/DOT export a reproducible node order across runs.
fn tie_break_key(kind: &NodeKind) -> (u8, &str) {
    match kind {
        NodeKind::Start => (0, ""),
        NodeKind::End => (2, ""),
        NodeKind::Custom(name) => (1, name.as_str()),
    }
}

/// Kahn's algorithm over the static edge map, with deterministic
/// tie-breaking among nodes that become ready in the same round (spec §4.D
/// expects a stable, reproducible compile output).
#[must_use]
pub(super) fn topological_sort(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> Vec<NodeKind> {
    let mut nodes: FxHashSet<NodeKind> = FxHashSet::default();
    let mut in_degree: FxHashMap<NodeKind, usize> = FxHashMap::default();

    for (from, targets) in edges {
        nodes.insert(from.clone());
        in_degree.entry(from.clone()).or_insert(0);
        for to in targets {
            nodes.insert(to.clone());
            *in_degree.entry(to.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: Vec<NodeKind> = nodes
        .iter()
        .filter(|n| in_degree.get(*n).copied().unwrap_or(0) == 0)
        .cloned()
        .collect();
    ready.sort_by(|a, b| tie_break_key(a).cmp(&tie_break_key(b)));

    let mut ordered = Vec::with_capacity(nodes.len());
    let mut queue = std::collections::VecDeque::from(ready);

    while let Some(node) = queue.pop_front() {
        ordered.push(node.clone());
        if let Some(targets) = edges.get(&node) {
            let mut newly_ready = Vec::new();
            for to in targets {
                if let Some(degree) = in_degree.get_mut(to) {
                    *degree -= 1;
                    if *degree == 0 {
                        newly_ready.push(to.clone());
                    }
                }
            }
            newly_ready.sort_by(|a, b| tie_break_key(a).cmp(&tie_break_key(b)));
            for node in newly_ready {
                let pos = queue
                    .iter()
                    .position(|n| tie_break_key(n) > tie_break_key(&node))
                    .unwrap_or(queue.len());
                queue.insert(pos, node);
            }
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> NodeKind {
        NodeKind::Custom(name.to_string())
    }

    #[test]
    fn test_topological_sort_linear() {
        let mut edges: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
        edges.insert(NodeKind::Start, vec![n("a")]);
        edges.insert(n("a"), vec![n("b")]);
        edges.insert(n("b"), vec![NodeKind::End]);

        let order = topological_sort(&edges);
        assert_eq!(order, vec![NodeKind::Start, n("a"), n("b"), NodeKind::End]);
    }

    #[test]
    fn test_topological_sort_diamond() {
        let mut edges: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
        edges.insert(NodeKind::Start, vec![n("a")]);
        edges.insert(n("a"), vec![n("b"), n("c")]);
        edges.insert(n("b"), vec![n("d")]);
        edges.insert(n("c"), vec![n("d")]);
        edges.insert(n("d"), vec![NodeKind::End]);

        let order = topological_sort(&edges);
        assert_eq!(order[0], NodeKind::Start);
        assert_eq!(order[1], n("a"));
        assert_eq!(order[4], n("d"));
        assert_eq!(order[5], NodeKind::End);
        let b_pos = order.iter().position(|k| *k == n("b")).unwrap();
        let c_pos = order.iter().position(|k| *k == n("c")).unwrap();
        assert!(b_pos < c_pos, "lexicographic tie-break: b before c");
    }

    #[test]
    fn test_topological_sort_deterministic() {
        let mut edges: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
        edges.insert(NodeKind::Start, vec![n("z"), n("a"), n("m")]);

        let first = topological_sort(&edges);
        let second = topological_sort(&edges);
        assert_eq!(first, second);
        assert_eq!(first, vec![NodeKind::Start, n("a"), n("m"), n("z")]);
    }
}
