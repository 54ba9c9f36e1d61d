//! =============================================================================================
//! TransitionGraph: directed, edge-weighted graph over arbitrary vertex labels
//! =============================================================================================
//!
//! Not a full-featured graph library, rather an organizational structure for
//! Markov process calculations. Vertices are any clonable, hashable, ordered label
//! (compositions here, plain integers in tests). Self-loops are expected: the
//! self-transition probability of these processes is typically nonzero.
//!
//! =============================================================================================

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Directed weighted graph backing a Markov process.
#[derive(Clone, Debug, Default)]
pub struct TransitionGraph<V> {
    vertices: BTreeSet<V>,
    edges: Vec<(V, V, f64)>,
}

impl<V> TransitionGraph<V>
where
    V: Clone + Eq + Hash + Ord,
{
    pub fn new() -> Self {
        Self {
            vertices: BTreeSet::new(),
            edges: Vec::new(),
        }
    }

    /// Add an isolated vertex (no-op if already present).
    pub fn add_vertex(&mut self, vertex: V) {
        self.vertices.insert(vertex);
    }

    /// Add a weighted edge, inserting both endpoints into the vertex set.
    pub fn add_edge(&mut self, source: V, target: V, weight: f64) {
        self.vertices.insert(source.clone());
        self.vertices.insert(target.clone());
        self.edges.push((source, target, weight));
    }

    /// Add weighted edges in bulk.
    pub fn add_edges<I>(&mut self, edges: I)
    where
        I: IntoIterator<Item = (V, V, f64)>,
    {
        for (source, target, weight) in edges {
            self.add_edge(source, target, weight);
        }
    }

    /// Add unweighted edges, defaulting every weight to 1.0.
    pub fn add_unweighted_edges<I>(&mut self, edges: I)
    where
        I: IntoIterator<Item = (V, V)>,
    {
        for (source, target) in edges {
            self.add_edge(source, target, 1.0);
        }
    }

    /// Vertex set, in deterministic (ordered) iteration order.
    pub fn vertices(&self) -> &BTreeSet<V> {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn edges(&self) -> &[(V, V, f64)] {
        &self.edges
    }

    /// Outgoing neighbors of `source` with weights. Parallel edges collapse to the
    /// last weight added.
    pub fn out_dict(&self, source: &V) -> HashMap<V, f64> {
        self.edges
            .iter()
            .filter(|(s, _, _)| s == source)
            .map(|(_, t, w)| (t.clone(), *w))
            .collect()
    }

    /// Outgoing neighbor labels of `source`.
    pub fn out_vertices(&self, source: &V) -> Vec<V> {
        self.edges
            .iter()
            .filter(|(s, _, _)| s == source)
            .map(|(_, t, _)| t.clone())
            .collect()
    }

    /// Incoming neighbors of `target` with weights.
    pub fn in_dict(&self, target: &V) -> HashMap<V, f64> {
        self.edges
            .iter()
            .filter(|(_, t, _)| t == target)
            .map(|(s, _, w)| (s.clone(), *w))
            .collect()
    }

    /// Rescale the outgoing weights of every vertex to sum to 1, replacing the
    /// internal edge list. Vertices with zero outgoing mass keep their edges
    /// untouched. Applying this twice is the same as applying it once.
    pub fn normalize_weights(&mut self) {
        let mut totals: HashMap<&V, f64> = HashMap::new();
        for (source, _, weight) in &self.edges {
            *totals.entry(source).or_insert(0.0) += weight;
        }

        let new_edges = self
            .edges
            .iter()
            .map(|(s, t, w)| {
                let total = totals.get(s).copied().unwrap_or(0.0);
                let w = if total > 0.0 { w / total } else { *w };
                (s.clone(), t.clone(), w)
            })
            .collect();
        self.edges = new_edges;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_sums(graph: &TransitionGraph<u32>) -> HashMap<u32, f64> {
        let mut sums = HashMap::new();
        for (s, _, w) in graph.edges() {
            *sums.entry(*s).or_insert(0.0) += w;
        }
        sums
    }

    #[test]
    fn add_edge_inserts_endpoints() {
        let mut g = TransitionGraph::new();
        g.add_edge(1u32, 2u32, 0.5);
        g.add_vertex(7);
        assert_eq!(g.num_vertices(), 3);
        assert!(g.vertices().contains(&7));
    }

    #[test]
    fn out_and_in_dicts() {
        let mut g = TransitionGraph::new();
        g.add_edges([(0u32, 0u32, 0.6), (0, 1, 0.4), (1, 0, 1.0)]);

        let out = g.out_dict(&0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[&0], 0.6);
        assert_eq!(out[&1], 0.4);

        let incoming = g.in_dict(&0);
        assert_eq!(incoming[&1], 1.0);
        assert_eq!(incoming[&0], 0.6);

        assert_eq!(g.out_vertices(&1), vec![0]);
    }

    #[test]
    fn unweighted_edges_default_to_one() {
        let mut g = TransitionGraph::new();
        g.add_unweighted_edges([(0u32, 1u32), (1, 2)]);
        for (_, _, w) in g.edges() {
            assert_eq!(*w, 1.0);
        }
    }

    #[test]
    fn normalize_weights_makes_rows_stochastic_and_is_idempotent() {
        let mut g = TransitionGraph::new();
        g.add_edges([(0u32, 0u32, 2.0), (0, 1, 6.0), (1, 0, 5.0), (1, 1, 5.0)]);

        g.normalize_weights();
        for (_, total) in row_sums(&g) {
            assert!((total - 1.0).abs() < 1e-12);
        }
        let first = g.edges().to_vec();

        g.normalize_weights();
        assert_eq!(g.edges(), &first[..]);
    }
}
