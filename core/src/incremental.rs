//! Cost-ordered incremental enumeration.
//!
//! The frontier holds partial paths rather than vertices, so the same vertex
//! may be reached many times along different routes. Every pop that lands on
//! the target is the next-cheapest simple path.

use std::collections::BinaryHeap;
use std::ops::ControlFlow;

use crate::cost::CostEvaluator;
use crate::error::{KPathsError, Result};
use crate::expander::{PathExpander, SearchDirection};
use crate::overlay::{VEdge, VIdx, VirtualGraph};
use crate::path::{Path, PathRecord, PathStep, PathTransform};
use crate::traversal::{DeviationSearch, MinCost};

/// Receives each path as soon as it is found.
pub trait PathListener {
    /// Return `ControlFlow::Break(())` when the consumer is gone; the search
    /// stops without expanding further.
    fn on_path_ready(&mut self, path: PathRecord) -> ControlFlow<()>;
}

impl<F> PathListener for F
where
    F: FnMut(PathRecord) -> ControlFlow<()>,
{
    fn on_path_ready(&mut self, path: PathRecord) -> ControlFlow<()> {
        self(path)
    }
}

/// A path enumerator whose overlay can render the paths it yields.
pub trait PathSource<'g>: Iterator<Item = Result<Path>> {
    fn overlay(&self) -> &VirtualGraph<'g>;
}

impl<'g> PathSource<'g> for DeviationSearch<'_, 'g> {
    fn overlay(&self) -> &VirtualGraph<'g> {
        DeviationSearch::overlay(self)
    }
}

impl<'g> PathSource<'g> for CostOrderedSearch<'_, 'g> {
    fn overlay(&self) -> &VirtualGraph<'g> {
        CostOrderedSearch::overlay(self)
    }
}

/// Push every path `source` yields to `listener`, synchronously and in order.
///
/// `delivered` counts paths the listener received, including the one that
/// signalled cancellation. Cancellation returns `ConsumerGone` and nothing
/// more is pulled from `source`.
pub fn deliver<'g, S>(source: &mut S, listener: &mut dyn PathListener, delivered: &mut usize) -> Result<()>
where
    S: PathSource<'g>,
{
    while let Some(next) = source.next() {
        let path = next?;
        let record = PathRecord::of(source.overlay(), &path);
        *delivered += 1;
        if listener.on_path_ready(record).is_break() {
            return Err(KPathsError::ConsumerGone);
        }
    }
    Ok(())
}

/// A partial path in the frontier, linked to its parent record.
struct Record {
    vertex: VIdx,
    parent: Option<usize>,
    edge: Option<VEdge>,
    cost: f64,
    hops: usize,
}

/// Dijkstra-style enumeration of simple paths in non-decreasing cost order.
///
/// This is a pull interface: stop calling `next` to cancel. Use [`deliver`]
/// to drive it against a [`PathListener`].
pub struct CostOrderedSearch<'x, 'g> {
    expander: &'x mut PathExpander<'g>,
    cost: &'x CostEvaluator,
    target: VIdx,
    k: usize,
    max_hops: usize,
    min_length: usize,
    transform: Option<PathTransform<'x>>,
    records: Vec<Record>,
    heap: BinaryHeap<MinCost>,
    next_seq: u64,
    delivered: usize,
    done: bool,
}

impl<'x, 'g> CostOrderedSearch<'x, 'g> {
    pub fn new(
        expander: &'x mut PathExpander<'g>,
        cost: &'x CostEvaluator,
        source: VIdx,
        target: VIdx,
        k: usize,
        max_hops: usize,
    ) -> Self {
        let mut heap = BinaryHeap::new();
        heap.push(MinCost { cost: 0.0, seq: 0, slot: 0 });
        Self {
            expander,
            cost,
            target,
            k,
            max_hops,
            min_length: 0,
            transform: None,
            records: vec![Record {
                vertex: source,
                parent: None,
                edge: None,
                cost: 0.0,
                hops: 0,
            }],
            heap,
            next_seq: 0,
            delivered: 0,
            done: k == 0,
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_transform(mut self, transform: PathTransform<'x>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn overlay(&self) -> &VirtualGraph<'g> {
        self.expander.overlay()
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Whether extending record `at` with `edge` keeps the path simple.
    ///
    /// An aggregate vertex may reappear when it is entered from a member
    /// that did not enter it before; real vertices and wrappers never repeat.
    fn can_extend(&self, at: usize, edge: &VEdge) -> bool {
        let aggregate = self.expander.overlay().is_aggregate(edge.to);
        let mut cursor = Some(at);
        while let Some(i) = cursor {
            let rec = &self.records[i];
            if rec.vertex == edge.to {
                if !aggregate {
                    return false;
                }
                let entered_from = rec.edge.as_ref().map(|e| e.from);
                if entered_from == Some(edge.from) {
                    return false;
                }
            }
            cursor = rec.parent;
        }
        true
    }

    fn reconstruct(&self, at: usize) -> Path {
        let mut steps = Vec::new();
        let mut cursor = Some(at);
        while let Some(i) = cursor {
            let rec = &self.records[i];
            steps.push(PathStep {
                vertex: rec.vertex,
                edge: rec.edge.clone(),
            });
            cursor = rec.parent;
        }
        steps.reverse();
        Path {
            steps,
            cost: self.records[at].cost,
        }
    }

    fn expand(&mut self, at: usize) -> Result<()> {
        let (vertex, cost, hops) = {
            let rec = &self.records[at];
            (rec.vertex, rec.cost, rec.hops)
        };
        for edge in self.expander.neighbors(vertex, SearchDirection::Forward) {
            if !self.can_extend(at, &edge) {
                continue;
            }
            let next_cost = cost + self.cost.cost(&edge, self.expander.overlay())?;
            self.next_seq += 1;
            let slot = self.records.len();
            self.records.push(Record {
                vertex: edge.to,
                parent: Some(at),
                edge: Some(edge),
                cost: next_cost,
                hops: hops + 1,
            });
            self.heap.push(MinCost {
                cost: next_cost,
                seq: self.next_seq,
                slot,
            });
        }
        Ok(())
    }
}

impl Iterator for CostOrderedSearch<'_, '_> {
    type Item = Result<Path>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(MinCost { slot, .. }) = self.heap.pop() {
            let rec = &self.records[slot];
            if rec.vertex == self.target {
                let path = self.reconstruct(slot);
                let out = match &self.transform {
                    Some(f) => f(path),
                    None => path,
                };
                if out.len() < self.min_length {
                    continue;
                }
                self.delivered += 1;
                if self.delivered >= self.k {
                    self.done = true;
                }
                return Some(Ok(out));
            }
            if rec.hops >= self.max_hops {
                continue;
            }
            if let Err(e) = self.expand(slot) {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::PathConstraints;
    use crate::error::EndpointRole;
    use crate::graph::{EdgeRecord, Graph, NodeId};
    use crate::value::Properties;

    fn edge(from: u64, to: u64, rel: &str) -> EdgeRecord {
        EdgeRecord::new(from, to, rel)
    }

    fn make_scenario() -> Graph {
        let mut g = Graph::new();
        g.load_edges(vec![
            edge(1, 2, "to"),
            edge(1, 3, "to"),
            edge(2, 3, "to"),
            edge(2, 1, "to"),
            edge(4, 1, "to"),
            edge(2, 4, "to"),
            edge(3, 4, "to"),
        ]);
        g
    }

    fn make_cycle(n: u64) -> Graph {
        let mut g = Graph::new();
        g.load_edges((0..n).map(|i| edge(i, (i + 1) % n, "NEXT")));
        g
    }

    fn ids(overlay: &VirtualGraph<'_>, path: &Path) -> Vec<NodeId> {
        path.vertices().map(|v| overlay.key(v).raw()).collect()
    }

    fn expander<'g>(g: &'g Graph, constraints: &str) -> PathExpander<'g> {
        PathExpander::new(VirtualGraph::new(g), PathConstraints::parse(constraints).unwrap(), 10)
    }

    #[test]
    fn test_scenario_in_cost_order() {
        let g = make_scenario();
        let mut x = expander(&g, "");
        let s = x.overlay_mut().resolve_by_id(2).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::default();
        let paths: Vec<Path> = CostOrderedSearch::new(&mut x, &cost, s, t, 3, 10)
            .collect::<Result<_>>()
            .unwrap();
        let got: Vec<Vec<NodeId>> = paths.iter().map(|p| ids(x.overlay(), p)).collect();
        assert_eq!(got, vec![vec![2, 1], vec![2, 4, 1], vec![2, 3, 4, 1]]);
    }

    #[test]
    fn test_weighted_costs_non_decreasing() {
        let mut g = Graph::new();
        g.load_edges(vec![
            edge(0, 1, "to").with_property("w", 1i64),
            edge(1, 3, "to").with_property("w", 1i64),
            edge(0, 3, "to").with_property("w", 5i64),
            edge(0, 2, "to").with_property("w", 1i64),
            edge(2, 3, "to").with_property("w", 2i64),
            edge(1, 2, "to").with_property("w", 0.5f64),
        ]);
        let mut x = expander(&g, "");
        let s = x.overlay_mut().resolve_by_id(0).unwrap();
        let t = x.overlay_mut().resolve_by_id(3).unwrap();
        let cost = CostEvaluator::new(Some("w".into()), 1.0);
        let paths: Vec<Path> = CostOrderedSearch::new(&mut x, &cost, s, t, 10, 10)
            .collect::<Result<_>>()
            .unwrap();
        let got: Vec<(Vec<NodeId>, f64)> = paths.iter().map(|p| (ids(x.overlay(), p), p.cost)).collect();
        assert_eq!(
            got,
            vec![
                (vec![0, 1, 3], 2.0),
                (vec![0, 2, 3], 3.0),
                (vec![0, 1, 2, 3], 3.5),
                (vec![0, 3], 5.0),
            ]
        );
    }

    #[test]
    fn test_missing_cost_property_is_hop_order() {
        let g = make_scenario();
        let mut x = expander(&g, r#"{"direction": {"to": "both"}}"#);
        let s = x.overlay_mut().resolve_by_id(2).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::new(Some("distance".into()), 1.0);
        let paths: Vec<Path> = CostOrderedSearch::new(&mut x, &cost, s, t, 20, 10)
            .collect::<Result<_>>()
            .unwrap();
        assert!(paths.len() > 3);
        for p in &paths {
            assert_eq!(p.cost, p.len() as f64);
        }
        for w in paths.windows(2) {
            assert!(w[0].cost <= w[1].cost);
        }
    }

    #[test]
    fn test_cycle_paths_stay_simple() {
        let g = make_cycle(5);
        let mut x = expander(&g, r#"{"defaultDirection": "both"}"#);
        let s = x.overlay_mut().resolve_by_id(0).unwrap();
        let t = x.overlay_mut().resolve_by_id(2).unwrap();
        let cost = CostEvaluator::default();
        let paths: Vec<Path> = CostOrderedSearch::new(&mut x, &cost, s, t, 10, 10)
            .collect::<Result<_>>()
            .unwrap();
        let got: Vec<Vec<NodeId>> = paths.iter().map(|p| ids(x.overlay(), p)).collect();
        assert_eq!(got, vec![vec![0, 1, 2], vec![0, 4, 3, 2]]);
    }

    #[test]
    fn test_max_hops_bounds_frontier() {
        let g = make_scenario();
        let mut x = expander(&g, "");
        let s = x.overlay_mut().resolve_by_id(2).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::default();
        let paths: Vec<Path> = CostOrderedSearch::new(&mut x, &cost, s, t, 10, 2)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_listener_cancellation_stops_search() {
        let g = make_scenario();
        let mut x = expander(&g, "");
        let a = x.overlay_mut().resolve_by_id(2).unwrap();
        let b = x.overlay_mut().resolve_by_id(1).unwrap();
        let s = x.overlay_mut().wrap_as_endpoint(a, EndpointRole::Source);
        let t = x.overlay_mut().wrap_as_endpoint(b, EndpointRole::Target);
        let cost = CostEvaluator::default();
        let mut search = CostOrderedSearch::new(&mut x, &cost, s, t, 3, 12)
            .with_transform(Box::new(Path::trim_endpoints));

        let mut seen = Vec::new();
        let mut listener = |rec: PathRecord| -> ControlFlow<()> {
            seen.push(rec.nodes.iter().map(|n| n.id).collect::<Vec<_>>());
            ControlFlow::Break(())
        };
        let mut delivered = 0;
        let res = deliver(&mut search, &mut listener, &mut delivered);
        assert!(matches!(res, Err(KPathsError::ConsumerGone)));
        assert_eq!(delivered, 1);
        assert_eq!(search.delivered(), 1);
        assert_eq!(seen, vec![vec![2, 1]]);
    }

    #[test]
    fn test_deliver_drives_deviation_search() {
        let g = make_scenario();
        let mut x = expander(&g, "");
        let s = x.overlay_mut().resolve_by_id(2).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::default();
        let mut search = DeviationSearch::new(&mut x, &cost, s, t, 3, 10);
        let mut lengths = Vec::new();
        let mut listener = |rec: PathRecord| -> ControlFlow<()> {
            lengths.push(rec.length);
            ControlFlow::Continue(())
        };
        let mut delivered = 0;
        deliver(&mut search, &mut listener, &mut delivered).unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(lengths, vec![1, 2, 3]);
    }

    #[test]
    fn test_aggregate_bridges_members() {
        let mut g = Graph::new();
        for (id, group) in [(1u64, "A"), (2, "A"), (3, "B")] {
            g.add_node(id, &["N"], Properties::new());
            g.set_node_property(id, "group", group);
        }
        g.load_edges(vec![edge(2, 3, "to")]);
        let mut x = expander(&g, r#"{"aggregate": {"property": "group"}}"#);
        let spec = x.constraints().aggregate.clone().unwrap();
        x.overlay_mut().enable_aggregates(&spec).unwrap();
        let s = x.overlay_mut().resolve_by_id(1).unwrap();
        let t = x.overlay_mut().resolve_by_id(3).unwrap();
        let cost = CostEvaluator::default();
        let paths: Vec<Path> = CostOrderedSearch::new(&mut x, &cost, s, t, 5, 10)
            .collect::<Result<_>>()
            .unwrap();
        assert!(!paths.is_empty());
        let first = &paths[0];
        // 1 -> group A -> 2 -> 3
        assert_eq!(first.len(), 3);
        assert!(x.overlay().is_aggregate(first.steps[1].vertex));
        assert_eq!(x.overlay().real_id(first.steps[2].vertex), Some(2));
        for p in &paths {
            let real: Vec<NodeId> = p.vertices().filter_map(|v| x.overlay().real_id(v)).collect();
            let mut dedup = real.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), real.len());
        }
    }

    #[test]
    fn test_zero_k_yields_nothing() {
        let g = make_scenario();
        let mut x = expander(&g, "");
        let s = x.overlay_mut().resolve_by_id(2).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::default();
        assert!(CostOrderedSearch::new(&mut x, &cost, s, t, 0, 10).next().is_none());
    }
}
