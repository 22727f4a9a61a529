use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::cost::CostEvaluator;
use crate::error::{KPathsError, Result};
use crate::expander::{PathExpander, SearchDirection};
use crate::overlay::{VEdge, VIdx, VirtualGraph};
use crate::path::{Path, PathStep, PathTransform};

/// Frontier entry ordered so that `BinaryHeap` (a max-heap) pops the
/// cheapest entry first, ties going to the earliest inserted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MinCost {
    pub cost: f64,
    pub seq: u64,
    pub slot: usize,
}

impl PartialEq for MinCost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MinCost {}

impl PartialOrd for MinCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinCost {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A search label: one way of reaching `vertex` in `hops` edges.
struct Label {
    vertex: VIdx,
    hops: usize,
    cost: f64,
    parent: Option<usize>,
    edge: Option<VEdge>,
}

/// Cheapest path from `start` to `target` within `max_hops` edges, avoiding
/// the excluded vertices and (from, to) edges. This is the inner step of the
/// deviation search.
///
/// Labels are (vertex, hops) pairs, so a vertex reached cheaply over many
/// hops can still be reached again over fewer. A label is dropped only when
/// the vertex was already settled at no more hops; labels pop in cost order,
/// so that settled label is also no more expensive.
pub fn shortest_path_excluding(
    expander: &mut PathExpander<'_>,
    cost: &CostEvaluator,
    start: VIdx,
    target: VIdx,
    max_hops: usize,
    excluded_nodes: &HashSet<VIdx>,
    excluded_edges: &HashSet<(VIdx, VIdx)>,
) -> Result<Option<Path>> {
    if excluded_nodes.contains(&start) || excluded_nodes.contains(&target) {
        return Ok(None);
    }
    if start == target {
        return Ok(Some(Path::single(start)));
    }
    if max_hops == 0 {
        return Ok(None);
    }

    let mut labels = vec![Label {
        vertex: start,
        hops: 0,
        cost: 0.0,
        parent: None,
        edge: None,
    }];
    // vertex -> fewest hops it has been settled with
    let mut settled: HashMap<VIdx, usize> = HashMap::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;
    heap.push(MinCost { cost: 0.0, seq, slot: 0 });

    while let Some(MinCost { slot, .. }) = heap.pop() {
        let (current, hops, dist) = {
            let label = &labels[slot];
            (label.vertex, label.hops, label.cost)
        };
        if settled.get(&current).is_some_and(|&h| h <= hops) {
            continue;
        }
        settled.insert(current, hops);
        if current == target {
            return Ok(Some(reconstruct_path(&labels, slot)));
        }
        if hops >= max_hops {
            continue;
        }

        for edge in expander.neighbors(current, SearchDirection::Forward) {
            let next = edge.to;
            if settled.get(&next).is_some_and(|&h| h <= hops + 1)
                || excluded_nodes.contains(&next)
                || excluded_edges.contains(&(current, next))
            {
                continue;
            }
            let next_cost = dist + cost.cost(&edge, expander.overlay())?;
            seq += 1;
            heap.push(MinCost { cost: next_cost, seq, slot: labels.len() });
            labels.push(Label {
                vertex: next,
                hops: hops + 1,
                cost: next_cost,
                parent: Some(slot),
                edge: Some(edge),
            });
        }
    }

    Ok(None)
}

fn reconstruct_path(labels: &[Label], at: usize) -> Path {
    let mut steps = Vec::new();
    let mut cursor = Some(at);
    while let Some(i) = cursor {
        let label = &labels[i];
        steps.push(PathStep { vertex: label.vertex, edge: label.edge.clone() });
        cursor = label.parent;
    }
    steps.reverse();
    Path { steps, cost: labels[at].cost }
}

fn edge_costs(path: &Path, upto: usize, cost: &CostEvaluator, overlay: &VirtualGraph<'_>) -> Result<f64> {
    let mut total = 0.0;
    for step in &path.steps[1..=upto] {
        if let Some(edge) = &step.edge {
            total += cost.cost(edge, overlay)?;
        }
    }
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    FirstShortest,
    Deviate,
    Done,
}

struct Candidate {
    path: Path,
    seq: u64,
}

/// Yen-style enumeration of up to `k` simple paths in ascending cost order.
///
/// Paths are produced lazily: each call to `next` accepts at most one more
/// path. Accepted paths shorter than the minimum length (after the transform)
/// are skipped without counting toward `k`. Fewer than `k` paths is a normal
/// outcome.
pub struct DeviationSearch<'x, 'g> {
    expander: &'x mut PathExpander<'g>,
    cost: &'x CostEvaluator,
    source: VIdx,
    target: VIdx,
    k: usize,
    max_hops: usize,
    min_length: usize,
    transform: Option<PathTransform<'x>>,
    stage: Stage,
    accepted: Vec<Path>,
    candidates: Vec<Candidate>,
    next_seq: u64,
    delivered: usize,
}

impl<'x, 'g> DeviationSearch<'x, 'g> {
    pub fn new(
        expander: &'x mut PathExpander<'g>,
        cost: &'x CostEvaluator,
        source: VIdx,
        target: VIdx,
        k: usize,
        max_hops: usize,
    ) -> Self {
        Self {
            expander,
            cost,
            source,
            target,
            k,
            max_hops,
            min_length: 0,
            transform: None,
            stage: Stage::Init,
            accepted: Vec::new(),
            candidates: Vec::new(),
            next_seq: 0,
            delivered: 0,
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Applied to each accepted path before it is yielded. Deviations are
    /// always computed on the untransformed path.
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

    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(KPathsError::InvalidRequest("k must be at least 1".into()));
        }
        let n = self.expander.overlay().vertex_count();
        for (role, v) in [("source", self.source), ("target", self.target)] {
            if v as usize >= n {
                return Err(KPathsError::InvalidRequest(format!(
                    "{} vertex {} is not in the overlay",
                    role, v
                )));
            }
        }
        Ok(())
    }

    /// Record `path` as accepted and return what should be surfaced, if anything.
    fn accept(&mut self, path: Path) -> Option<Path> {
        self.accepted.push(path.clone());
        let out = match &self.transform {
            Some(f) => f(path),
            None => path,
        };
        if out.len() < self.min_length {
            tracing::trace!(length = out.len(), "path below minimum length skipped");
            return None;
        }
        self.delivered += 1;
        if self.delivered >= self.k {
            self.stage = Stage::Done;
        }
        Some(out)
    }

    /// Branch off the most recently accepted path at every spur vertex.
    fn deviate(&mut self) -> Result<()> {
        let Some(prev) = self.accepted.last().cloned() else {
            return Ok(());
        };

        for spur_idx in 0..prev.steps.len().saturating_sub(1) {
            let spur = prev.steps[spur_idx].vertex;
            let root_ids: Vec<VIdx> = prev.steps[..=spur_idx].iter().map(|s| s.vertex).collect();

            // Edges leaving the spur on accepted paths that share this root
            let mut excluded_edges: HashSet<(VIdx, VIdx)> = HashSet::new();
            for path in &self.accepted {
                if path.steps.len() > spur_idx + 1
                    && path.steps[..=spur_idx]
                        .iter()
                        .map(|s| s.vertex)
                        .eq(root_ids.iter().copied())
                {
                    excluded_edges.insert((path.steps[spur_idx].vertex, path.steps[spur_idx + 1].vertex));
                }
            }

            // Root vertices other than the spur keep the result simple
            let excluded_nodes: HashSet<VIdx> = root_ids[..spur_idx].iter().copied().collect();

            let remaining_hops = self.max_hops.saturating_sub(spur_idx);
            if remaining_hops == 0 {
                continue;
            }

            let Some(spur_path) = shortest_path_excluding(
                self.expander,
                self.cost,
                spur,
                self.target,
                remaining_hops,
                &excluded_nodes,
                &excluded_edges,
            )?
            else {
                continue;
            };

            let root_cost = edge_costs(&prev, spur_idx, self.cost, self.expander.overlay())?;
            let mut steps = prev.steps[..=spur_idx].to_vec();
            steps.extend(spur_path.steps.into_iter().skip(1));
            let candidate = Path {
                steps,
                cost: root_cost + spur_path.cost,
            };

            let is_dup = self
                .accepted
                .iter()
                .chain(self.candidates.iter().map(|c| &c.path))
                .any(|p| p.steps.len() == candidate.steps.len() && p.vertices().eq(candidate.vertices()));
            if !is_dup {
                self.next_seq += 1;
                self.candidates.push(Candidate {
                    path: candidate,
                    seq: self.next_seq,
                });
            }
        }
        Ok(())
    }

    /// Remove the best pooled candidate: lowest cost, then fewest edges,
    /// then earliest found.
    fn take_best(&mut self) -> Option<Path> {
        let best = self
            .candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.path
                    .cost
                    .total_cmp(&b.path.cost)
                    .then_with(|| a.path.len().cmp(&b.path.len()))
                    .then_with(|| a.seq.cmp(&b.seq))
            })
            .map(|(i, _)| i)?;
        Some(self.candidates.remove(best).path)
    }

    fn fail(&mut self, err: KPathsError) -> Option<Result<Path>> {
        self.stage = Stage::Done;
        Some(Err(err))
    }
}

impl Iterator for DeviationSearch<'_, '_> {
    type Item = Result<Path>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stage {
                Stage::Init => {
                    if let Err(e) = self.validate() {
                        return self.fail(e);
                    }
                    self.stage = Stage::FirstShortest;
                }
                Stage::FirstShortest => {
                    let first = shortest_path_excluding(
                        self.expander,
                        self.cost,
                        self.source,
                        self.target,
                        self.max_hops,
                        &HashSet::new(),
                        &HashSet::new(),
                    );
                    match first {
                        Err(e) => return self.fail(e),
                        Ok(None) => self.stage = Stage::Done,
                        Ok(Some(path)) => {
                            self.stage = Stage::Deviate;
                            if let Some(out) = self.accept(path) {
                                return Some(Ok(out));
                            }
                        }
                    }
                }
                Stage::Deviate => {
                    if let Err(e) = self.deviate() {
                        return self.fail(e);
                    }
                    match self.take_best() {
                        None => self.stage = Stage::Done,
                        Some(path) => {
                            if let Some(out) = self.accept(path) {
                                return Some(Ok(out));
                            }
                        }
                    }
                }
                Stage::Done => return None,
            }
        }
    }
}

/// Collect up to `k` simple paths from `source` to `target`, cheapest first.
pub fn k_shortest_paths(
    expander: &mut PathExpander<'_>,
    cost: &CostEvaluator,
    source: VIdx,
    target: VIdx,
    k: usize,
    max_hops: usize,
) -> Result<Vec<Path>> {
    DeviationSearch::new(expander, cost, source, target, k, max_hops).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::PathConstraints;
    use crate::error::EndpointRole;
    use crate::graph::{EdgeRecord, Graph, NodeId};

    fn edge(from: u64, to: u64, rel: &str) -> EdgeRecord {
        EdgeRecord::new(from, to, rel)
    }

    fn make_chain(n: u64) -> Graph {
        let mut g = Graph::new();
        g.load_edges((0..n - 1).map(|i| edge(i, i + 1, "NEXT")));
        g
    }

    /// 1→2, 1→3, 2→3, 2→1, 4→1, 2→4, 3→4
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

    /// 0→1→3 and 0→2→3, both two hops.
    fn make_diamond() -> Graph {
        let mut g = Graph::new();
        g.load_edges(vec![
            edge(0, 1, "IMPLIES"),
            edge(1, 3, "IMPLIES"),
            edge(0, 2, "SUPPORTS"),
            edge(2, 3, "SUPPORTS"),
        ]);
        g
    }

    fn ids(x: &PathExpander<'_>, path: &Path) -> Vec<NodeId> {
        path.vertices().map(|v| x.overlay().key(v).raw()).collect()
    }

    fn ksp(g: &Graph, constraints: &str, from: u64, to: u64, k: usize, max_hops: usize) -> Vec<Vec<NodeId>> {
        let mut x = PathExpander::new(VirtualGraph::new(g), PathConstraints::parse(constraints).unwrap(), 10);
        let s = x.overlay_mut().resolve_by_id(from).unwrap();
        let t = x.overlay_mut().resolve_by_id(to).unwrap();
        let paths = k_shortest_paths(&mut x, &CostEvaluator::default(), s, t, k, max_hops).unwrap();
        paths.iter().map(|p| ids(&x, p)).collect()
    }

    #[test]
    fn test_ksp_single_path_same_as_shortest() {
        let g = make_chain(5);
        let paths = ksp(&g, "", 0, 4, 1, 10);
        assert_eq!(paths, vec![vec![0, 1, 2, 3, 4]]);
    }

    #[test]
    fn test_ksp_respects_max_hops() {
        let g = make_chain(5);
        assert!(ksp(&g, "", 0, 4, 3, 3).is_empty());
        assert_eq!(ksp(&g, "", 0, 4, 3, 4).len(), 1);
    }

    #[test]
    fn test_ksp_diamond_two_paths() {
        let g = make_diamond();
        let paths = ksp(&g, "", 0, 3, 5, 10);
        assert_eq!(paths, vec![vec![0, 1, 3], vec![0, 2, 3]]);
    }

    #[test]
    fn test_ksp_scenario() {
        let g = make_scenario();
        let paths = ksp(&g, "", 2, 1, 3, 10);
        assert_eq!(paths, vec![vec![2, 1], vec![2, 4, 1], vec![2, 3, 4, 1]]);

        // Fewer than k is fine
        assert_eq!(ksp(&g, "", 2, 1, 10, 10).len(), 3);
    }

    #[test]
    fn test_ksp_paths_are_simple_and_distinct() {
        let g = make_scenario();
        let paths = ksp(&g, r#"{"direction": {"to": "both"}}"#, 2, 1, 10, 10);
        assert!(!paths.is_empty());
        for p in &paths {
            let unique: HashSet<&NodeId> = p.iter().collect();
            assert_eq!(unique.len(), p.len(), "repeated vertex in {:?}", p);
            assert_eq!(p[0], 2);
            assert_eq!(*p.last().unwrap(), 1);
        }
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                assert_ne!(paths[i], paths[j]);
            }
        }
        for w in paths.windows(2) {
            assert!(w[0].len() <= w[1].len());
        }
    }

    #[test]
    fn test_ksp_weighted_cost_order() {
        let mut g = Graph::new();
        g.load_edges(vec![
            edge(0, 1, "to").with_property("w", 1i64),
            edge(1, 3, "to").with_property("w", 1i64),
            edge(0, 3, "to").with_property("w", 5i64),
            edge(0, 2, "to").with_property("w", 1i64),
            edge(2, 3, "to").with_property("w", 2i64),
        ]);
        let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
        let s = x.overlay_mut().resolve_by_id(0).unwrap();
        let t = x.overlay_mut().resolve_by_id(3).unwrap();
        let cost = CostEvaluator::new(Some("w".into()), 1.0);
        let paths = k_shortest_paths(&mut x, &cost, s, t, 3, 10).unwrap();
        let got: Vec<(Vec<NodeId>, f64)> = paths.iter().map(|p| (ids(&x, p), p.cost)).collect();
        assert_eq!(
            got,
            vec![(vec![0, 1, 3], 2.0), (vec![0, 2, 3], 3.0), (vec![0, 3], 5.0)]
        );
    }

    #[test]
    fn test_weighted_tight_hop_bound_keeps_short_route() {
        // The cheap route reaches 3 in two hops; only the expensive
        // one-hop edge into 3 leaves room to reach 4 within two hops.
        let mut g = Graph::new();
        g.load_edges(vec![
            edge(1, 2, "to").with_property("w", 1i64),
            edge(2, 3, "to").with_property("w", 1i64),
            edge(3, 4, "to").with_property("w", 1i64),
            edge(1, 3, "to").with_property("w", 10i64),
        ]);
        let cost = CostEvaluator::new(Some("w".into()), 1.0);
        let run = |max_hops: usize| {
            let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
            let s = x.overlay_mut().resolve_by_id(1).unwrap();
            let t = x.overlay_mut().resolve_by_id(4).unwrap();
            let paths = k_shortest_paths(&mut x, &cost, s, t, 3, max_hops).unwrap();
            paths.iter().map(|p| (ids(&x, p), p.cost)).collect::<Vec<_>>()
        };
        assert_eq!(run(2), vec![(vec![1, 3, 4], 11.0)]);
        assert_eq!(
            run(3),
            vec![(vec![1, 2, 3, 4], 3.0), (vec![1, 3, 4], 11.0)]
        );
    }

    #[test]
    fn test_min_length_skips_without_consuming_k() {
        let g = make_scenario();
        let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
        let s = x.overlay_mut().resolve_by_id(2).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::default();
        let paths: Vec<Path> = DeviationSearch::new(&mut x, &cost, s, t, 2, 10)
            .with_min_length(2)
            .collect::<Result<_>>()
            .unwrap();
        let got: Vec<Vec<NodeId>> = paths.iter().map(|p| ids(&x, p)).collect();
        assert_eq!(got, vec![vec![2, 4, 1], vec![2, 3, 4, 1]]);
    }

    #[test]
    fn test_wrapped_endpoints_are_trimmed() {
        let g = make_scenario();
        let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
        let a = x.overlay_mut().resolve_by_id(2).unwrap();
        let b = x.overlay_mut().resolve_by_id(1).unwrap();
        let s = x.overlay_mut().wrap_as_endpoint(a, EndpointRole::Source);
        let t = x.overlay_mut().wrap_as_endpoint(b, EndpointRole::Target);
        let cost = CostEvaluator::default();
        let paths: Vec<Path> = DeviationSearch::new(&mut x, &cost, s, t, 3, 10 + 2)
            .with_transform(Box::new(Path::trim_endpoints))
            .collect::<Result<_>>()
            .unwrap();
        let got: Vec<Vec<NodeId>> = paths.iter().map(|p| ids(&x, p)).collect();
        assert_eq!(got, vec![vec![2, 1], vec![2, 4, 1], vec![2, 3, 4, 1]]);
        let costs: Vec<f64> = paths.iter().map(|p| p.cost).collect();
        assert_eq!(costs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_zero_k_is_rejected() {
        let g = make_chain(3);
        let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
        let s = x.overlay_mut().resolve_by_id(0).unwrap();
        let t = x.overlay_mut().resolve_by_id(2).unwrap();
        let res = k_shortest_paths(&mut x, &CostEvaluator::default(), s, t, 0, 10);
        assert!(matches!(res, Err(KPathsError::InvalidRequest(_))));
    }

    #[test]
    fn test_invalid_cost_stops_search() {
        let mut g = Graph::new();
        g.load_edges(vec![edge(0, 1, "to").with_property("w", "heavy")]);
        let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
        let s = x.overlay_mut().resolve_by_id(0).unwrap();
        let t = x.overlay_mut().resolve_by_id(1).unwrap();
        let cost = CostEvaluator::new(Some("w".into()), 1.0);
        let mut search = DeviationSearch::new(&mut x, &cost, s, t, 3, 10);
        assert!(matches!(search.next(), Some(Err(KPathsError::InvalidCost { .. }))));
        assert!(search.next().is_none());
    }

    #[test]
    fn test_excluded_edges_force_detour() {
        let g = make_diamond();
        let mut x = PathExpander::new(VirtualGraph::new(&g), PathConstraints::default(), 10);
        let s = x.overlay_mut().resolve_by_id(0).unwrap();
        let one = x.overlay_mut().resolve_by_id(1).unwrap();
        let t = x.overlay_mut().resolve_by_id(3).unwrap();
        let excluded: HashSet<(VIdx, VIdx)> = [(s, one)].into_iter().collect();
        let p = shortest_path_excluding(&mut x, &CostEvaluator::default(), s, t, 10, &HashSet::new(), &excluded)
            .unwrap()
            .unwrap();
        assert_eq!(ids(&x, &p), vec![0, 2, 3]);

        let blocked: HashSet<VIdx> = [t].into_iter().collect();
        let none = shortest_path_excluding(&mut x, &CostEvaluator::default(), s, t, 10, &blocked, &HashSet::new())
            .unwrap();
        assert!(none.is_none());
    }
}
