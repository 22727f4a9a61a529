//! Neighbour expansion over the virtual graph.
//!
//! [`PathExpander::neighbors`] is the single step every search uses to grow
//! its frontier: direction policy, edge and node constraints, inline-chain
//! collapsing, aggregate links and endpoint-wrapper links all apply here.

use std::collections::{BTreeMap, HashSet};

use crate::constraint::{Candidate, Constraint, DirectionPolicy, InlineSpec, PathConstraints};
use crate::error::EndpointRole;
use crate::graph::{Direction, NodeId, RelTypeId};
use crate::overlay::{ChainHop, EdgeKind, VEdge, VIdx, VirtualGraph};
use crate::value::{Properties, PropertyValue};

/// Orientation of a search relative to source -> target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

impl SearchDirection {
    /// Stored-relative traversal direction of a relationship found in the
    /// `stored` adjacency list of the vertex being expanded.
    fn traversal(self, stored: Direction) -> Direction {
        match self {
            SearchDirection::Forward => stored,
            SearchDirection::Backward => stored.reverse(),
        }
    }

    /// Wrapper role whose candidates expand outward in this direction.
    fn origin_role(self) -> EndpointRole {
        match self {
            SearchDirection::Forward => EndpointRole::Source,
            SearchDirection::Backward => EndpointRole::Target,
        }
    }

    /// Wrapper role that candidates link into in this direction.
    fn goal_role(self) -> EndpointRole {
        match self {
            SearchDirection::Forward => EndpointRole::Target,
            SearchDirection::Backward => EndpointRole::Source,
        }
    }
}

pub struct PathExpander<'g> {
    overlay: VirtualGraph<'g>,
    constraints: PathConstraints,
    edge_constraint: Constraint,
    /// Type whitelist and edge property tests applied to every hop inside
    /// an inlined chain.
    chain_constraint: Constraint,
    inline_type: Option<RelTypeId>,
    inline_policy: DirectionPolicy,
    max_chain: usize,
    debug: bool,
}

impl<'g> PathExpander<'g> {
    pub fn new(overlay: VirtualGraph<'g>, constraints: PathConstraints, max_chain: usize) -> Self {
        let store = overlay.store();
        let inline_type = constraints
            .inline
            .as_ref()
            .and_then(|i| store.rel_type_id(&i.rel_type));
        let inline_policy = constraints
            .inline
            .as_ref()
            .and_then(|i| constraints.directions.rules.get(&i.rel_type).copied())
            .unwrap_or(DirectionPolicy::Both);
        let mut chain_parts: Vec<Constraint> = constraints
            .edge_types
            .iter()
            .cloned()
            .map(Constraint::EdgeType)
            .collect();
        chain_parts.extend(constraints.edge_predicates.iter().cloned().map(Constraint::Property));
        let chain_constraint = Constraint::And(chain_parts);
        Self {
            edge_constraint: constraints.edge_constraint(),
            chain_constraint,
            inline_type,
            inline_policy,
            max_chain: max_chain.max(1),
            debug: false,
            overlay,
            constraints,
        }
    }

    /// Trace every candidate with the reason it was kept or dropped.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn constraints(&self) -> &PathConstraints {
        &self.constraints
    }

    pub fn overlay(&self) -> &VirtualGraph<'g> {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut VirtualGraph<'g> {
        &mut self.overlay
    }

    fn trace(&self, from: VIdx, to: VIdx, rel_type: &str, verdict: &'static str) {
        if self.debug {
            tracing::debug!(
                from = self.overlay.key(from).raw(),
                to = self.overlay.key(to).raw(),
                rel_type,
                verdict,
                "expansion candidate"
            );
        }
    }

    /// Expand `v` one step in `dir`.
    ///
    /// Order: real relationships (store order, outgoing list before incoming),
    /// inline-chain terminals, aggregate links, endpoint links. Only the first
    /// edge toward any given neighbour is kept.
    pub fn neighbors(&mut self, v: VIdx, dir: SearchDirection) -> Vec<VEdge> {
        let mut out = Vec::new();

        if let Some(role) = self.overlay.endpoint_role(v) {
            if role == dir.origin_role() {
                for m in self.overlay.endpoint_members(v) {
                    out.push(self.link(v, m, "_endpoint", EdgeKind::Endpoint, dir));
                }
            }
            return dedup(out);
        }

        if self.overlay.is_aggregate(v) {
            let rel_type = self.overlay.aggregate_type().unwrap_or("_aggregate").to_string();
            for m in self.overlay.aggregate_members_of(v).to_vec() {
                if self.admits(m, dir) {
                    out.push(self.link(v, m, &rel_type, EdgeKind::Member, dir));
                } else {
                    self.trace(v, m, &rel_type, "rejected: node constraint");
                }
            }
            return dedup(out);
        }

        let Some(node) = self.overlay.real_id(v) else {
            return out;
        };

        self.expand_real(v, node, dir, &mut out);
        if self.inline_type.is_some() {
            self.expand_inline(v, node, dir, &mut out);
        }

        if let Some(rel_type) = self.overlay.aggregate_type().map(str::to_string) {
            for agg in self.overlay.aggregates_of(v).to_vec() {
                out.push(self.link(v, agg, &rel_type, EdgeKind::Member, dir));
            }
        }

        for w in self.overlay.wrappers_containing(v, dir.goal_role()) {
            out.push(self.link(v, w, "_endpoint", EdgeKind::Endpoint, dir));
        }

        dedup(out)
    }

    fn link(&self, from: VIdx, to: VIdx, rel_type: &str, kind: EdgeKind, dir: SearchDirection) -> VEdge {
        VEdge {
            from,
            to,
            rel_type: rel_type.to_string(),
            direction: dir.traversal(Direction::Outgoing),
            properties: Properties::new(),
            kind,
        }
    }

    /// Node constraint check for a vertex about to be entered. Goal-wrapper
    /// candidates and aggregate vertices are always admitted.
    fn admits(&mut self, v: VIdx, dir: SearchDirection) -> bool {
        if self.overlay.is_aggregate(v) || self.constraints.node.is_empty() {
            return true;
        }
        if !self.overlay.wrappers_containing(v, dir.goal_role()).is_empty() {
            return true;
        }
        match self.overlay.node_info(v) {
            Some(info) => self.constraints.node.evaluate(info),
            None => true,
        }
    }

    fn expand_real(&mut self, v: VIdx, node: NodeId, dir: SearchDirection, out: &mut Vec<VEdge>) {
        let store = self.overlay.store();
        for stored in [Direction::Outgoing, Direction::Incoming] {
            for rel in store.relationships(node, stored) {
                if Some(rel.rel_type) == self.inline_type {
                    continue;
                }
                let other = rel.other(stored);
                if other == node {
                    continue;
                }
                let rel_type = store.rel_type_name(rel.rel_type).unwrap_or("UNKNOWN");
                let direction = dir.traversal(stored);
                let to = self.overlay.intern_real(other);
                let candidate = Candidate::Edge {
                    rel_type,
                    direction,
                    properties: &rel.properties,
                };
                if !self.edge_constraint.evaluate(&candidate) {
                    self.trace(v, to, rel_type, "rejected: edge constraint");
                    continue;
                }
                if !self.admits(to, dir) {
                    self.trace(v, to, rel_type, "rejected: node constraint");
                    continue;
                }
                self.trace(v, to, rel_type, "accepted");
                out.push(VEdge {
                    from: v,
                    to,
                    rel_type: rel_type.to_string(),
                    direction,
                    properties: Properties::new(),
                    kind: EdgeKind::Real(rel.id),
                });
            }
        }
    }

    /// Whether an inline chain may stop at `node`: it continues with at least
    /// one traversable non-inline relationship, or it is a goal candidate.
    fn is_chain_terminal(&mut self, node: NodeId, dir: SearchDirection) -> bool {
        let v = self.overlay.intern_real(node);
        if !self.overlay.wrappers_containing(v, dir.goal_role()).is_empty() {
            return true;
        }
        let store = self.overlay.store();
        for stored in [Direction::Outgoing, Direction::Incoming] {
            for rel in store.relationships(node, stored) {
                if Some(rel.rel_type) == self.inline_type || rel.other(stored) == node {
                    continue;
                }
                let candidate = Candidate::Edge {
                    rel_type: store.rel_type_name(rel.rel_type).unwrap_or("UNKNOWN"),
                    direction: dir.traversal(stored),
                    properties: &rel.properties,
                };
                if self.edge_constraint.evaluate(&candidate) {
                    return true;
                }
            }
        }
        false
    }

    /// Walk inline-typed hops from `node` and emit one virtual edge per
    /// terminal reached. Chains never pass through a terminal; intermediate
    /// vertices are collapsed away and are not tested against node constraints.
    fn expand_inline(&mut self, v: VIdx, node: NodeId, dir: SearchDirection, out: &mut Vec<VEdge>) {
        let Some(spec) = self.constraints.inline.clone() else {
            return;
        };
        let store = self.overlay.store();

        // (current node, hops so far)
        let mut stack: Vec<(NodeId, Vec<ChainHop>)> = vec![(node, Vec::new())];
        let mut emitted: Vec<(NodeId, Vec<ChainHop>)> = Vec::new();

        while let Some((current, hops)) = stack.pop() {
            if hops.len() >= self.max_chain {
                continue;
            }
            let mut next_steps = Vec::new();
            for stored in [Direction::Outgoing, Direction::Incoming] {
                let direction = dir.traversal(stored);
                if !self.inline_policy.allows(direction) {
                    continue;
                }
                for rel in store.relationships(current, stored) {
                    if Some(rel.rel_type) != self.inline_type {
                        continue;
                    }
                    let next = rel.other(stored);
                    if next == node || hops.iter().any(|h| h.node == next) {
                        continue;
                    }
                    let candidate = Candidate::Edge {
                        rel_type: &spec.rel_type,
                        direction,
                        properties: &rel.properties,
                    };
                    if !self.chain_constraint.evaluate(&candidate) {
                        continue;
                    }
                    let mut chain = hops.clone();
                    chain.push(ChainHop {
                        rel: rel.id,
                        direction,
                        node: next,
                    });
                    next_steps.push((next, chain));
                }
            }

            let mut deeper = Vec::new();
            for (next, chain) in next_steps {
                if self.is_chain_terminal(next, dir) {
                    emitted.push((next, chain));
                } else {
                    deeper.push((next, chain));
                }
            }
            // Reversed so the stack pops in store order
            stack.extend(deeper.into_iter().rev());
        }

        for (terminal, chain) in emitted {
            let to = self.overlay.intern_real(terminal);
            if !self.admits(to, dir) {
                self.trace(v, to, &spec.as_type, "rejected: node constraint");
                continue;
            }
            self.trace(v, to, &spec.as_type, "accepted: inlined");
            let properties = self.merge_chain_properties(&spec, &chain);
            out.push(VEdge {
                from: v,
                to,
                rel_type: spec.as_type.clone(),
                direction: dir.traversal(Direction::Outgoing),
                properties,
                kind: EdgeKind::Inlined(chain),
            });
        }
    }

    fn merge_chain_properties(&self, spec: &InlineSpec, chain: &[ChainHop]) -> Properties {
        let store = self.overlay.store();
        let mut numeric: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for hop in chain {
            if let Some(rel) = store.relationship(hop.rel) {
                for (name, value) in &rel.properties {
                    if let Some(x) = value.as_f64() {
                        numeric.entry(name.clone()).or_default().push(x);
                    }
                }
            }
        }

        let mut props: Properties = numeric
            .into_iter()
            .filter_map(|(name, values)| {
                spec.rule.fold(values).map(|x| (name, PropertyValue::Float(x)))
            })
            .collect();

        if let Some(flag) = &spec.flag {
            props.insert(flag.clone(), PropertyValue::Bool(true));
        }

        let intermediates = &chain[..chain.len().saturating_sub(1)];
        for (edge_prop, node_prop) in &spec.collect {
            let values: Vec<PropertyValue> = intermediates
                .iter()
                .filter_map(|h| store.node(h.node).and_then(|n| n.property(node_prop)))
                .cloned()
                .collect();
            props.insert(edge_prop.clone(), PropertyValue::List(values));
        }
        props
    }
}

fn dedup(edges: Vec<VEdge>) -> Vec<VEdge> {
    let mut seen = HashSet::with_capacity(edges.len());
    edges.into_iter().filter(|e| seen.insert(e.to)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeRecord, Graph};

    fn edge(from: u64, to: u64, rel: &str) -> EdgeRecord {
        EdgeRecord::new(from, to, rel)
    }

    fn targets(x: &PathExpander<'_>, edges: &[VEdge]) -> Vec<u64> {
        edges
            .iter()
            .map(|e| x.overlay().key(e.to).raw())
            .collect()
    }

    fn expander<'g>(g: &'g Graph, constraints: &str) -> PathExpander<'g> {
        let c = PathConstraints::parse(constraints).unwrap();
        PathExpander::new(VirtualGraph::new(g), c, 10)
    }

    #[test]
    fn test_default_follows_outgoing_only() {
        let mut g = Graph::new();
        g.load_edges(vec![edge(1, 2, "to"), edge(3, 1, "to")]);
        let mut x = expander(&g, "");
        let v = x.overlay_mut().resolve_by_id(1).unwrap();
        let n = x.neighbors(v, SearchDirection::Forward);
        assert_eq!(targets(&x, &n), vec![2]);
        assert_eq!(n[0].direction, Direction::Outgoing);

        let back = x.neighbors(v, SearchDirection::Backward);
        assert_eq!(targets(&x, &back), vec![3]);
    }

    #[test]
    fn test_direction_table_both_and_incoming() {
        let mut g = Graph::new();
        g.load_edges(vec![edge(1, 2, "to"), edge(3, 1, "to"), edge(4, 1, "from")]);
        let mut x = expander(&g, r#"{"direction": {"to": "both", "from": "incoming"}}"#);
        let v = x.overlay_mut().resolve_by_id(1).unwrap();
        let n = x.neighbors(v, SearchDirection::Forward);
        assert_eq!(targets(&x, &n), vec![2, 3, 4]);
        assert_eq!(n[2].direction, Direction::Incoming);
    }

    #[test]
    fn test_parallel_edges_deduplicated() {
        let mut g = Graph::new();
        g.load_edges(vec![edge(0, 1, "IMPLIES"), edge(0, 1, "SUPPORTS"), edge(0, 1, "CONTRADICTS")]);
        let mut x = expander(&g, "");
        let v = x.overlay_mut().resolve_by_id(0).unwrap();
        let n = x.neighbors(v, SearchDirection::Forward);
        assert_eq!(n.len(), 1);
        assert_eq!(n[0].rel_type, "IMPLIES");
    }

    #[test]
    fn test_isolated_vertex_has_no_neighbors() {
        let mut g = Graph::new();
        g.add_node(7, &["Lonely"], Properties::new());
        let mut x = expander(&g, "");
        let v = x.overlay_mut().resolve_by_id(7).unwrap();
        assert!(x.neighbors(v, SearchDirection::Forward).is_empty());
        assert!(x.neighbors(v, SearchDirection::Backward).is_empty());
    }

    #[test]
    fn test_node_and_edge_constraints_filter() {
        let mut g = Graph::new();
        g.add_node(1, &["Net"], Properties::new());
        g.add_node(2, &["Net"], Properties::new());
        g.add_node(3, &["Other"], Properties::new());
        g.add_node(4, &["Net"], Properties::new());
        g.load_edges(vec![
            edge(1, 2, "to").with_property("isNet", true),
            edge(1, 3, "to").with_property("isNet", true),
            edge(1, 4, "to").with_property("isNet", false),
        ]);
        let mut x = expander(
            &g,
            r#"{"labels": ["Net"],
                "propertyConstraints": [{"property": "isNet", "operator": "=", "value": true, "scope": "edge"}]}"#,
        );
        let v = x.overlay_mut().resolve_by_id(1).unwrap();
        let n = x.neighbors(v, SearchDirection::Forward);
        assert_eq!(targets(&x, &n), vec![2]);
    }

    #[test]
    fn test_goal_candidate_bypasses_node_constraint() {
        let mut g = Graph::new();
        g.add_node(1, &["Net"], Properties::new());
        g.add_node(2, &["Other"], Properties::new());
        g.load_edges(vec![edge(1, 2, "to")]);
        let mut x = expander(&g, r#"{"labels": ["Net"]}"#);
        let a = x.overlay_mut().resolve_by_id(1).unwrap();
        let b = x.overlay_mut().resolve_by_id(2).unwrap();
        assert!(x.neighbors(a, SearchDirection::Forward).is_empty());

        let t = x.overlay_mut().wrap_as_endpoint(b, EndpointRole::Target);
        let n = x.neighbors(a, SearchDirection::Forward);
        assert_eq!(n.len(), 1);
        let tail = x.neighbors(b, SearchDirection::Forward);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].to, t);
        assert!(tail[0].is_endpoint_link());
    }

    #[test]
    fn test_source_wrapper_expands_to_candidates() {
        let mut g = Graph::new();
        g.load_edges(vec![edge(1, 2, "to")]);
        let mut x = expander(&g, "");
        let a = x.overlay_mut().resolve_by_id(1).unwrap();
        let s = x.overlay_mut().wrap_as_endpoint(a, EndpointRole::Source);
        let n = x.neighbors(s, SearchDirection::Forward);
        assert_eq!(n.len(), 1);
        assert_eq!(n[0].to, a);
        assert!(x.neighbors(s, SearchDirection::Backward).is_empty());
        let back = x.neighbors(a, SearchDirection::Backward);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].to, s);
    }

    fn set_graph() -> Graph {
        // Members 1,2,3 of set 10 (via consistsOf); 2 and 3 also have "to" edges.
        let mut g = Graph::new();
        g.add_node(10, &["SetNode"], [("name".to_string(), PropertyValue::from("S"))].into_iter().collect());
        for m in [1, 2, 3, 4] {
            g.add_node(m, &["NetworkNode"], Properties::new());
        }
        g.load_edges(vec![
            edge(10, 1, "consistsOf").with_property("weight", 2.0f64),
            edge(10, 2, "consistsOf").with_property("weight", 3.0f64),
            edge(10, 3, "consistsOf").with_property("weight", 4.0f64),
            edge(2, 4, "to"),
            edge(3, 4, "to"),
        ]);
        g
    }

    #[test]
    fn test_inline_collapses_set_hub() {
        let g = set_graph();
        let mut x = expander(
            &g,
            r#"{"labels": ["NetworkNode"],
                "inline": {"type": "consistsOf", "as": "to", "flag": "isSet", "collect": {"sets": "name"}}}"#,
        );
        let one = x.overlay_mut().resolve_by_id(1).unwrap();
        let n = x.neighbors(one, SearchDirection::Forward);
        assert_eq!(targets(&x, &n), vec![2, 3]);

        let e = &n[0];
        assert_eq!(e.rel_type, "to");
        assert_eq!(e.properties.get("isSet"), Some(&PropertyValue::Bool(true)));
        assert_eq!(e.properties.get("weight"), Some(&PropertyValue::Float(5.0)));
        assert_eq!(
            e.properties.get("sets"),
            Some(&PropertyValue::List(vec![PropertyValue::from("S")]))
        );
        match &e.kind {
            EdgeKind::Inlined(chain) => {
                let nodes: Vec<u64> = chain.iter().map(|h| h.node).collect();
                assert_eq!(nodes, vec![10, 2]);
                assert_eq!(chain[0].direction, Direction::Incoming);
                assert_eq!(chain[1].direction, Direction::Outgoing);
            }
            other => panic!("expected inlined edge, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_respects_type_whitelist() {
        let g = set_graph();
        let mut x = expander(
            &g,
            r#"{"edgeTypes": ["to"], "inline": {"type": "consistsOf", "as": "to"}}"#,
        );
        let one = x.overlay_mut().resolve_by_id(1).unwrap();
        assert!(x.neighbors(one, SearchDirection::Forward).is_empty());

        let mut x = expander(
            &g,
            r#"{"edgeTypes": ["to", "consistsOf"], "inline": {"type": "consistsOf", "as": "to"}}"#,
        );
        let one = x.overlay_mut().resolve_by_id(1).unwrap();
        let n = x.neighbors(one, SearchDirection::Forward);
        assert_eq!(targets(&x, &n), vec![2, 3]);
    }

    #[test]
    fn test_aggregate_links_members() {
        let mut g = Graph::new();
        for (id, set) in [(1u64, "A"), (2, "A"), (3, "B")] {
            g.add_node(id, &["N"], Properties::new());
            g.set_node_property(id, "group", set);
        }
        let mut x = expander(&g, r#"{"aggregate": {"property": "group", "type": "inGroup"}}"#);
        let spec = x.constraints().aggregate.clone().unwrap();
        x.overlay_mut().enable_aggregates(&spec).unwrap();

        let one = x.overlay_mut().resolve_by_id(1).unwrap();
        let n = x.neighbors(one, SearchDirection::Forward);
        assert_eq!(n.len(), 1);
        assert_eq!(n[0].rel_type, "inGroup");
        let agg = n[0].to;
        assert!(x.overlay().is_aggregate(agg));

        let members = x.neighbors(agg, SearchDirection::Forward);
        let ids: Vec<Option<u64>> = members.iter().map(|e| x.overlay().real_id(e.to)).collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }
}
