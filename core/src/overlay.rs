//! Virtual graph overlay over a [`GraphStore`].
//!
//! Real nodes and synthesized vertices (endpoint wrappers, aggregate
//! vertices) live side by side in one arena and are addressed by [`VIdx`].
//! Path algorithms only ever see arena indices.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::constraint::{AggregateSpec, NodeConstraint, PropertyPredicate, Operator};
use crate::error::{EndpointRole, Result};
use crate::graph::{Direction, GraphStore, NodeId, NodeInfo, RelId};
use crate::value::{Properties, PropertyValue};

/// Arena index of a vertex in the overlay.
pub type VIdx = u32;

const TAG_SHIFT: u32 = 62;
const PAYLOAD_MASK: u64 = (1 << TAG_SHIFT) - 1;

/// External identity of an overlay vertex.
///
/// Each kind owns a disjoint numeric namespace; [`VertexKey::raw`] packs the
/// kind into the top two bits so raw identities never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexKey {
    Real(NodeId),
    Source(u32),
    Target(u32),
    Aggregate(u32),
}

impl VertexKey {
    pub fn raw(self) -> u64 {
        match self {
            VertexKey::Real(id) => id & PAYLOAD_MASK,
            VertexKey::Source(seq) => (1 << TAG_SHIFT) | seq as u64,
            VertexKey::Target(seq) => (2 << TAG_SHIFT) | seq as u64,
            VertexKey::Aggregate(seq) => (3 << TAG_SHIFT) | seq as u64,
        }
    }

    pub fn from_raw(raw: u64) -> Self {
        let payload = raw & PAYLOAD_MASK;
        match raw >> TAG_SHIFT {
            0 => VertexKey::Real(payload),
            1 => VertexKey::Source(payload as u32),
            2 => VertexKey::Target(payload as u32),
            _ => VertexKey::Aggregate(payload as u32),
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            VertexKey::Real(_) => "real",
            VertexKey::Source(_) => "source",
            VertexKey::Target(_) => "target",
            VertexKey::Aggregate(_) => "aggregate",
        }
    }
}

/// One real hop inside an inlined chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainHop {
    pub rel: RelId,
    pub direction: Direction,
    /// Node reached by this hop.
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EdgeKind {
    Real(RelId),
    /// A collapsed chain of real relationships.
    Inlined(Vec<ChainHop>),
    /// Aggregate vertex <-> one of its members.
    Member,
    /// Endpoint wrapper <-> one of its candidates.
    Endpoint,
}

/// An edge of the overlay, oriented the way the search traversed it.
#[derive(Debug, Clone, PartialEq)]
pub struct VEdge {
    pub from: VIdx,
    pub to: VIdx,
    pub rel_type: String,
    /// Traversal direction relative to the stored orientation.
    pub direction: Direction,
    /// Materialized properties of virtual edges. Empty for real edges, whose
    /// properties are read through the store.
    pub properties: Properties,
    pub kind: EdgeKind,
}

impl VEdge {
    pub fn is_endpoint_link(&self) -> bool {
        self.kind == EdgeKind::Endpoint
    }
}

enum Candidates<'g> {
    Pending(Box<dyn Iterator<Item = NodeId> + 'g>),
    Ready {
        members: Vec<VIdx>,
        index: HashSet<VIdx>,
    },
}

enum Slot<'g> {
    Real(NodeId),
    Endpoint {
        role: EndpointRole,
        seq: u32,
        candidates: Candidates<'g>,
    },
    Aggregate {
        seq: u32,
        info: NodeInfo,
        members: Vec<VIdx>,
    },
}

/// Read-only view of a vertex: labels and properties, borrowed for real
/// nodes and materialized for synthesized ones.
#[derive(Debug, Clone)]
pub struct VertexView<'a> {
    pub key: VertexKey,
    pub labels: Cow<'a, [String]>,
    pub properties: Cow<'a, Properties>,
}

pub struct VirtualGraph<'g> {
    store: &'g dyn GraphStore,
    slots: Vec<Slot<'g>>,
    real_index: HashMap<NodeId, VIdx>,
    /// (role, wrapped vertex) -> wrapper
    wrapped: HashMap<(EndpointRole, VIdx), VIdx>,
    endpoints: Vec<VIdx>,
    /// real member -> aggregates it belongs to
    member_of: HashMap<VIdx, Vec<VIdx>>,
    aggregate_type: Option<String>,
    next_source: u32,
    next_target: u32,
}

impl<'g> VirtualGraph<'g> {
    pub fn new(store: &'g dyn GraphStore) -> Self {
        Self {
            store,
            slots: Vec::new(),
            real_index: HashMap::new(),
            wrapped: HashMap::new(),
            endpoints: Vec::new(),
            member_of: HashMap::new(),
            aggregate_type: None,
            next_source: 0,
            next_target: 0,
        }
    }

    pub fn store(&self) -> &'g dyn GraphStore {
        self.store
    }

    pub fn vertex_count(&self) -> usize {
        self.slots.len()
    }

    /// Arena index for a stored node, allocating on first sight.
    pub(crate) fn intern_real(&mut self, id: NodeId) -> VIdx {
        if let Some(&v) = self.real_index.get(&id) {
            return v;
        }
        let v = self.slots.len() as VIdx;
        self.slots.push(Slot::Real(id));
        self.real_index.insert(id, v);
        v
    }

    /// Resolve a storage identity. None when the node does not exist or the
    /// id falls outside the real namespace.
    pub fn resolve_by_id(&mut self, id: NodeId) -> Option<VIdx> {
        if id > PAYLOAD_MASK {
            return None;
        }
        self.store.node(id)?;
        Some(self.intern_real(id))
    }

    /// Lazily look up nodes matching `constraint` through the store's
    /// declarative query. The sequence is forward-only and not restartable.
    pub fn resolve_by_constraint(
        &self,
        constraint: &NodeConstraint,
        role: EndpointRole,
    ) -> Box<dyn Iterator<Item = NodeId> + 'g> {
        let fragment = constraint.to_query_fragment("n");
        tracing::debug!(%role, query = %fragment.to_cypher(), "resolving endpoint by constraint");
        self.store.query(fragment)
    }

    /// Wrap a single vertex as the logical source or target. Wrapping a
    /// wrapper of the same role, or a vertex wrapped before, returns the
    /// existing wrapper.
    pub fn wrap_as_endpoint(&mut self, v: VIdx, role: EndpointRole) -> VIdx {
        if let Some(Slot::Endpoint { role: r, .. }) = self.slots.get(v as usize) {
            if *r == role {
                return v;
            }
        }
        if let Some(&w) = self.wrapped.get(&(role, v)) {
            return w;
        }
        let w = self.push_endpoint(
            role,
            Candidates::Ready {
                members: vec![v],
                index: HashSet::from([v]),
            },
        );
        self.wrapped.insert((role, v), w);
        w
    }

    /// Wrap a lazy candidate sequence (typically from
    /// [`resolve_by_constraint`](Self::resolve_by_constraint)). The sequence
    /// is drained the first time the wrapper's members are needed.
    pub fn wrap_candidates(
        &mut self,
        candidates: Box<dyn Iterator<Item = NodeId> + 'g>,
        role: EndpointRole,
    ) -> VIdx {
        self.push_endpoint(role, Candidates::Pending(candidates))
    }

    fn push_endpoint(&mut self, role: EndpointRole, candidates: Candidates<'g>) -> VIdx {
        let seq = match role {
            EndpointRole::Source => {
                self.next_source += 1;
                self.next_source - 1
            }
            EndpointRole::Target => {
                self.next_target += 1;
                self.next_target - 1
            }
        };
        let w = self.slots.len() as VIdx;
        self.slots.push(Slot::Endpoint {
            role,
            seq,
            candidates,
        });
        self.endpoints.push(w);
        w
    }

    fn materialize(&mut self, w: VIdx) {
        let pending = match self.slots.get_mut(w as usize) {
            Some(Slot::Endpoint { candidates, .. })
                if matches!(candidates, Candidates::Pending(_)) =>
            {
                std::mem::replace(
                    candidates,
                    Candidates::Ready {
                        members: Vec::new(),
                        index: HashSet::new(),
                    },
                )
            }
            _ => return,
        };
        let Candidates::Pending(iter) = pending else {
            return;
        };
        let mut members = Vec::new();
        let mut index = HashSet::new();
        for id in iter {
            let v = self.intern_real(id);
            if index.insert(v) {
                members.push(v);
            }
        }
        tracing::debug!(wrapper = w, candidates = members.len(), "materialized endpoint");
        if let Some(Slot::Endpoint { candidates, .. }) = self.slots.get_mut(w as usize) {
            *candidates = Candidates::Ready { members, index };
        }
    }

    /// Candidates of an endpoint wrapper, in resolution order. Empty for
    /// anything that is not a wrapper.
    pub fn endpoint_members(&mut self, w: VIdx) -> Vec<VIdx> {
        self.materialize(w);
        match self.slots.get(w as usize) {
            Some(Slot::Endpoint {
                candidates: Candidates::Ready { members, .. },
                ..
            }) => members.clone(),
            _ => Vec::new(),
        }
    }

    /// Wrappers of `role` that count `v` among their candidates.
    pub fn wrappers_containing(&mut self, v: VIdx, role: EndpointRole) -> Vec<VIdx> {
        let mut found = Vec::new();
        for w in self.endpoints.clone() {
            if self.endpoint_role(w) != Some(role) {
                continue;
            }
            self.materialize(w);
            if let Some(Slot::Endpoint {
                candidates: Candidates::Ready { index, .. },
                ..
            }) = self.slots.get(w as usize)
            {
                if index.contains(&v) {
                    found.push(w);
                }
            }
        }
        found
    }

    pub fn endpoint_role(&self, v: VIdx) -> Option<EndpointRole> {
        match self.slots.get(v as usize) {
            Some(Slot::Endpoint { role, .. }) => Some(*role),
            _ => None,
        }
    }

    /// Build one aggregate vertex per distinct value of `spec.property`,
    /// in sorted value order. List-valued properties join every group they list.
    pub fn enable_aggregates(&mut self, spec: &AggregateSpec) -> Result<usize> {
        let exists = NodeConstraint {
            labels: Vec::new(),
            predicates: vec![PropertyPredicate::new(
                &spec.property,
                Operator::Exists,
                PropertyValue::Null,
            )?],
        };
        let mut groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for id in self.store.query(exists.to_query_fragment("n")) {
            let Some(value) = self.store.node(id).and_then(|n| n.property(&spec.property)) else {
                continue;
            };
            for key in value.group_keys() {
                groups.entry(key).or_default().push(id);
            }
        }

        let count = groups.len();
        for (seq, (value, ids)) in groups.into_iter().enumerate() {
            let members: Vec<VIdx> = ids.into_iter().map(|id| self.intern_real(id)).collect();
            let agg = self.slots.len() as VIdx;
            for &m in &members {
                self.member_of.entry(m).or_default().push(agg);
            }
            let mut properties = Properties::new();
            properties.insert(spec.property.clone(), PropertyValue::String(value));
            properties.insert("members".to_string(), PropertyValue::Int(members.len() as i64));
            self.slots.push(Slot::Aggregate {
                seq: seq as u32,
                info: NodeInfo {
                    labels: vec!["_Aggregate".to_string()],
                    properties,
                },
                members,
            });
        }
        self.aggregate_type = Some(spec.rel_type.clone());
        tracing::debug!(property = %spec.property, groups = count, "built aggregate vertices");
        Ok(count)
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.aggregate_type.as_deref()
    }

    /// Members of an aggregate vertex. Empty for any other vertex.
    pub fn aggregate_members_of(&self, v: VIdx) -> &[VIdx] {
        match self.slots.get(v as usize) {
            Some(Slot::Aggregate { members, .. }) => members,
            _ => &[],
        }
    }

    /// Aggregate vertices a real vertex belongs to.
    pub fn aggregates_of(&self, v: VIdx) -> &[VIdx] {
        self.member_of.get(&v).map(|a| a.as_slice()).unwrap_or(&[])
    }

    pub fn is_aggregate(&self, v: VIdx) -> bool {
        matches!(self.slots.get(v as usize), Some(Slot::Aggregate { .. }))
    }

    pub fn real_id(&self, v: VIdx) -> Option<NodeId> {
        match self.slots.get(v as usize) {
            Some(Slot::Real(id)) => Some(*id),
            _ => None,
        }
    }

    /// Labels and properties as constraints see them. None for wrappers.
    pub fn node_info(&self, v: VIdx) -> Option<&NodeInfo> {
        match self.slots.get(v as usize)? {
            Slot::Real(id) => self.store.node(*id),
            Slot::Aggregate { info, .. } => Some(info),
            Slot::Endpoint { .. } => None,
        }
    }

    pub fn key(&self, v: VIdx) -> VertexKey {
        match &self.slots[v as usize] {
            Slot::Real(id) => VertexKey::Real(*id),
            Slot::Endpoint {
                role: EndpointRole::Source,
                seq,
                ..
            } => VertexKey::Source(*seq),
            Slot::Endpoint {
                role: EndpointRole::Target,
                seq,
                ..
            } => VertexKey::Target(*seq),
            Slot::Aggregate { seq, .. } => VertexKey::Aggregate(*seq),
        }
    }

    pub fn view(&self, v: VIdx) -> VertexView<'_> {
        let key = self.key(v);
        match self.node_info(v) {
            Some(info) => VertexView {
                key,
                labels: Cow::Borrowed(info.labels.as_slice()),
                properties: Cow::Borrowed(&info.properties),
            },
            None => VertexView {
                key,
                labels: Cow::Owned(Vec::new()),
                properties: Cow::Owned(Properties::new()),
            },
        }
    }

    /// Properties of an overlay edge: read through for real edges,
    /// materialized for virtual ones.
    pub fn edge_properties<'a>(&'a self, edge: &'a VEdge) -> &'a Properties {
        match edge.kind {
            EdgeKind::Real(rel) => self
                .store
                .relationship(rel)
                .map(|r| &r.properties)
                .unwrap_or(&edge.properties),
            _ => &edge.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeRecord, Graph};

    fn fixture() -> Graph {
        let mut g = Graph::new();
        g.add_node(1, &["Gene"], Properties::new());
        g.add_node(2, &["Gene"], Properties::new());
        g.add_node(3, &["Drug"], Properties::new());
        g.set_node_property(1, "sets", PropertyValue::List(vec!["S".into(), "T".into()]));
        g.set_node_property(2, "sets", PropertyValue::List(vec!["S".into()]));
        g.load_edges(vec![EdgeRecord::new(1, 2, "to")]);
        g
    }

    #[test]
    fn test_vertex_key_namespaces_disjoint() {
        let keys = [
            VertexKey::Real(7),
            VertexKey::Source(7),
            VertexKey::Target(7),
            VertexKey::Aggregate(7),
        ];
        let raws: HashSet<u64> = keys.iter().map(|k| k.raw()).collect();
        assert_eq!(raws.len(), 4);
        for k in keys {
            assert_eq!(VertexKey::from_raw(k.raw()), k);
        }
    }

    #[test]
    fn test_resolve_by_id() {
        let g = fixture();
        let mut vg = VirtualGraph::new(&g);
        let a = vg.resolve_by_id(1).unwrap();
        assert_eq!(vg.resolve_by_id(1), Some(a));
        assert_eq!(vg.real_id(a), Some(1));
        assert!(vg.resolve_by_id(99).is_none());
        assert!(vg.resolve_by_id(1 << 62).is_none());
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let g = fixture();
        let mut vg = VirtualGraph::new(&g);
        let a = vg.resolve_by_id(1).unwrap();
        let s = vg.wrap_as_endpoint(a, EndpointRole::Source);
        assert_eq!(vg.wrap_as_endpoint(a, EndpointRole::Source), s);
        assert_eq!(vg.wrap_as_endpoint(s, EndpointRole::Source), s);
        let t = vg.wrap_as_endpoint(a, EndpointRole::Target);
        assert_ne!(s, t);
        assert_eq!(vg.key(s), VertexKey::Source(0));
        assert_eq!(vg.key(t), VertexKey::Target(0));
        assert_eq!(vg.endpoint_members(s), vec![a]);
    }

    #[test]
    fn test_wrap_candidates_materializes_lazily() {
        let g = fixture();
        let mut vg = VirtualGraph::new(&g);
        let genes = NodeConstraint {
            labels: vec!["Gene".into()],
            predicates: Vec::new(),
        };
        let iter = vg.resolve_by_constraint(&genes, EndpointRole::Target);
        let t = vg.wrap_candidates(iter, EndpointRole::Target);
        // Nothing interned until the wrapper is looked at
        assert_eq!(vg.vertex_count(), 1);
        let members = vg.endpoint_members(t);
        let ids: Vec<NodeId> = members.iter().filter_map(|&m| vg.real_id(m)).collect();
        assert_eq!(ids, vec![1, 2]);
        let two = vg.resolve_by_id(2).unwrap();
        assert_eq!(vg.wrappers_containing(two, EndpointRole::Target), vec![t]);
        assert!(vg.wrappers_containing(two, EndpointRole::Source).is_empty());
    }

    #[test]
    fn test_aggregates_group_by_value() {
        let g = fixture();
        let mut vg = VirtualGraph::new(&g);
        let n = vg
            .enable_aggregates(&AggregateSpec {
                property: "sets".into(),
                rel_type: "_aggregate".into(),
            })
            .unwrap();
        assert_eq!(n, 2);
        let one = vg.resolve_by_id(1).unwrap();
        let two = vg.resolve_by_id(2).unwrap();
        let aggs = vg.aggregates_of(one).to_vec();
        assert_eq!(aggs.len(), 2);
        let s = aggs[0];
        assert_eq!(vg.key(s), VertexKey::Aggregate(0));
        assert_eq!(vg.aggregate_members_of(s), &[one, two]);
        assert_eq!(
            vg.view(s).properties.get("sets"),
            Some(&PropertyValue::String("S".into()))
        );
        assert!(vg.aggregate_members_of(one).is_empty());
    }
}
