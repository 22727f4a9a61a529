use std::collections::{BTreeMap, HashMap};

use crate::constraint::QueryFragment;
use crate::value::{Properties, PropertyValue};

/// Storage-level node identifier.
pub type NodeId = u64;

/// Storage-level relationship identifier.
pub type RelId = u64;

/// Interned relationship type index (avoids storing duplicate strings per edge).
pub type RelTypeId = u16;

/// Maximum number of distinct relationship types (u16 index space).
pub const MAX_REL_TYPES: usize = u16::MAX as usize;

/// Direction a relationship is traversed relative to its stored orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Followed from its `from` node to its `to` node.
    Outgoing,
    /// Followed from its `to` node back to its `from` node.
    Incoming,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

/// Labels and properties of a stored node.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub labels: Vec<String>,
    pub properties: Properties,
}

impl NodeInfo {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }
}

/// A stored, directed, typed relationship.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub id: RelId,
    pub from: NodeId,
    pub to: NodeId,
    pub rel_type: RelTypeId,
    pub properties: Properties,
}

impl Relationship {
    /// The endpoint opposite `node` when traversed in `dir`.
    pub fn other(&self, dir: Direction) -> NodeId {
        match dir {
            Direction::Outgoing => self.to,
            Direction::Incoming => self.from,
        }
    }
}

/// A relationship as handed to the bulk loader.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub from_id: NodeId,
    pub to_id: NodeId,
    pub rel_type: String,
    pub properties: Properties,
}

impl EdgeRecord {
    pub fn new(from_id: NodeId, to_id: NodeId, rel_type: &str) -> Self {
        Self {
            from_id,
            to_id,
            rel_type: rel_type.to_string(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

/// Read-only storage contract consumed by the path engine.
///
/// The engine never writes through this trait. Implementations are expected
/// to hand back iterators that borrow the store for the duration of one
/// request.
pub trait GraphStore {
    fn node(&self, id: NodeId) -> Option<&NodeInfo>;

    fn relationship(&self, id: RelId) -> Option<&Relationship>;

    /// Relationships touching `node`: `Outgoing` yields those stored with
    /// `from == node`, `Incoming` those with `to == node`.
    fn relationships<'a>(
        &'a self,
        node: NodeId,
        dir: Direction,
    ) -> Box<dyn Iterator<Item = &'a Relationship> + 'a>;

    fn rel_type_id(&self, name: &str) -> Option<RelTypeId>;

    fn rel_type_name(&self, id: RelTypeId) -> Option<&str>;

    /// Evaluate a declarative node query. The sequence is lazy and forward-only.
    fn query<'a>(&'a self, fragment: QueryFragment) -> Box<dyn Iterator<Item = NodeId> + 'a>;
}

/// In-memory property graph: adjacency lists + node metadata + relationship type interning.
///
/// Relationships are indexed bidirectionally: `outgoing[a]` lists relationships
/// from a, `incoming[b]` lists relationships into b. Both are populated on load.
pub struct Graph {
    nodes: BTreeMap<NodeId, NodeInfo>,
    relationships: Vec<Relationship>,
    outgoing: HashMap<NodeId, Vec<RelId>>,
    incoming: HashMap<NodeId, Vec<RelId>>,
    rel_types: Vec<String>,
    rel_type_map: HashMap<String, RelTypeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            relationships: Vec::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            rel_types: Vec::new(),
            rel_type_map: HashMap::new(),
        }
    }

    /// Pre-allocate for a known graph size.
    pub fn with_capacity(node_count: usize, edge_count: usize) -> Self {
        Self {
            nodes: BTreeMap::new(),
            relationships: Vec::with_capacity(edge_count),
            outgoing: HashMap::with_capacity(node_count),
            incoming: HashMap::with_capacity(node_count),
            rel_types: Vec::new(),
            rel_type_map: HashMap::new(),
        }
    }

    /// Intern a relationship type string, returning its compact ID.
    ///
    /// Panics if more than `MAX_REL_TYPES` distinct types are interned.
    pub fn intern_rel_type(&mut self, rel_type: &str) -> RelTypeId {
        if let Some(&id) = self.rel_type_map.get(rel_type) {
            return id;
        }
        assert!(
            self.rel_types.len() < MAX_REL_TYPES,
            "relationship type count exceeded maximum of {}",
            MAX_REL_TYPES
        );
        let id = self.rel_types.len() as RelTypeId;
        self.rel_types.push(rel_type.to_string());
        self.rel_type_map.insert(rel_type.to_string(), id);
        id
    }

    /// Register a node, replacing any previous labels and properties.
    pub fn add_node(&mut self, id: NodeId, labels: &[&str], properties: Properties) {
        self.nodes.insert(
            id,
            NodeInfo {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                properties,
            },
        );
    }

    /// Set a single node property, creating an unlabeled node if needed.
    pub fn set_node_property(&mut self, id: NodeId, name: &str, value: impl Into<PropertyValue>) {
        self.nodes
            .entry(id)
            .or_default()
            .properties
            .insert(name.to_string(), value.into());
    }

    /// Add a directed relationship. Both endpoints are created (unlabeled) if missing.
    pub fn add_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        rel_type: RelTypeId,
        properties: Properties,
    ) -> RelId {
        self.nodes.entry(from).or_default();
        self.nodes.entry(to).or_default();

        let id = self.relationships.len() as RelId;
        self.relationships.push(Relationship {
            id,
            from,
            to,
            rel_type,
            properties,
        });
        self.outgoing.entry(from).or_default().push(id);
        self.incoming.entry(to).or_default().push(id);
        id
    }

    /// Bulk load relationships.
    pub fn load_edges<I>(&mut self, edges: I)
    where
        I: IntoIterator<Item = EdgeRecord>,
    {
        for rec in edges {
            let rt = self.intern_rel_type(&rec.rel_type);
            self.add_relationship(rec.from_id, rec.to_id, rt, rec.properties);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.relationships.len()
    }

    /// Approximate memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        use std::mem::size_of;

        let nodes_mem = self.nodes.len() * (size_of::<NodeId>() + size_of::<NodeInfo>() + 40);
        let rels_mem = self.relationships.len() * size_of::<Relationship>();
        let adj: usize = self
            .outgoing
            .values()
            .chain(self.incoming.values())
            .map(|v| v.len() * size_of::<RelId>())
            .sum();

        nodes_mem + rels_mem + adj
    }

    fn adjacency(&self, node: NodeId, dir: Direction) -> &[RelId] {
        let map = match dir {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        map.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for Graph {
    fn node(&self, id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&id)
    }

    fn relationship(&self, id: RelId) -> Option<&Relationship> {
        self.relationships.get(id as usize)
    }

    fn relationships<'a>(
        &'a self,
        node: NodeId,
        dir: Direction,
    ) -> Box<dyn Iterator<Item = &'a Relationship> + 'a> {
        Box::new(
            self.adjacency(node, dir)
                .iter()
                .filter_map(move |&id| self.relationships.get(id as usize)),
        )
    }

    fn rel_type_id(&self, name: &str) -> Option<RelTypeId> {
        self.rel_type_map.get(name).copied()
    }

    fn rel_type_name(&self, id: RelTypeId) -> Option<&str> {
        self.rel_types.get(id as usize).map(|s| s.as_str())
    }

    fn query<'a>(&'a self, fragment: QueryFragment) -> Box<dyn Iterator<Item = NodeId> + 'a> {
        Box::new(
            self.nodes
                .iter()
                .filter(move |(_, info)| fragment.matches(info))
                .map(|(&id, _)| id),
        )
    }
}
