//! kpaths-core: constraint-driven K-shortest simple paths.
//!
//! A pure Rust library that lays a virtual graph overlay (endpoint wrappers,
//! aggregate vertices, inlined chains) over a read-only property graph and
//! enumerates the K best simple paths between two endpoints, streaming each
//! path to a listener as soon as it is found.
//!
//! Two engines share one expansion step: a Yen-style deviation search
//! ([`DeviationSearch`]) and a cost-ordered incremental search
//! ([`CostOrderedSearch`]). [`run_query`] wires them to a request.

mod config;
mod constraint;
mod cost;
mod error;
mod expander;
mod graph;
mod incremental;
mod overlay;
mod path;
mod query;
mod traversal;
mod value;

pub use config::Settings;
pub use constraint::{
    AggregateSpec, Candidate, Constraint, DirectionPolicy, DirectionTable, InlineSpec, MergeRule,
    NodeConstraint, Operator, PathConstraints, PropertyPredicate, QueryFragment,
};
pub use cost::CostEvaluator;
pub use error::{EndpointRole, KPathsError, Result};
pub use expander::{PathExpander, SearchDirection};
pub use graph::{
    Direction, EdgeRecord, Graph, GraphStore, NodeId, NodeInfo, RelId, RelTypeId, Relationship,
    MAX_REL_TYPES,
};
pub use incremental::{deliver, CostOrderedSearch, PathListener, PathSource};
pub use overlay::{ChainHop, EdgeKind, VEdge, VIdx, VertexKey, VertexView, VirtualGraph};
pub use path::{EdgeView, HopView, NodeView, Path, PathRecord, PathStep, PathTransform, RealHop};
pub use query::{find_nodes, neighbors_of, run_query, NeighborRecord, QueryOutcome, QueryParams, QueryStatus};
pub use traversal::{k_shortest_paths, shortest_path_excluding, DeviationSearch};
pub use value::{Properties, PropertyValue};
