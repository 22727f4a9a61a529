use serde::Serialize;

use crate::graph::{NodeId, RelId};
use crate::overlay::{EdgeKind, VEdge, VIdx, VirtualGraph};
use crate::value::Properties;

/// A single step of a path: the vertex reached and the edge used to reach it.
/// `edge` is None for the first step.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub vertex: VIdx,
    pub edge: Option<VEdge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub steps: Vec<PathStep>,
    pub cost: f64,
}

/// Caller-supplied transform applied to each accepted path before delivery.
pub type PathTransform<'a> = Box<dyn Fn(Path) -> Path + 'a>;

impl Path {
    pub fn single(vertex: VIdx) -> Self {
        Self {
            steps: vec![PathStep { vertex, edge: None }],
            cost: 0.0,
        }
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn vertices(&self) -> impl Iterator<Item = VIdx> + '_ {
        self.steps.iter().map(|s| s.vertex)
    }

    pub fn contains(&self, v: VIdx) -> bool {
        self.steps.iter().any(|s| s.vertex == v)
    }

    pub fn first(&self) -> Option<VIdx> {
        self.steps.first().map(|s| s.vertex)
    }

    pub fn last(&self) -> Option<VIdx> {
        self.steps.last().map(|s| s.vertex)
    }

    /// Drop the synthetic wrapper hops at either end, if present.
    ///
    /// Endpoint links cost nothing, so the cost carries over unchanged.
    pub fn trim_endpoints(mut self) -> Path {
        if self
            .steps
            .last()
            .and_then(|s| s.edge.as_ref())
            .is_some_and(VEdge::is_endpoint_link)
        {
            self.steps.pop();
        }
        if self
            .steps
            .get(1)
            .and_then(|s| s.edge.as_ref())
            .is_some_and(VEdge::is_endpoint_link)
        {
            self.steps.remove(0);
            if let Some(first) = self.steps.first_mut() {
                first.edge = None;
            }
        }
        self
    }

    /// The real relationships behind this path, with inlined chains expanded
    /// back into their individual hops. Synthetic links are skipped.
    pub fn real_hops(&self, overlay: &VirtualGraph<'_>) -> Vec<RealHop> {
        let mut hops = Vec::new();
        let mut prev: Option<NodeId> = None;
        for step in &self.steps {
            if let Some(edge) = &step.edge {
                match &edge.kind {
                    EdgeKind::Real(rel) => {
                        if let (Some(from), Some(to)) = (prev, overlay.real_id(step.vertex)) {
                            hops.push(RealHop { rel: *rel, from, to });
                        }
                    }
                    EdgeKind::Inlined(chain) => {
                        let mut from = prev;
                        for hop in chain {
                            if let Some(f) = from {
                                hops.push(RealHop {
                                    rel: hop.rel,
                                    from: f,
                                    to: hop.node,
                                });
                            }
                            from = Some(hop.node);
                        }
                    }
                    EdgeKind::Member | EdgeKind::Endpoint => {}
                }
            }
            prev = overlay.real_id(step.vertex);
        }
        hops
    }
}

/// One real relationship on an expanded path, in traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealHop {
    pub rel: RelId,
    pub from: NodeId,
    pub to: NodeId,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: u64,
    pub kind: &'static str,
    pub labels: Vec<String>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Serialize)]
pub struct HopView {
    pub rel_id: RelId,
    pub direction: &'static str,
    pub node: NodeId,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeView {
    pub source: u64,
    pub target: u64,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub direction: &'static str,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inlined: Option<Vec<HopView>>,
}

/// Serializable form of a path, as handed to listeners.
#[derive(Debug, Clone, Serialize)]
pub struct PathRecord {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    pub cost: f64,
    pub length: usize,
}

impl NodeView {
    pub fn of(overlay: &VirtualGraph<'_>, v: VIdx) -> Self {
        let view = overlay.view(v);
        Self {
            id: view.key.raw(),
            kind: view.key.kind(),
            labels: view.labels.into_owned(),
            properties: view.properties.into_owned(),
        }
    }
}

impl EdgeView {
    pub fn of(overlay: &VirtualGraph<'_>, edge: &VEdge) -> Self {
        let inlined = match &edge.kind {
            EdgeKind::Inlined(chain) => Some(
                chain
                    .iter()
                    .map(|h| HopView {
                        rel_id: h.rel,
                        direction: h.direction.as_str(),
                        node: h.node,
                    })
                    .collect(),
            ),
            _ => None,
        };
        Self {
            source: overlay.key(edge.from).raw(),
            target: overlay.key(edge.to).raw(),
            rel_type: edge.rel_type.clone(),
            direction: edge.direction.as_str(),
            properties: overlay.edge_properties(edge).clone(),
            inlined,
        }
    }
}

impl PathRecord {
    pub fn of(overlay: &VirtualGraph<'_>, path: &Path) -> Self {
        Self {
            nodes: path.vertices().map(|v| NodeView::of(overlay, v)).collect(),
            edges: path
                .steps
                .iter()
                .filter_map(|s| s.edge.as_ref())
                .map(|e| EdgeView::of(overlay, e))
                .collect(),
            cost: path.cost,
            length: path.len(),
        }
    }
}
