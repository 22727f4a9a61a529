//! Request entry points.
//!
//! Each call builds its own overlay, expander and engines over a borrowed,
//! read-only store and drops them on return. Errors are logged and folded
//! into the returned status; nothing escapes to the caller.

use serde::{Deserialize, Serialize};

use crate::config::{Settings, MAX_DEPTH_LIMIT};
use crate::constraint::PathConstraints;
use crate::cost::CostEvaluator;
use crate::error::{EndpointRole, KPathsError, Result};
use crate::expander::{PathExpander, SearchDirection};
use crate::graph::{GraphStore, NodeId};
use crate::incremental::{deliver, CostOrderedSearch, PathListener};
use crate::overlay::{VIdx, VirtualGraph};
use crate::path::{EdgeView, NodeView, Path};
use crate::traversal::DeviationSearch;

/// Per-request parameters. Unset fields fall back to [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    /// Correlates log events of one request.
    pub request_id: Option<String>,
    pub source: Option<NodeId>,
    /// Resolved through the `end` (or node) constraint when unset.
    pub target: Option<NodeId>,
    pub k: Option<usize>,
    pub min_length: Option<usize>,
    pub max_depth: Option<usize>,
    /// Contains `shortestPath`, `dijkstra`, or both.
    pub algorithm: Option<String>,
    /// Edge property holding the cost. Unset means every edge costs the default.
    pub cost_function: Option<String>,
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Engines {
    deviation: bool,
    cost_ordered: bool,
}

impl Engines {
    fn select(algorithm: Option<&str>) -> Self {
        let algorithm = algorithm.unwrap_or("shortestPath");
        let deviation = algorithm.contains("shortestPath");
        let cost_ordered = algorithm.contains("dijkstra");
        Self {
            deviation: deviation || !cost_ordered,
            cost_ordered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Complete,
    /// The listener went away; not a failure.
    Aborted,
    EndpointNotFound,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub delivered: usize,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Find up to `k` paths and push each to `listener` as soon as it is found.
pub fn run_query(
    store: &dyn GraphStore,
    settings: &Settings,
    params: &QueryParams,
    constraints: &str,
    listener: &mut dyn PathListener,
) -> QueryOutcome {
    let span = tracing::info_span!(
        "kpaths_request",
        id = params.request_id.as_deref().unwrap_or("-")
    );
    let _enter = span.enter();
    tracing::info!(
        source = ?params.source,
        target = ?params.target,
        k = ?params.k,
        algorithm = params.algorithm.as_deref().unwrap_or("shortestPath"),
        "k-shortest-paths request"
    );

    let mut delivered = 0;
    match execute(store, settings, params, constraints, listener, &mut delivered) {
        Ok(()) => {
            tracing::info!(delivered, "request complete");
            QueryOutcome {
                delivered,
                status: QueryStatus::Complete,
                message: None,
            }
        }
        Err(KPathsError::ConsumerGone) => {
            tracing::info!(delivered, "consumer gone, request aborted");
            QueryOutcome {
                delivered,
                status: QueryStatus::Aborted,
                message: None,
            }
        }
        Err(e @ KPathsError::EndpointNotFound { .. }) => {
            tracing::warn!(error = %e, "endpoint not found");
            QueryOutcome {
                delivered,
                status: QueryStatus::EndpointNotFound,
                message: Some(e.to_string()),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, delivered, "request failed");
            QueryOutcome {
                delivered,
                status: QueryStatus::Failed,
                message: Some(e.to_string()),
            }
        }
    }
}

fn execute(
    store: &dyn GraphStore,
    settings: &Settings,
    params: &QueryParams,
    constraints: &str,
    listener: &mut dyn PathListener,
    delivered: &mut usize,
) -> Result<()> {
    let constraints = PathConstraints::parse(constraints)?;

    let mut k = params.k.unwrap_or(1);
    if k == 0 {
        return Err(KPathsError::InvalidRequest("k must be at least 1".into()));
    }
    if k > settings.max_k {
        tracing::warn!(requested = k, max_k = settings.max_k, "k clamped");
        k = settings.max_k;
    }
    let max_depth = params
        .max_depth
        .unwrap_or(settings.default_max_depth)
        .min(MAX_DEPTH_LIMIT);
    // Room for the two wrapper hops
    let max_hops = max_depth + 2;
    let min_length = params.min_length.unwrap_or(0);
    let engines = Engines::select(params.algorithm.as_deref());

    let cost = CostEvaluator::new(params.cost_function.clone(), settings.default_cost);

    let mut expander = build_expander(store, constraints, max_depth)?;
    expander.set_debug(params.debug.unwrap_or(settings.debug));

    let source = resolve_endpoint(&mut expander, params.source, EndpointRole::Source)?;
    let target = resolve_endpoint(&mut expander, params.target, EndpointRole::Target)?;

    if engines.deviation {
        tracing::debug!(k, max_depth, min_length, "running deviation search");
        let mut search = DeviationSearch::new(&mut expander, &cost, source, target, k, max_hops)
            .with_min_length(min_length)
            .with_transform(Box::new(Path::trim_endpoints));
        deliver(&mut search, listener, delivered)?;
    }
    if engines.cost_ordered {
        tracing::debug!(k, max_depth, min_length, "running cost-ordered search");
        let mut search = CostOrderedSearch::new(&mut expander, &cost, source, target, k, max_hops)
            .with_min_length(min_length)
            .with_transform(Box::new(Path::trim_endpoints));
        deliver(&mut search, listener, delivered)?;
    }
    Ok(())
}

fn build_expander(
    store: &dyn GraphStore,
    constraints: PathConstraints,
    max_chain: usize,
) -> Result<PathExpander<'_>> {
    let aggregate = constraints.aggregate.clone();
    let mut expander = PathExpander::new(VirtualGraph::new(store), constraints, max_chain);
    if let Some(spec) = aggregate {
        expander.overlay_mut().enable_aggregates(&spec)?;
    }
    Ok(expander)
}

/// Wrap an explicit id, or the nodes matching the role's constraint, as an
/// endpoint. Either way an empty candidate set is `EndpointNotFound`.
fn resolve_endpoint(
    expander: &mut PathExpander<'_>,
    id: Option<NodeId>,
    role: EndpointRole,
) -> Result<VIdx> {
    match id {
        Some(id) => {
            let v = expander
                .overlay_mut()
                .resolve_by_id(id)
                .ok_or_else(|| KPathsError::EndpointNotFound {
                    role,
                    detail: format!("no node with id {}", id),
                })?;
            Ok(expander.overlay_mut().wrap_as_endpoint(v, role))
        }
        None => {
            let constraint = match role {
                EndpointRole::Source => expander.constraints().start_constraint().clone(),
                EndpointRole::Target => expander.constraints().end_constraint().clone(),
            };
            let overlay = expander.overlay_mut();
            let candidates = overlay.resolve_by_constraint(&constraint, role);
            let w = overlay.wrap_candidates(candidates, role);
            if overlay.endpoint_members(w).is_empty() {
                return Err(KPathsError::EndpointNotFound {
                    role,
                    detail: format!(
                        "no node matches {}",
                        constraint.to_query_fragment("n").to_cypher()
                    ),
                });
            }
            Ok(w)
        }
    }
}

/// One neighbour of a node together with the edge that reaches it.
#[derive(Debug, Clone, Serialize)]
pub struct NeighborRecord {
    #[serde(flatten)]
    pub node: NodeView,
    #[serde(rename = "_edge")]
    pub edge: EdgeView,
}

/// One-hop expansion of `node` under `constraints`, in expansion order.
pub fn neighbors_of(
    store: &dyn GraphStore,
    node: NodeId,
    constraints: &str,
    debug: bool,
) -> Result<Vec<NeighborRecord>> {
    let constraints = PathConstraints::parse(constraints)?;
    let mut expander = build_expander(store, constraints, MAX_DEPTH_LIMIT)?;
    expander.set_debug(debug);
    let v = expander
        .overlay_mut()
        .resolve_by_id(node)
        .ok_or_else(|| KPathsError::EndpointNotFound {
            role: EndpointRole::Source,
            detail: format!("no node with id {}", node),
        })?;
    let edges = expander.neighbors(v, SearchDirection::Forward);
    let overlay = expander.overlay();
    Ok(edges
        .iter()
        .map(|e| NeighborRecord {
            node: NodeView::of(overlay, e.to),
            edge: EdgeView::of(overlay, e),
        })
        .collect())
}

/// Nodes matching the start constraint (or the node constraint), in store order.
pub fn find_nodes(store: &dyn GraphStore, constraints: &str) -> Result<Vec<NodeView>> {
    let constraints = PathConstraints::parse(constraints)?;
    let mut overlay = VirtualGraph::new(store);
    let ids: Vec<NodeId> = overlay
        .resolve_by_constraint(constraints.start_constraint(), EndpointRole::Source)
        .collect();
    let vertices: Vec<VIdx> = ids
        .into_iter()
        .filter_map(|id| overlay.resolve_by_id(id))
        .collect();
    Ok(vertices.iter().map(|&v| NodeView::of(&overlay, v)).collect())
}
