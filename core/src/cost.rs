use crate::error::{KPathsError, Result};
use crate::overlay::{EdgeKind, VEdge, VirtualGraph};
use crate::value::{Properties, PropertyValue};

/// Maps an overlay edge to a non-negative weight.
///
/// With no property name every edge costs `default`, which makes cost
/// ordering identical to hop-count ordering. An inlined chain is one edge:
/// its cost is the merged property the expander materialized on it.
#[derive(Debug, Clone)]
pub struct CostEvaluator {
    property: Option<String>,
    default: f64,
}

impl Default for CostEvaluator {
    fn default() -> Self {
        Self::new(None, 1.0)
    }
}

impl CostEvaluator {
    pub fn new(property: Option<String>, default: f64) -> Self {
        Self {
            property: property.filter(|p| !p.trim().is_empty()),
            default,
        }
    }

    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    pub fn cost(&self, edge: &VEdge, overlay: &VirtualGraph<'_>) -> Result<f64> {
        match &edge.kind {
            EdgeKind::Endpoint => Ok(0.0),
            EdgeKind::Real(rel) => {
                let props = overlay
                    .store()
                    .relationship(*rel)
                    .map(|r| &r.properties);
                self.lookup(props, || format!("rel {}", rel))
            }
            EdgeKind::Inlined(_) | EdgeKind::Member => {
                self.lookup(Some(&edge.properties), || format!("{} -> {}", edge.from, edge.to))
            }
        }
    }

    fn lookup<F: Fn() -> String>(&self, props: Option<&Properties>, describe: F) -> Result<f64> {
        let Some(name) = &self.property else {
            return Ok(self.default);
        };
        let value = match props.and_then(|p| p.get(name)) {
            None | Some(PropertyValue::Null) => return Ok(self.default),
            Some(v) => v,
        };
        let cost = value.as_f64().ok_or_else(|| KPathsError::InvalidCost {
            edge: describe(),
            reason: format!("property '{}' is not numeric: {}", name, value.to_literal()),
        })?;
        if !cost.is_finite() || cost < 0.0 {
            return Err(KPathsError::InvalidCost {
                edge: describe(),
                reason: format!("property '{}' = {} is negative or not finite", name, cost),
            });
        }
        Ok(cost)
    }
}
