//! Constraint model: closed predicate trees over nodes and relationships,
//! plus the JSON constraint document that configures a request.
//!
//! Evaluation is pure. Malformed documents are rejected up front by
//! [`PathConstraints::parse`]; once built, a constraint never fails.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{KPathsError, Result};
use crate::graph::{Direction, NodeInfo};
use crate::value::{Properties, PropertyValue};

/// Comparison operator of a property predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Value is a list; the property must equal one of its elements.
    In,
    /// Value is a two-element list; inclusive range.
    Between,
    Exists,
}

impl Operator {
    fn parse(s: &str) -> Result<Self> {
        Ok(match s.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" => Operator::Eq,
            "!=" | "<>" | "ne" => Operator::Ne,
            "<" | "lt" => Operator::Lt,
            "<=" | "le" => Operator::Le,
            ">" | "gt" => Operator::Gt,
            ">=" | "ge" => Operator::Ge,
            "in" => Operator::In,
            "between" => Operator::Between,
            "exists" => Operator::Exists,
            other => {
                return Err(KPathsError::ConstraintParse(format!(
                    "unknown operator '{}'",
                    other
                )))
            }
        })
    }
}

/// `property <op> value` against a node or relationship property bag.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPredicate {
    pub property: String,
    pub op: Operator,
    pub value: PropertyValue,
}

impl PropertyPredicate {
    pub fn new(property: &str, op: Operator, value: impl Into<PropertyValue>) -> Result<Self> {
        let p = Self {
            property: property.to_string(),
            op,
            value: value.into(),
        };
        p.validate()?;
        Ok(p)
    }

    fn validate(&self) -> Result<()> {
        if self.property.trim().is_empty() {
            return Err(KPathsError::ConstraintParse(
                "property constraint without a property name".into(),
            ));
        }
        let bad = |msg: &str| {
            Err(KPathsError::ConstraintParse(format!(
                "property '{}': {}",
                self.property, msg
            )))
        };
        match (self.op, &self.value) {
            (Operator::Exists, _) => Ok(()),
            (Operator::In, PropertyValue::List(_)) => Ok(()),
            (Operator::In, _) => bad("'in' needs a list value"),
            (Operator::Between, PropertyValue::List(items)) if items.len() == 2 => Ok(()),
            (Operator::Between, _) => bad("'between' needs a two-element list"),
            (Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge, v)
                if matches!(v, PropertyValue::Null | PropertyValue::List(_)) =>
            {
                bad("range comparison needs a scalar value")
            }
            _ => Ok(()),
        }
    }

    pub fn evaluate(&self, properties: &Properties) -> bool {
        let actual = properties.get(&self.property);
        match self.op {
            Operator::Exists => actual.is_some_and(|v| *v != PropertyValue::Null),
            Operator::Ne => !actual.is_some_and(|v| v.loosely_equals(&self.value)),
            _ => match actual {
                None => false,
                Some(v) => self.test(v),
            },
        }
    }

    fn test(&self, actual: &PropertyValue) -> bool {
        use std::cmp::Ordering::*;
        match self.op {
            Operator::Eq => match actual {
                // List-valued properties match when any element matches
                PropertyValue::List(items) if !matches!(self.value, PropertyValue::List(_)) => {
                    items.iter().any(|i| i.loosely_equals(&self.value))
                }
                _ => actual.loosely_equals(&self.value),
            },
            Operator::Lt => actual.compare(&self.value) == Some(Less),
            Operator::Le => matches!(actual.compare(&self.value), Some(Less | Equal)),
            Operator::Gt => actual.compare(&self.value) == Some(Greater),
            Operator::Ge => matches!(actual.compare(&self.value), Some(Greater | Equal)),
            Operator::In => match &self.value {
                PropertyValue::List(items) => items.iter().any(|i| actual.loosely_equals(i)),
                _ => false,
            },
            Operator::Between => match &self.value {
                PropertyValue::List(b) if b.len() == 2 => {
                    matches!(actual.compare(&b[0]), Some(Greater | Equal))
                        && matches!(actual.compare(&b[1]), Some(Less | Equal))
                }
                _ => false,
            },
            Operator::Ne | Operator::Exists => unreachable!("handled in evaluate"),
        }
    }

    fn to_cypher(&self, var: &str) -> String {
        let lhs = format!("{}.{}", var, quote_ident(&self.property));
        let lit = self.value.to_literal();
        match self.op {
            Operator::Eq => format!("{} = {}", lhs, lit),
            Operator::Ne => format!("{} <> {}", lhs, lit),
            Operator::Lt => format!("{} < {}", lhs, lit),
            Operator::Le => format!("{} <= {}", lhs, lit),
            Operator::Gt => format!("{} > {}", lhs, lit),
            Operator::Ge => format!("{} >= {}", lhs, lit),
            Operator::In => format!("{} IN {}", lhs, lit),
            Operator::Between => match &self.value {
                PropertyValue::List(b) if b.len() == 2 => format!(
                    "({} >= {} AND {} <= {})",
                    lhs,
                    b[0].to_literal(),
                    lhs,
                    b[1].to_literal()
                ),
                _ => "false".to_string(),
            },
            Operator::Exists => format!("{} IS NOT NULL", lhs),
        }
    }
}

/// Backtick-quote a label or property name unless it is a plain identifier.
fn quote_ident(name: &str) -> Cow<'_, str> {
    let plain = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("`{}`", name.replace('`', "``")))
    }
}

/// Which traversal directions an edge type permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionPolicy {
    Outgoing,
    Incoming,
    Both,
}

impl DirectionPolicy {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "outgoing" | "out" => Ok(DirectionPolicy::Outgoing),
            "incoming" | "in" => Ok(DirectionPolicy::Incoming),
            "both" => Ok(DirectionPolicy::Both),
            other => Err(KPathsError::ConstraintParse(format!(
                "invalid direction '{}', use 'outgoing', 'incoming', or 'both'",
                other
            ))),
        }
    }

    pub fn allows(self, dir: Direction) -> bool {
        match self {
            DirectionPolicy::Both => true,
            DirectionPolicy::Outgoing => dir == Direction::Outgoing,
            DirectionPolicy::Incoming => dir == Direction::Incoming,
        }
    }
}

/// Per-edge-type direction rules with a fallback for unlisted types.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionTable {
    pub rules: BTreeMap<String, DirectionPolicy>,
    pub default: DirectionPolicy,
}

impl Default for DirectionTable {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            default: DirectionPolicy::Outgoing,
        }
    }
}

impl DirectionTable {
    pub fn policy_for(&self, rel_type: &str) -> DirectionPolicy {
        self.rules.get(rel_type).copied().unwrap_or(self.default)
    }
}

/// Something a constraint can be evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    Node(&'a NodeInfo),
    /// An edge as it is about to be traversed. `direction` is relative to the
    /// search's forward orientation.
    Edge {
        rel_type: &'a str,
        direction: Direction,
        properties: &'a Properties,
    },
}

/// Closed predicate tree. Leaves that do not apply to a candidate kind
/// (a label test on an edge, a direction test on a node) are vacuously true.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Label(String),
    Property(PropertyPredicate),
    /// Edge type must be one of the listed types.
    EdgeType(Vec<String>),
    Direction(DirectionTable),
    And(Vec<Constraint>),
}

impl Constraint {
    pub fn always() -> Self {
        Constraint::And(Vec::new())
    }

    pub fn evaluate(&self, candidate: &Candidate<'_>) -> bool {
        match (self, candidate) {
            (Constraint::And(parts), _) => parts.iter().all(|p| p.evaluate(candidate)),
            (Constraint::Label(l), Candidate::Node(n)) => n.has_label(l),
            (Constraint::Property(p), Candidate::Node(n)) => p.evaluate(&n.properties),
            (Constraint::Property(p), Candidate::Edge { properties, .. }) => p.evaluate(properties),
            (Constraint::EdgeType(types), Candidate::Edge { rel_type, .. }) => {
                types.iter().any(|t| t == rel_type)
            }
            (Constraint::Direction(table), Candidate::Edge { rel_type, direction, .. }) => {
                table.policy_for(rel_type).allows(*direction)
            }
            (Constraint::Label(_), Candidate::Edge { .. })
            | (Constraint::EdgeType(_), Candidate::Node(_))
            | (Constraint::Direction(_), Candidate::Node(_)) => true,
        }
    }

    /// Render as a WHERE-clause expression over `var`.
    pub fn to_cypher(&self, var: &str) -> String {
        match self {
            Constraint::Label(l) => format!("{}:{}", var, quote_ident(l)),
            Constraint::Property(p) => p.to_cypher(var),
            Constraint::EdgeType(types) => {
                let lits: Vec<String> = types
                    .iter()
                    .map(|t| PropertyValue::from(t.as_str()).to_literal())
                    .collect();
                format!("type({}) IN [{}]", var, lits.join(", "))
            }
            Constraint::Direction(_) => "true".to_string(),
            Constraint::And(parts) if parts.is_empty() => "true".to_string(),
            Constraint::And(parts) => parts
                .iter()
                .map(|p| p.to_cypher(var))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// Declarative node query used to resolve an unconstrained endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFragment {
    pub variable: String,
    pub labels: Vec<String>,
    pub predicate: Constraint,
}

impl QueryFragment {
    pub fn matches(&self, node: &NodeInfo) -> bool {
        self.labels.iter().all(|l| node.has_label(l))
            && self.predicate.evaluate(&Candidate::Node(node))
    }

    pub fn to_cypher(&self) -> String {
        let mut q = format!("MATCH ({}", self.variable);
        for l in &self.labels {
            q.push(':');
            q.push_str(&quote_ident(l));
        }
        q.push_str(") WHERE ");
        q.push_str(&self.predicate.to_cypher(&self.variable));
        q.push_str(" RETURN ");
        q.push_str(&self.variable);
        q
    }
}

/// Conjunction of label and property tests on a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConstraint {
    pub labels: Vec<String>,
    pub predicates: Vec<PropertyPredicate>,
}

impl NodeConstraint {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.predicates.is_empty()
    }

    pub fn evaluate(&self, node: &NodeInfo) -> bool {
        self.labels.iter().all(|l| node.has_label(l))
            && self.predicates.iter().all(|p| p.evaluate(&node.properties))
    }

    /// Same test, ignoring labels (used for synthesized vertices).
    pub fn evaluate_properties(&self, properties: &Properties) -> bool {
        self.predicates.iter().all(|p| p.evaluate(properties))
    }

    pub fn to_constraint(&self) -> Constraint {
        Constraint::And(
            self.labels
                .iter()
                .cloned()
                .map(Constraint::Label)
                .chain(self.predicates.iter().cloned().map(Constraint::Property))
                .collect(),
        )
    }

    /// Labels go to the MATCH pattern, properties to the WHERE clause.
    pub fn to_query_fragment(&self, var: &str) -> QueryFragment {
        QueryFragment {
            variable: var.to_string(),
            labels: self.labels.clone(),
            predicate: Constraint::And(
                self.predicates.iter().cloned().map(Constraint::Property).collect(),
            ),
        }
    }
}

/// How numeric properties of an inlined chain merge into the virtual edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    Sum,
    Min,
    Max,
    First,
    Last,
}

impl MergeRule {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(MergeRule::Sum),
            "min" => Ok(MergeRule::Min),
            "max" => Ok(MergeRule::Max),
            "first" => Ok(MergeRule::First),
            "last" => Ok(MergeRule::Last),
            other => Err(KPathsError::ConstraintParse(format!(
                "unknown inline rule '{}'",
                other
            ))),
        }
    }

    pub fn fold<I: IntoIterator<Item = f64>>(self, values: I) -> Option<f64> {
        let mut iter = values.into_iter();
        let first = iter.next()?;
        Some(match self {
            MergeRule::Sum => iter.fold(first, |a, b| a + b),
            MergeRule::Min => iter.fold(first, f64::min),
            MergeRule::Max => iter.fold(first, f64::max),
            MergeRule::First => first,
            MergeRule::Last => iter.last().unwrap_or(first),
        })
    }
}

/// Chains of `rel_type` hops collapse into one virtual `as_type` edge.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineSpec {
    pub rel_type: String,
    pub as_type: String,
    pub rule: MergeRule,
    /// Property set to `true` on every virtual edge.
    pub flag: Option<String>,
    /// Virtual edge property <- intermediate node property, collected into a list.
    pub collect: BTreeMap<String, String>,
}

/// Nodes sharing a value of `property` are grouped under one synthetic vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub property: String,
    pub rel_type: String,
}

/// Every constraint that shapes one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathConstraints {
    /// Nodes entered by an expansion step must satisfy this.
    pub node: NodeConstraint,
    pub edge_predicates: Vec<PropertyPredicate>,
    pub edge_types: Option<Vec<String>>,
    pub directions: DirectionTable,
    pub inline: Option<InlineSpec>,
    pub aggregate: Option<AggregateSpec>,
    pub start: Option<NodeConstraint>,
    pub end: Option<NodeConstraint>,
}

impl PathConstraints {
    /// Parse a JSON constraint document. Empty or blank text means "no constraints".
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawSpec = serde_json::from_str(text)
            .map_err(|e| KPathsError::ConstraintParse(e.to_string()))?;
        raw.compile()
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: RawSpec = serde_json::from_value(value)
            .map_err(|e| KPathsError::ConstraintParse(e.to_string()))?;
        raw.compile()
    }

    /// Constraint used to resolve an unset source.
    pub fn start_constraint(&self) -> &NodeConstraint {
        self.start.as_ref().unwrap_or(&self.node)
    }

    /// Constraint used to resolve an unset target.
    pub fn end_constraint(&self) -> &NodeConstraint {
        self.end.as_ref().unwrap_or(&self.node)
    }

    /// The compiled edge predicate: direction table, type whitelist and
    /// edge property tests, conjoined.
    pub fn edge_constraint(&self) -> Constraint {
        let mut parts = vec![Constraint::Direction(self.directions.clone())];
        if let Some(types) = &self.edge_types {
            parts.push(Constraint::EdgeType(types.clone()));
        }
        parts.extend(self.edge_predicates.iter().cloned().map(Constraint::Property));
        Constraint::And(parts)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawSpec {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    property_constraints: Vec<RawPropertyConstraint>,
    #[serde(default)]
    direction: BTreeMap<String, String>,
    default_direction: Option<String>,
    edge_types: Option<Vec<String>>,
    inline: Option<RawInline>,
    aggregate: Option<RawAggregate>,
    start: Option<RawEndpoint>,
    end: Option<RawEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPropertyConstraint {
    property: String,
    operator: String,
    #[serde(default = "null_value")]
    value: PropertyValue,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawEndpoint {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    property_constraints: Vec<RawPropertyConstraint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInline {
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(rename = "as")]
    as_type: Option<String>,
    rule: Option<String>,
    flag: Option<String>,
    #[serde(default)]
    collect: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAggregate {
    property: String,
    #[serde(rename = "type")]
    rel_type: Option<String>,
}

fn null_value() -> PropertyValue {
    PropertyValue::Null
}

impl RawPropertyConstraint {
    fn compile(self) -> Result<(bool, PropertyPredicate)> {
        let is_edge = match self.scope.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("node") => false,
            Some("edge") => true,
            Some(other) => {
                return Err(KPathsError::ConstraintParse(format!(
                    "unknown constraint scope '{}'",
                    other
                )))
            }
        };
        let op = Operator::parse(&self.operator)?;
        Ok((is_edge, PropertyPredicate::new(&self.property, op, self.value)?))
    }
}

impl RawEndpoint {
    fn compile(self) -> Result<NodeConstraint> {
        let mut predicates = Vec::with_capacity(self.property_constraints.len());
        for pc in self.property_constraints {
            let (is_edge, p) = pc.compile()?;
            if is_edge {
                return Err(KPathsError::ConstraintParse(
                    "endpoint constraints cannot test edges".into(),
                ));
            }
            predicates.push(p);
        }
        Ok(NodeConstraint {
            labels: self.labels,
            predicates,
        })
    }
}

impl RawSpec {
    fn compile(self) -> Result<PathConstraints> {
        let mut node = NodeConstraint {
            labels: self.labels,
            predicates: Vec::new(),
        };
        let mut edge_predicates = Vec::new();
        for pc in self.property_constraints {
            match pc.compile()? {
                (true, p) => edge_predicates.push(p),
                (false, p) => node.predicates.push(p),
            }
        }

        let mut directions = DirectionTable::default();
        if let Some(d) = &self.default_direction {
            directions.default = DirectionPolicy::parse(d)?;
        }
        for (rel_type, d) in &self.direction {
            directions.rules.insert(rel_type.clone(), DirectionPolicy::parse(d)?);
        }

        let inline = match self.inline {
            None => None,
            Some(raw) => {
                if raw.rel_type.trim().is_empty() {
                    return Err(KPathsError::ConstraintParse("inline without a type".into()));
                }
                let rule = match &raw.rule {
                    Some(r) => MergeRule::parse(r)?,
                    None => MergeRule::Sum,
                };
                Some(InlineSpec {
                    as_type: raw.as_type.unwrap_or_else(|| raw.rel_type.clone()),
                    rel_type: raw.rel_type,
                    rule,
                    flag: raw.flag,
                    collect: raw.collect,
                })
            }
        };

        let aggregate = match self.aggregate {
            None => None,
            Some(raw) if raw.property.trim().is_empty() => {
                return Err(KPathsError::ConstraintParse(
                    "aggregate without a property".into(),
                ))
            }
            Some(raw) => Some(AggregateSpec {
                property: raw.property,
                rel_type: raw.rel_type.unwrap_or_else(|| "_aggregate".to_string()),
            }),
        };

        Ok(PathConstraints {
            node,
            edge_predicates,
            edge_types: self.edge_types,
            directions,
            inline,
            aggregate,
            start: self.start.map(RawEndpoint::compile).transpose()?,
            end: self.end.map(RawEndpoint::compile).transpose()?,
        })
    }
}
