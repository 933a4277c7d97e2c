//! GraphQL operation planning.
//!
//! A [`QueryPlan`] is a flat arena of [`Op`]s. Each op names the location it
//! runs at and, through `after`, the op whose results it extends.

use std::fmt;
use std::fmt::Display;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

pub(crate) use self::planner::Planner;
use crate::resolver::ResolverVersion;

mod planner;
pub(crate) mod selection;

pub(crate) const FETCH_SPAN_NAME: &str = "fetch";
pub(crate) const TIER_SPAN_NAME: &str = "tier";

/// GraphQL operation type.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_type_name())
    }
}

impl OperationKind {
    /// The public name of the root type for this kind of operation.
    pub const fn default_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }

    /// The keyword starting operations of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl From<OperationKind> for apollo_compiler::ast::OperationType {
    fn from(value: OperationKind) -> Self {
        match value {
            OperationKind::Query => apollo_compiler::ast::OperationType::Query,
            OperationKind::Mutation => apollo_compiler::ast::OperationType::Mutation,
            OperationKind::Subscription => apollo_compiler::ast::OperationType::Subscription,
        }
    }
}

impl From<apollo_compiler::ast::OperationType> for OperationKind {
    fn from(value: apollo_compiler::ast::OperationType) -> Self {
        match value {
            apollo_compiler::ast::OperationType::Query => OperationKind::Query,
            apollo_compiler::ast::OperationType::Mutation => OperationKind::Mutation,
            apollo_compiler::ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// One sub-query of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Op {
    /// Index of this op in the plan.
    pub step: usize,

    /// The op whose results this op extends, or none for root ops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<usize>,

    /// Location the op is sent to.
    pub location: String,

    pub operation_type: OperationKind,

    /// Rendered selection set, braces included.
    pub selections: String,

    /// Request variables used by the selections, with their rendered types.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,

    /// Response keys from the root to the objects this op extends.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,

    /// Only origin objects of this type are extended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_condition: Option<String>,

    /// Resolver fetching the origin objects by key; none for root ops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverVersion>,
}

/// A plan for a given GraphQL operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    ops: Vec<Op>,
}

impl QueryPlan {
    pub(crate) fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    /// The ops, in step order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Groups the ops by dependency depth: every op of a tier only depends on
    /// ops of earlier tiers.
    pub fn tiers(&self) -> Vec<Vec<&Op>> {
        let mut depths: Vec<usize> = Vec::with_capacity(self.ops.len());
        let mut tiers: Vec<Vec<&Op>> = Vec::new();
        for op in &self.ops {
            let depth = match op.after {
                Some(after) => depths.get(after).map(|depth| depth + 1).unwrap_or_default(),
                None => 0,
            };
            depths.push(depth);
            if tiers.len() <= depth {
                tiers.resize_with(depth + 1, Vec::new);
            }
            tiers[depth].push(op);
        }
        tiers
    }

    /// Whether every op is at its own index and only depends on earlier ops.
    pub fn is_valid(&self) -> bool {
        self.ops.iter().enumerate().all(|(index, op)| {
            op.step == index && op.after.map(|after| after < index).unwrap_or(true)
        })
    }
}

impl Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "QueryPlan {{")?;
        for op in &self.ops {
            write!(f, "  [{}", op.step)?;
            if let Some(after) = op.after {
                write!(f, " after {after}")?;
            }
            write!(f, "] {} {}", op.operation_type.as_str(), op.location)?;
            if !op.path.is_empty() {
                write!(f, " at /{}", op.path.join("/"))?;
            }
            if let Some(type_condition) = &op.type_condition {
                write!(f, " on {type_condition}")?;
            }
            writeln!(f, " {}", op.selections)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(step: usize, after: Option<usize>) -> Op {
        Op {
            step,
            after,
            location: format!("l{step}"),
            operation_type: OperationKind::Query,
            selections: "{ id }".to_string(),
            variables: IndexMap::new(),
            path: vec![],
            type_condition: None,
            resolver: None,
        }
    }

    #[test]
    fn test_tiers() {
        let plan = QueryPlan::new(vec![op(0, None), op(1, Some(0)), op(2, None), op(3, Some(1)), op(4, Some(0))]);
        assert!(plan.is_valid());
        let tiers: Vec<Vec<usize>> = plan
            .tiers()
            .into_iter()
            .map(|tier| tier.into_iter().map(|op| op.step).collect())
            .collect();
        assert_eq!(tiers, vec![vec![0, 2], vec![1, 4], vec![3]]);
    }

    #[test]
    fn test_forward_references_are_invalid() {
        assert!(!QueryPlan::new(vec![op(0, Some(1)), op(1, None)]).is_valid());
        assert!(!QueryPlan::new(vec![op(1, None)]).is_valid());
    }

    #[test]
    fn test_operation_kind_conversions() {
        let kind: OperationKind = apollo_compiler::ast::OperationType::Mutation.into();
        assert_eq!(kind, OperationKind::Mutation);
        assert_eq!(kind.as_str(), "mutation");
        assert_eq!(kind.to_string(), "Mutation");
    }

    #[test]
    fn test_plan_serialization() {
        let mut dependent = op(1, Some(0));
        dependent.path = vec!["storefront".to_string(), "products".to_string()];
        let plan = QueryPlan::new(vec![op(0, None), dependent]);
        insta::assert_json_snapshot!(plan, @r###"
        {
          "ops": [
            {
              "step": 0,
              "location": "l0",
              "operationType": "query",
              "selections": "{ id }"
            },
            {
              "step": 1,
              "after": 0,
              "location": "l1",
              "operationType": "query",
              "selections": "{ id }",
              "path": [
                "storefront",
                "products"
              ]
            }
          ]
        }
        "###);
    }
}
