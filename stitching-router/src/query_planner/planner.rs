use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::ast;
use indexmap::IndexMap;
use itertools::Itertools;

use super::selection;
use super::selection::Field;
use super::selection::InlineFragment;
use super::selection::Selection;
use super::Op;
use super::OperationKind;
use super::QueryPlan;
use crate::error::PlanningError;
use crate::resolver::key::EXPORT_PREFIX;
use crate::resolver::Resolver;
use crate::spec;
use crate::spec::response_key;
use crate::spec::Query;
use crate::spec::TYPENAME;
use crate::supergraph::Supergraph;
use crate::supergraph::SUPERGRAPH_LOCATION;

/// A step under construction. Steps only refer to each other by index.
#[derive(Debug)]
struct PlannerStep {
    index: usize,
    after: Option<usize>,
    location: String,
    operation_type: OperationKind,
    selections: Vec<Selection>,
    variables: IndexMap<String, String>,
    path: Vec<String>,
    resolver: Option<Arc<Resolver>>,
    type_condition: Option<String>,
}

/// Where a new step starts and what it extends.
struct Entrypoint<'s> {
    location: &'s str,
    after: Option<usize>,
    parent_type: &'s str,
    operation_type: OperationKind,
    path: &'s [String],
    resolver: Option<Arc<Resolver>>,
    type_condition: Option<&'s str>,
}

/// Splits a prepared operation into per-location steps.
pub(crate) struct Planner<'a> {
    supergraph: &'a Supergraph,
    query: &'a Query,
    max_steps: usize,
    steps: Vec<PlannerStep>,
    entrypoints: HashMap<String, usize>,
}

impl<'a> Planner<'a> {
    pub(crate) fn new(supergraph: &'a Supergraph, query: &'a Query, max_steps: usize) -> Self {
        Self {
            supergraph,
            query,
            max_steps,
            steps: Vec::new(),
            entrypoints: HashMap::new(),
        }
    }

    pub(crate) fn plan(mut self) -> Result<QueryPlan, PlanningError> {
        self.build_root_entrypoints()?;
        // root documents repeat the operation directives
        let mut directive_variables = IndexMap::new();
        self.collect_variables(&[], &self.query.operation.directives, &mut directive_variables);
        let ops = self
            .steps
            .into_iter()
            .map(|mut step| {
                if step.resolver.is_none() {
                    for (name, ty) in &directive_variables {
                        step.variables.entry(name.clone()).or_insert_with(|| ty.clone());
                    }
                }
                step
            })
            .map(|step| Op {
                step: step.index,
                after: step.after,
                location: step.location,
                operation_type: step.operation_type,
                selections: selection::render(&step.selections),
                variables: step.variables,
                path: step.path,
                type_condition: step.type_condition,
                resolver: step.resolver.map(|resolver| resolver.version().clone()),
            })
            .collect();
        let plan = QueryPlan::new(ops);
        tracing::trace!("query plan\n{plan}");
        Ok(plan)
    }

    fn build_root_entrypoints(&mut self) -> Result<(), PlanningError> {
        let query = self.query;
        let kind = query.operation.kind;
        let root_type = self
            .supergraph
            .root_type_name(kind)
            .ok_or_else(|| PlanningError::MissingRootType(kind.as_str().to_string()))?
            .to_string();

        let mut root_fields = Vec::new();
        self.collect_root_fields(&root_type, &query.operation.selection_set, &mut root_fields)?;

        // consecutive fields sharing a location stay together
        let mut partitions: Vec<(String, Vec<spec::Selection>)> = Vec::new();
        for field in root_fields {
            let spec::Selection::Field { name, .. } = &field else {
                continue;
            };
            if name == TYPENAME {
                continue;
            }
            let location = if name == "__schema" || name == "__type" {
                SUPERGRAPH_LOCATION.to_string()
            } else {
                self.supergraph
                    .locations_for_field(&root_type, name)
                    .first()
                    .cloned()
                    .ok_or_else(|| PlanningError::UnservedField {
                        type_name: root_type.clone(),
                        field: name.clone(),
                    })?
            };

            match kind {
                OperationKind::Mutation => match partitions.last_mut() {
                    Some((last, fields)) if *last == location => fields.push(field),
                    _ => partitions.push((location, vec![field])),
                },
                _ => match partitions.iter_mut().find(|(existing, _)| *existing == location) {
                    Some((_, fields)) => fields.push(field),
                    None => partitions.push((location, vec![field])),
                },
            }
        }

        let mut previous = None;
        for (location, fields) in partitions {
            let index = self.add_step(
                Entrypoint {
                    location: &location,
                    after: previous,
                    parent_type: &root_type,
                    operation_type: kind,
                    path: &[],
                    resolver: None,
                    type_condition: None,
                },
                &fields,
            )?;
            if kind == OperationKind::Mutation {
                previous = Some(index);
            }
        }
        Ok(())
    }

    /// Flattens the fragments applying to the root type.
    fn collect_root_fields(
        &self,
        root_type: &str,
        selections: &[spec::Selection],
        out: &mut Vec<spec::Selection>,
    ) -> Result<(), PlanningError> {
        let query = self.query;
        for selection in selections {
            match selection {
                spec::Selection::Field { .. } => out.push(selection.clone()),
                spec::Selection::InlineFragment {
                    type_condition,
                    selection_set,
                } => {
                    if type_condition.as_deref().map(|t| t == root_type).unwrap_or(true) {
                        self.collect_root_fields(root_type, selection_set, out)?;
                    }
                }
                spec::Selection::FragmentSpread { name } => {
                    let fragment = query
                        .fragments
                        .get(name)
                        .ok_or_else(|| PlanningError::UnknownFragment(name.clone()))?;
                    if fragment.type_condition == root_type {
                        self.collect_root_fields(root_type, &fragment.selection_set, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Adds a step, or extends the equivalent step already planned, and
    /// returns its index.
    fn add_step(
        &mut self,
        entrypoint: Entrypoint<'_>,
        input: &[spec::Selection],
    ) -> Result<usize, PlanningError> {
        let key = format!(
            "{:?}/{}/{}/{}/{}/{}",
            entrypoint.after,
            entrypoint.location,
            entrypoint.parent_type,
            entrypoint
                .resolver
                .as_ref()
                .map(|resolver| resolver.key().definition())
                .unwrap_or_default(),
            entrypoint.path.join("/"),
            entrypoint.type_condition.unwrap_or_default(),
        );

        let index = match self.entrypoints.get(&key) {
            Some(index) => *index,
            None => {
                if self.steps.len() >= self.max_steps {
                    failfast_debug!("query plan exceeds {} steps", self.max_steps);
                    return Err(PlanningError::TooManySteps(self.max_steps));
                }
                let index = self.steps.len();
                self.steps.push(PlannerStep {
                    index,
                    after: entrypoint.after,
                    location: entrypoint.location.to_string(),
                    operation_type: entrypoint.operation_type,
                    selections: Vec::new(),
                    variables: IndexMap::new(),
                    path: entrypoint.path.to_vec(),
                    resolver: entrypoint.resolver.clone(),
                    type_condition: entrypoint.type_condition.map(str::to_string),
                });
                self.entrypoints.insert(key, index);
                index
            }
        };

        let mut variables = IndexMap::new();
        let mut selections = self.extract_locale_selections(
            entrypoint.location,
            entrypoint.parent_type,
            index,
            input,
            entrypoint.path,
            &mut variables,
            entrypoint.type_condition,
        )?;
        if let Some(resolver) = &entrypoint.resolver {
            selections = self.expand_abstract_resolver(entrypoint.parent_type, resolver, selections);
        }

        let step = &mut self.steps[index];
        selection::push_unique(&mut step.selections, selections);
        for (name, ty) in variables {
            step.variables.entry(name).or_insert(ty);
        }
        Ok(index)
    }

    /// Resolvers returning an abstract type only see the concrete selections
    /// through a fragment.
    fn expand_abstract_resolver(
        &self,
        parent_type: &str,
        resolver: &Resolver,
        selections: Vec<Selection>,
    ) -> Vec<Selection> {
        if resolver.type_name() == parent_type || !self.supergraph.is_abstract(resolver.type_name()) {
            return selections;
        }
        vec![
            Selection::typename_hint(),
            Selection::InlineFragment(InlineFragment {
                type_condition: Some(parent_type.to_string()),
                selections,
            }),
        ]
    }

    /// Keeps the selections `location` can serve and plans dependent steps for
    /// the rest.
    #[allow(clippy::too_many_arguments)]
    fn extract_locale_selections(
        &mut self,
        location: &str,
        parent_type: &str,
        current_index: usize,
        input: &[spec::Selection],
        path: &[String],
        variables: &mut IndexMap<String, String>,
        condition: Option<&str>,
    ) -> Result<Vec<Selection>, PlanningError> {
        let query = self.query;
        let input = self.expand_interface_selections(location, parent_type, input);

        let mut locale: Vec<Selection> = Vec::new();
        let mut remote: Vec<&spec::Selection> = Vec::new();
        let mut requires_typename = false;

        for node in input.iter() {
            match node {
                spec::Selection::Field {
                    name,
                    alias,
                    arguments,
                    directives,
                    selection_set,
                    field_type,
                } => {
                    if let Some(alias) = alias.as_ref().filter(|alias| alias.starts_with(EXPORT_PREFIX)) {
                        return Err(PlanningError::ReservedAlias(alias.clone()));
                    }
                    let introspection = name.starts_with("__") || parent_type.starts_with("__");
                    if !introspection && !self.supergraph.has_field_at(parent_type, location, name) {
                        remote.push(node);
                        continue;
                    }

                    self.collect_variables(arguments, directives, variables);
                    let selections = if selection_set.is_empty() {
                        None
                    } else {
                        let mut field_path = path.to_vec();
                        field_path.push(response_key(name, alias.as_ref()).to_string());
                        Some(self.extract_locale_selections(
                            location,
                            field_type.inner_type_name(),
                            current_index,
                            selection_set,
                            &field_path,
                            variables,
                            None,
                        )?)
                    };
                    locale.push(Selection::Field(Field {
                        alias: alias.clone(),
                        name: name.clone(),
                        arguments: render_arguments(arguments),
                        directives: render_directives(directives),
                        selections,
                    }));
                }
                spec::Selection::InlineFragment {
                    type_condition,
                    selection_set,
                } => {
                    let fragment_type = type_condition.as_deref().unwrap_or(parent_type);
                    requires_typename |= self.extract_fragment(
                        location,
                        parent_type,
                        fragment_type,
                        current_index,
                        selection_set,
                        path,
                        variables,
                        condition,
                        &mut locale,
                    )?;
                }
                spec::Selection::FragmentSpread { name } => {
                    let fragment = query
                        .fragments
                        .get(name)
                        .ok_or_else(|| PlanningError::UnknownFragment(name.clone()))?;
                    requires_typename |= self.extract_fragment(
                        location,
                        parent_type,
                        &fragment.type_condition,
                        current_index,
                        &fragment.selection_set,
                        path,
                        variables,
                        condition,
                        &mut locale,
                    )?;
                }
            }
        }

        if requires_typename {
            selection::push_unique(&mut locale, [Selection::typename_hint()]);
        }
        if remote.is_empty() {
            return Ok(locale);
        }

        let query_root = self.supergraph.root_type_name(OperationKind::Query);
        if query_root == Some(parent_type) && !path.is_empty() {
            // fields of a nested query root are fetched again from the root
            let mut by_location: IndexMap<String, Vec<spec::Selection>> = IndexMap::new();
            for node in remote {
                let spec::Selection::Field { name, .. } = node else {
                    continue;
                };
                let location = self
                    .supergraph
                    .locations_for_field(parent_type, name)
                    .first()
                    .cloned()
                    .ok_or_else(|| PlanningError::UnservedField {
                        type_name: parent_type.to_string(),
                        field: name.clone(),
                    })?;
                by_location.entry(location).or_default().push(node.clone());
            }
            for (root_location, selections) in by_location {
                self.add_step(
                    Entrypoint {
                        location: &root_location,
                        after: Some(current_index),
                        parent_type,
                        operation_type: OperationKind::Query,
                        path,
                        resolver: None,
                        type_condition: condition,
                    },
                    &selections,
                )?;
            }
            return Ok(locale);
        }

        let delegated = self.delegate_remote_selections(parent_type, remote)?;
        let goals: Vec<String> = delegated.keys().cloned().collect();
        let routes = self
            .supergraph
            .route_type_to_locations(parent_type, location, &goals)?;

        for (goal, selections) in delegated {
            let route = routes.get(&goal).cloned().unwrap_or_default();
            let mut previous = current_index;
            for (hop, resolver) in route.iter().enumerate() {
                let exports = resolver.key().export_nodes();
                if hop == 0 {
                    selection::push_unique(&mut locale, exports);
                } else {
                    selection::push_unique(&mut self.steps[previous].selections, exports);
                }
                let at_goal = hop + 1 == route.len();
                previous = self.add_step(
                    Entrypoint {
                        location: resolver.location(),
                        after: Some(previous),
                        parent_type,
                        operation_type: OperationKind::Query,
                        path,
                        resolver: Some(resolver.clone()),
                        type_condition: condition,
                    },
                    if at_goal { selections.as_slice() } else { &[] },
                )?;
            }
        }

        Ok(locale)
    }

    /// Plans a fragment at `location`; returns whether it narrowed the type.
    #[allow(clippy::too_many_arguments)]
    fn extract_fragment(
        &mut self,
        location: &str,
        parent_type: &str,
        fragment_type: &str,
        current_index: usize,
        selection_set: &[spec::Selection],
        path: &[String],
        variables: &mut IndexMap<String, String>,
        condition: Option<&str>,
        locale: &mut Vec<Selection>,
    ) -> Result<bool, PlanningError> {
        if fragment_type == parent_type {
            let selections = self.extract_locale_selections(
                location,
                parent_type,
                current_index,
                selection_set,
                path,
                variables,
                condition,
            )?;
            locale.extend(selections);
            return Ok(false);
        }
        if !self.supergraph.type_at_location(fragment_type, location) {
            // narrow to the possible types found here and switch field by field
            let supergraph = self.supergraph;
            let Some(possible_types) = supergraph.possible_types(fragment_type) else {
                return Ok(false);
            };
            let mut narrowed = false;
            for possible_type in possible_types {
                if possible_type == fragment_type
                    || !supergraph.type_at_location(possible_type, location)
                    || !supergraph.is_possible_type(parent_type, possible_type)
                {
                    continue;
                }
                narrowed |= self.extract_fragment(
                    location,
                    parent_type,
                    possible_type,
                    current_index,
                    selection_set,
                    path,
                    variables,
                    condition,
                    locale,
                )?;
            }
            return Ok(narrowed);
        }
        let selections = self.extract_locale_selections(
            location,
            fragment_type,
            current_index,
            selection_set,
            path,
            variables,
            Some(fragment_type),
        )?;
        locale.push(Selection::InlineFragment(InlineFragment {
            type_condition: Some(fragment_type.to_string()),
            selections,
        }));
        Ok(true)
    }

    /// Moves the interface fields `location` does not serve through the
    /// interface into fragments on each concrete type found there.
    fn expand_interface_selections<'s>(
        &self,
        location: &str,
        parent_type: &str,
        input: &'s [spec::Selection],
    ) -> std::borrow::Cow<'s, [spec::Selection]> {
        if !self.supergraph.is_interface(parent_type) {
            return input.into();
        }
        let (expanded, mut kept): (Vec<spec::Selection>, Vec<spec::Selection>) =
            input.iter().cloned().partition(|node| {
                matches!(node, spec::Selection::Field { name, .. }
                    if !name.starts_with("__")
                        && !self.supergraph.has_field_at(parent_type, location, name))
            });
        if expanded.is_empty() {
            return input.into();
        }
        if let Some(possible_types) = self.supergraph.possible_types(parent_type) {
            for possible_type in possible_types {
                if self.supergraph.type_at_location(possible_type, location) {
                    kept.push(spec::Selection::InlineFragment {
                        type_condition: Some(possible_type.clone()),
                        selection_set: expanded.clone(),
                    });
                }
            }
        }
        kept.into()
    }

    /// Assigns each remote field to a location: fields with a single location
    /// first, then locations already chosen, then the location serving the
    /// most remaining fields. Each location keeps the client's field order.
    fn delegate_remote_selections(
        &self,
        parent_type: &str,
        remote: Vec<&spec::Selection>,
    ) -> Result<IndexMap<String, Vec<spec::Selection>>, PlanningError> {
        let mut delegated: IndexMap<String, Vec<(usize, &spec::Selection)>> = IndexMap::new();
        let mut remaining: Vec<(usize, &spec::Selection, &[String])> = Vec::new();

        for (position, node) in remote.into_iter().enumerate() {
            let spec::Selection::Field { name, .. } = node else {
                continue;
            };
            let locations = self.supergraph.locations_for_field(parent_type, name);
            match locations {
                [] => {
                    return Err(PlanningError::UnservedField {
                        type_name: parent_type.to_string(),
                        field: name.clone(),
                    })
                }
                [single] => delegated
                    .entry(single.clone())
                    .or_default()
                    .push((position, node)),
                _ => remaining.push((position, node, locations)),
            }
        }

        let mut unassigned = Vec::new();
        for (position, node, locations) in remaining {
            match locations.iter().find(|location| delegated.contains_key(*location)) {
                Some(location) => delegated[location].push((position, node)),
                None => unassigned.push((position, node, locations)),
            }
        }

        let mut availability: HashMap<&str, usize> = HashMap::new();
        for (_, _, locations) in &unassigned {
            for location in locations.iter() {
                *availability.entry(location.as_str()).or_default() += 1;
            }
        }
        for (position, node, locations) in unassigned {
            let mut preferred = &locations[0];
            let mut best = 0;
            for location in locations {
                let score = availability.get(location.as_str()).copied().unwrap_or_default();
                if score > best {
                    preferred = location;
                    best = score;
                }
            }
            delegated
                .entry(preferred.clone())
                .or_default()
                .push((position, node));
        }

        Ok(delegated
            .into_iter()
            .map(|(location, mut nodes)| {
                nodes.sort_by_key(|(position, _)| *position);
                let nodes = nodes.into_iter().map(|(_, node)| node.clone()).collect();
                (location, nodes)
            })
            .collect())
    }

    fn collect_variables(
        &self,
        arguments: &[apollo_compiler::Node<ast::Argument>],
        directives: &[apollo_compiler::Node<ast::Directive>],
        variables: &mut IndexMap<String, String>,
    ) {
        let values = arguments
            .iter()
            .map(|argument| &argument.value)
            .chain(
                directives
                    .iter()
                    .flat_map(|directive| directive.arguments.iter().map(|argument| &argument.value)),
            );
        for value in values {
            self.collect_value_variables(value, variables);
        }
    }

    fn collect_value_variables(&self, value: &ast::Value, variables: &mut IndexMap<String, String>) {
        match value {
            ast::Value::Variable(name) => {
                if let Some(ty) = self.query.variable_type(name.as_str()) {
                    variables
                        .entry(name.as_str().to_string())
                        .or_insert_with(|| ty.to_string());
                }
            }
            ast::Value::List(items) => {
                for item in items {
                    self.collect_value_variables(item, variables);
                }
            }
            ast::Value::Object(fields) => {
                for (_, item) in fields {
                    self.collect_value_variables(item, variables);
                }
            }
            _ => {}
        }
    }
}

fn render_arguments(arguments: &[apollo_compiler::Node<ast::Argument>]) -> String {
    if arguments.is_empty() {
        return String::new();
    }
    format!(
        "({})",
        arguments
            .iter()
            .map(|argument| format!("{}: {}", argument.name, argument.value))
            .join(", ")
    )
}

fn render_directives(directives: &[apollo_compiler::Node<ast::Directive>]) -> String {
    directives
        .iter()
        .map(|directive| directive.to_string())
        .join(" ")
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use maplit::hashmap;
    use serde_json_bytes::json;

    use super::*;
    use crate::graphql::Request;
    use crate::resolver::ArgumentsParser;
    use crate::resolver::Key;
    use crate::supergraph::tests::storefronts_supergraph;

    fn plan(supergraph: &Supergraph, query: &str) -> Result<QueryPlan, PlanningError> {
        plan_with_variables(supergraph, query, json!({}))
    }

    fn plan_with_variables(
        supergraph: &Supergraph,
        query: &str,
        variables: serde_json_bytes::Value,
    ) -> Result<QueryPlan, PlanningError> {
        let request = Request::builder()
            .query(query)
            .variables(variables.as_object().cloned().unwrap_or_default())
            .build();
        let query = Query::parse(&request, supergraph.schema()).unwrap();
        Planner::new(supergraph, &query, 100).plan()
    }

    fn summary(plan: &QueryPlan) -> Vec<String> {
        plan.ops()
            .iter()
            .map(|op| {
                format!(
                    "{} {:?} {} {} /{}{}",
                    op.step,
                    op.after,
                    op.location,
                    op.selections,
                    op.path.join("/"),
                    op.type_condition
                        .as_ref()
                        .map(|condition| format!(" on {condition}"))
                        .unwrap_or_default()
                )
            })
            .collect()
    }

    #[test]
    fn test_storefront_plan() {
        let supergraph = storefronts_supergraph();
        let plan = plan(
            &supergraph,
            r#"{ storefront(id: "1") { name products { name price } } }"#,
        )
        .unwrap();
        assert!(plan.is_valid());
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None storefronts { storefront(id: \"1\") { name products { _export_upc: upc _export___typename: __typename } } } /",
            "1 Some(0) products { name price } /storefront/products",
        ]
        "###);
        let resolver = supergraph.resolvers_for_type("Product")[0].version().clone();
        assert_eq!(plan.ops()[1].resolver, Some(resolver));
        assert_eq!(plan.ops()[0].resolver, None);
    }

    #[test]
    fn test_root_fields_grouped_by_location() {
        let supergraph = storefronts_supergraph();
        let plan = plan(
            &supergraph,
            r#"{ a: product(upc: "1") { name } storefront(id: "1") { id } b: product(upc: "2") { price } __typename }"#,
        )
        .unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None products { a: product(upc: \"1\") { name } b: product(upc: \"2\") { price } } /",
            "1 None storefronts { storefront(id: \"1\") { id } } /",
        ]
        "###);
    }

    #[test]
    fn test_variables_are_passed_through() {
        let supergraph = storefronts_supergraph();
        let plan = plan_with_variables(
            &supergraph,
            r#"query($id: ID!) { storefront(id: $id) { products { name } } }"#,
            json!({ "id": "1" }),
        )
        .unwrap();
        assert_eq!(
            plan.ops()[0].variables,
            IndexMap::from([("id".to_string(), "ID!".to_string())])
        );
        assert!(plan.ops()[1].variables.is_empty());
    }

    #[test]
    fn test_operation_directive_variables_reach_root_ops() {
        let supergraph = storefronts_supergraph();
        let plan = plan_with_variables(
            &supergraph,
            r#"query Shop($cache: Boolean) @cached(if: $cache) {
                storefront(id: "1") { products { name } }
                product(upc: "2") { price }
            }"#,
            json!({ "cache": true }),
        )
        .unwrap();
        let directive_variables = IndexMap::from([("cache".to_string(), "Boolean".to_string())]);
        assert_eq!(plan.ops().len(), 3);
        for op in plan.ops() {
            if op.resolver.is_none() {
                assert_eq!(op.variables, directive_variables, "step {}", op.step);
            } else {
                assert!(op.variables.is_empty(), "step {}", op.step);
            }
        }
    }

    #[test]
    fn test_reserved_alias() {
        let supergraph = storefronts_supergraph();
        let error = plan(&supergraph, r#"{ storefront(id: "1") { _export_name: name } }"#).unwrap_err();
        assert_eq!(error, PlanningError::ReservedAlias("_export_name".to_string()));
    }

    #[test]
    fn test_fragments_are_inlined() {
        let supergraph = storefronts_supergraph();
        let plan = plan(
            &supergraph,
            r#"
            query { storefront(id: "1") { ...Shop } }
            fragment Shop on Storefront { name products { ... on Product { price } } }
            "#,
        )
        .unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None storefronts { storefront(id: \"1\") { name products { _export_upc: upc _export___typename: __typename } } } /",
            "1 Some(0) products { price } /storefront/products",
        ]
        "###);
    }

    #[test]
    fn test_abstract_fragments_record_type_conditions() {
        let supergraph = storefronts_supergraph();
        let plan = plan(
            &supergraph,
            r#"{ node(id: "1") { id ... on Storefront { name } } }"#,
        )
        .unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None storefronts { node(id: \"1\") { id ... on Storefront { name } _export___typename: __typename } } /",
        ]
        "###);
        assert_eq!(plan.ops()[0].type_condition, None);

        // a remote field under a fragment is fetched only for that type
        let supergraph = abstract_resolver_supergraph();
        let plan = self::plan(&supergraph, r#"{ node(id: "1") { id ... on Gadget { color } } }"#).unwrap();
        assert_eq!(plan.ops().len(), 2);
        let op = &plan.ops()[1];
        assert_eq!(op.location, "c");
        assert_eq!(op.after, Some(0));
        assert_eq!(op.path, vec!["node".to_string()]);
        assert_eq!(op.type_condition.as_deref(), Some("Gadget"));
        assert!(op.selections.contains("... on Gadget { color }"), "{}", op.selections);
        assert!(
            plan.ops()[0].selections.contains("... on Gadget { _export_id: id"),
            "{}",
            plan.ops()[0].selections
        );
    }

    #[test]
    fn test_step_limit() {
        let supergraph = storefronts_supergraph();
        let request = Request::builder()
            .query(r#"{ storefront(id: "1") { products { name } } }"#)
            .build();
        let query = Query::parse(&request, supergraph.schema()).unwrap();
        let error = Planner::new(&supergraph, &query, 1).plan().unwrap_err();
        assert_eq!(error, PlanningError::TooManySteps(1));
    }

    fn mutations_supergraph() -> Supergraph {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { ping: String }
            type Mutation { a1: Int a2: Int b1: Int }
            "#,
            "supergraph.graphql",
        )
        .unwrap();
        Supergraph::builder()
            .schema(schema)
            .fields(hashmap! {
                "Query".to_string() => hashmap! { "ping".to_string() => vec!["a".to_string()] },
                "Mutation".to_string() => hashmap! {
                    "a1".to_string() => vec!["a".to_string()],
                    "a2".to_string() => vec!["a".to_string()],
                    "b1".to_string() => vec!["b".to_string()],
                },
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_mutations_are_chained_by_consecutive_location() {
        let supergraph = mutations_supergraph();
        let plan = plan(&supergraph, "mutation { a1 a2 b1 x: a1 }").unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None a { a1 a2 } /",
            "1 Some(0) b { b1 } /",
            "2 Some(1) a { x: a1 } /",
        ]
        "###);
        assert!(plan
            .ops()
            .iter()
            .all(|op| op.operation_type == OperationKind::Mutation));
    }

    #[test]
    fn test_introspection_goes_to_the_supergraph() {
        let supergraph = mutations_supergraph();
        let plan = plan(&supergraph, "{ __schema { queryType { name } } ping }").unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None __super { __schema { queryType { name } } } /",
            "1 None a { ping } /",
        ]
        "###);
    }

    /// `Gadget` lives at `a` and `b`; `c` resolves it through the `Node`
    /// interface by `id`.
    fn abstract_resolver_supergraph() -> Supergraph {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { gadget: Gadget node(id: ID!): Node nodes(ids: [ID!]!): [Node]! }
            interface Node { id: ID! weight: Int }
            type Gadget implements Node { id: ID! name: String weight: Int color: String }
            "#,
            "supergraph.graphql",
        )
        .unwrap();
        let nodes_field = schema.type_field("Query", "nodes").unwrap().clone();
        let arguments = ArgumentsParser::parse("ids: $.id", &nodes_field, &schema, true).unwrap();
        let gadget_field = schema.type_field("Query", "node").unwrap().clone();
        let gadget_arguments = ArgumentsParser::parse("id: $.id", &gadget_field, &schema, false).unwrap();
        Supergraph::builder()
            .schema(schema)
            .fields(hashmap! {
                "Query".to_string() => hashmap! {
                    "gadget".to_string() => vec!["a".to_string()],
                    "node".to_string() => vec!["b".to_string()],
                    "nodes".to_string() => vec!["c".to_string()],
                },
                "Node".to_string() => hashmap! {
                    "id".to_string() => vec!["a".to_string(), "b".to_string(), "c".to_string()],
                },
                "Gadget".to_string() => hashmap! {
                    "id".to_string() => vec!["a".to_string(), "b".to_string(), "c".to_string()],
                    "name".to_string() => vec!["a".to_string()],
                    "weight".to_string() => vec!["b".to_string(), "c".to_string()],
                    "color".to_string() => vec!["c".to_string()],
                },
            })
            .resolvers(hashmap! {
                "Gadget".to_string() => vec![
                    Resolver::builder()
                        .location("b")
                        .type_name("Gadget")
                        .field("node")
                        .key(Key::parse("id").unwrap())
                        .arguments(gadget_arguments)
                        .build(),
                ],
                "Node".to_string() => vec![
                    Resolver::builder()
                        .location("c")
                        .type_name("Node")
                        .field("nodes")
                        .list(true)
                        .key(Key::parse("id").unwrap())
                        .arguments(arguments)
                        .build(),
                ],
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_remote_fields_are_delegated_by_availability() {
        let supergraph = abstract_resolver_supergraph();
        // weight is at b and c; color only at c, so both go to c
        let plan = plan(&supergraph, "{ gadget { name weight color } }").unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None a { gadget { name _export_id: id _export___typename: __typename } } /",
            "1 Some(0) c { _export___typename: __typename ... on Gadget { weight color } } /gadget",
        ]
        "###);
    }

    #[test]
    fn test_interface_fields_are_expanded() {
        let supergraph = abstract_resolver_supergraph();
        let plan = plan(&supergraph, r#"{ node(id: "1") { id weight } }"#).unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None b { node(id: \"1\") { id ... on Gadget { weight } _export___typename: __typename } } /",
        ]
        "###);
    }

    #[test]
    fn test_fragments_on_types_missing_at_the_location_are_switched() {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { gadget: Gadget gadgetById(id: ID!): Gadget }
            interface Node { id: ID! weight: Int }
            type Gadget implements Node { id: ID! name: String weight: Int }
            "#,
            "supergraph.graphql",
        )
        .unwrap();
        let field = schema.type_field("Query", "gadgetById").unwrap().clone();
        let arguments = ArgumentsParser::parse("id: $.id", &field, &schema, false).unwrap();
        // no field is declared through Node, so no location holds it
        let supergraph = Supergraph::builder()
            .schema(schema)
            .fields(hashmap! {
                "Query".to_string() => hashmap! {
                    "gadget".to_string() => vec!["a".to_string()],
                    "gadgetById".to_string() => vec!["b".to_string()],
                },
                "Gadget".to_string() => hashmap! {
                    "id".to_string() => vec!["a".to_string(), "b".to_string()],
                    "name".to_string() => vec!["a".to_string()],
                    "weight".to_string() => vec!["b".to_string()],
                },
            })
            .resolvers(hashmap! {
                "Gadget".to_string() => vec![
                    Resolver::builder()
                        .location("b")
                        .type_name("Gadget")
                        .field("gadgetById")
                        .key(Key::parse("id").unwrap())
                        .arguments(arguments)
                        .build(),
                ],
            })
            .build()
            .unwrap();

        let plan = plan(&supergraph, "{ gadget { name ... on Node { weight } } }").unwrap();
        insta::assert_debug_snapshot!(summary(&plan), @r###"
        [
            "0 None a { gadget { name _export_id: id _export___typename: __typename } } /",
            "1 Some(0) b { weight } /gadget",
        ]
        "###);
    }
}
