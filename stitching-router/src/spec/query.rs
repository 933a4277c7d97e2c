//! Query preparation: parsing, validation, operation selection and constant
//! folding of `@skip`/`@include`.

use serde_json_bytes::ByteString;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::graphql::Request;
use crate::json_ext::from_ast_value;
use crate::json_ext::Object;
use crate::query_planner::OperationKind;
use crate::spec::Fragments;
use crate::spec::Selection;
use crate::spec::SpecError;

/// A client operation prepared for planning.
#[derive(Debug)]
pub struct Query {
    pub(crate) operation: Operation,
    pub(crate) fragments: Fragments,
    /// Request variables, with the operation's default values applied.
    pub(crate) variables: Object,
}

#[derive(Debug)]
pub(crate) struct Operation {
    pub(crate) name: Option<String>,
    pub(crate) kind: OperationKind,
    /// Name of the root type in the supergraph schema.
    pub(crate) type_name: String,
    pub(crate) selection_set: Vec<Selection>,
    /// Variable name to rendered type.
    pub(crate) variables: IndexMap<String, String>,
    /// Operation directives, forwarded to every root document.
    pub(crate) directives: Vec<Node<ast::Directive>>,
}

impl Operation {
    pub(crate) fn rendered_directives(&self) -> String {
        self.directives
            .iter()
            .map(|directive| directive.to_string())
            .join(" ")
    }
}

impl Query {
    /// Parses and validates the request's document, selects its operation and
    /// folds every `@skip`/`@include` against the request variables.
    pub fn parse(request: &Request, schema: &Valid<Schema>) -> Result<Self, SpecError> {
        let source = request.query.as_deref().ok_or(SpecError::MissingQuery)?;
        let ast = ast::Document::parse(source, "query.graphql")
            .map_err(|invalid| SpecError::ParsingError(invalid.errors.to_string()))?;
        let document = ast
            .to_executable_validate(schema)
            .map_err(|invalid| SpecError::ValidationError(invalid.errors.to_string()))?;

        let operation = document
            .operations
            .get(request.operation_name.as_deref())
            .map_err(|_| match &request.operation_name {
                Some(name) => SpecError::UnknownOperation(name.clone()),
                None => SpecError::OperationNameRequired,
            })?;
        let kind = OperationKind::from(operation.operation_type);
        if kind == OperationKind::Subscription {
            return Err(SpecError::SubscriptionNotSupported);
        }

        let variables = Self::apply_variable_defaults(operation, &request.variables)?;
        let selection_set = Selection::from_selection_set(&operation.selection_set, &variables, 0)?;
        let fragments = Fragments::from_executable(&document, &variables)?;

        Ok(Query {
            operation: Operation {
                name: operation.name.as_ref().map(|name| name.as_str().to_string()),
                kind,
                type_name: operation.selection_set.ty.as_str().to_string(),
                selection_set,
                variables: operation
                    .variables
                    .iter()
                    .map(|definition| (definition.name.as_str().to_string(), definition.ty.to_string()))
                    .collect(),
                directives: operation.directives.iter().cloned().collect(),
            },
            fragments,
            variables,
        })
    }

    fn apply_variable_defaults(
        operation: &executable::Operation,
        provided: &Object,
    ) -> Result<Object, SpecError> {
        let mut variables = provided.clone();
        for definition in &operation.variables {
            let name = definition.name.as_str();
            if variables.contains_key(name) {
                continue;
            }
            match definition.default_value.as_ref().and_then(|value| from_ast_value(value)) {
                Some(default) => {
                    variables.insert::<ByteString>(name.into(), default);
                }
                None if definition.ty.is_non_null() => {
                    return Err(SpecError::MissingVariable(name.to_string()));
                }
                None => {}
            }
        }
        Ok(variables)
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.operation.kind
    }

    /// The operation name, if any.
    pub fn operation_name(&self) -> Option<&str> {
        self.operation.name.as_deref()
    }

    pub(crate) fn variable_type(&self, name: &str) -> Option<&str> {
        self.operation.variables.get(name).map(String::as_str)
    }
}
