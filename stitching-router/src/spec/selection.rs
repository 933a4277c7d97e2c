use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::Node;

use crate::json_ext::Object;
use crate::spec::FieldType;
use crate::spec::SpecError;

/// A selection of the client operation, with `@skip` and `@include` already
/// applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selection {
    Field {
        name: String,
        alias: Option<String>,
        arguments: Vec<Node<ast::Argument>>,
        /// Directives forwarded to locations. Never `@skip` or `@include`.
        directives: Vec<Node<ast::Directive>>,
        selection_set: Vec<Selection>,
        field_type: FieldType,
    },
    InlineFragment {
        type_condition: Option<String>,
        selection_set: Vec<Selection>,
    },
    FragmentSpread {
        name: String,
    },
}

impl Selection {
    pub(crate) fn from_executable(
        selection: &executable::Selection,
        variables: &Object,
        mut count: usize,
    ) -> Result<Option<Self>, SpecError> {
        // The RECURSION_LIMIT is chosen to be:
        //   < # expected to cause stack overflow &&
        //   > # expected in a legitimate query
        const RECURSION_LIMIT: usize = 512;
        if count > RECURSION_LIMIT {
            tracing::error!("selection processing recursion limit({RECURSION_LIMIT}) exceeded");
            return Err(SpecError::RecursionLimitExceeded);
        }
        count += 1;

        Ok(match selection {
            executable::Selection::Field(field) => {
                if IncludeSkip::parse(&field.directives).should_skip(variables) {
                    return Ok(None);
                }
                Some(Self::Field {
                    name: field.name.as_str().to_string(),
                    alias: field.alias.as_ref().map(|alias| alias.as_str().to_string()),
                    arguments: field.arguments.clone(),
                    directives: field
                        .directives
                        .iter()
                        .filter(|directive| !IncludeSkip::is_condition(directive))
                        .cloned()
                        .collect(),
                    selection_set: Self::from_selection_set(&field.selection_set, variables, count)?,
                    field_type: FieldType::from(field.ty()),
                })
            }
            executable::Selection::InlineFragment(inline_fragment) => {
                if IncludeSkip::parse(&inline_fragment.directives).should_skip(variables) {
                    return Ok(None);
                }
                Some(Self::InlineFragment {
                    type_condition: inline_fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str().to_string()),
                    selection_set: Self::from_selection_set(
                        &inline_fragment.selection_set,
                        variables,
                        count,
                    )?,
                })
            }
            executable::Selection::FragmentSpread(fragment_spread) => {
                if IncludeSkip::parse(&fragment_spread.directives).should_skip(variables) {
                    return Ok(None);
                }
                Some(Self::FragmentSpread {
                    name: fragment_spread.fragment_name.as_str().to_string(),
                })
            }
        })
    }

    pub(crate) fn from_selection_set(
        selection_set: &executable::SelectionSet,
        variables: &Object,
        count: usize,
    ) -> Result<Vec<Self>, SpecError> {
        selection_set
            .selections
            .iter()
            .filter_map(|selection| Self::from_executable(selection, variables, count).transpose())
            .collect()
    }
}

/// Key used in the response for a field: its alias, or its name.
pub(crate) fn response_key<'a>(name: &'a str, alias: Option<&'a String>) -> &'a str {
    alias.map(String::as_str).unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Condition {
    Yes,
    No,
    Variable(String),
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &executable::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in directives.iter() {
            if include.is_none() && directive.name == "include" {
                include = Condition::parse(directive)
            }
            if skip.is_none() && directive.name == "skip" {
                skip = Condition::parse(directive)
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    fn is_condition(directive: &ast::Directive) -> bool {
        directive.name == "include" || directive.name == "skip"
    }

    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        // Using .unwrap_or is legit here because the operation was validated and
        // required variables were checked before selections are converted
        self.skip.eval(variables).unwrap_or(false) || !self.include.eval(variables).unwrap_or(true)
    }
}

impl Condition {
    pub(crate) fn parse(directive: &ast::Directive) -> Option<Self> {
        match directive.specified_argument_by_name("if")?.as_ref() {
            ast::Value::Boolean(true) => Some(Condition::Yes),
            ast::Value::Boolean(false) => Some(Condition::No),
            ast::Value::Variable(variable) => Some(Condition::Variable(variable.as_str().to_owned())),
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(variable_name) => variables
                .get(variable_name.as_str())
                .and_then(|v| v.as_bool()),
        }
    }
}
