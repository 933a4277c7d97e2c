//! Argument templates of resolver fields.
//!
//! A template is written in GraphQL argument syntax where `$.field.sub` is a
//! path into the key values exported by the previous step:
//!
//! ```text
//! upc: $.upc
//! keys: { sku: $.sku, owner: $.owner.id }, kind: WIDGET, first: 10
//! ```

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::Schema;
use displaydoc::Display;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::json_ext::from_ast_value;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::resolver::key::Key;
use crate::resolver::key::KeyField;
use crate::resolver::key::EXPORT_PREFIX;

static KEY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$(?:\.[A-Za-z_][A-Za-z0-9_]*)+").expect("this regex to match key paths is valid")
});

/// An invalid arguments template.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ArgumentError {
    /// invalid arguments template '{template}': {reason}
    InvalidTemplate {
        /// The arguments template.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// argument '{argument}' is not defined on field '{field}'
    UnknownArgument {
        /// The resolver field.
        field: String,
        /// The unknown argument.
        argument: String,
    },

    /// required argument '{argument}' of field '{field}' is missing
    MissingArgument {
        /// The resolver field.
        field: String,
        /// The missing argument.
        argument: String,
    },

    /// input field '{field}' is not defined on type '{type_name}'
    UnknownInputField {
        /// The input object type.
        type_name: String,
        /// The unknown field.
        field: String,
    },

    /// required input field '{type_name}.{field}' is missing
    MissingInputField {
        /// The input object type.
        type_name: String,
        /// The missing field.
        field: String,
    },

    /// argument '{argument}' receives an object but its type is not an input object
    UnexpectedObject {
        /// The offending argument.
        argument: String,
    },

    /// argument '{argument}' cannot use variables
    VariableNotAllowed {
        /// The offending argument.
        argument: String,
    },

    /// argument '{argument}' {reason}
    KeyCardinality {
        /// The offending argument.
        argument: String,
        /// The mismatch.
        reason: String,
    },

    /// key path '{path}' is not part of key '{key}'
    KeyPathNotInKey {
        /// The key path, as written in the template.
        path: String,
        /// The resolver key.
        key: String,
    },
}

/// The value of a resolver argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum ArgumentValue {
    /// A constant value.
    Literal(Value),
    /// A constant enum value.
    Enum(String),
    /// A path into the exported key of each origin object.
    Key(Vec<String>),
    /// An input object built from nested arguments.
    Object(Vec<Argument>),
}

impl ArgumentValue {
    pub fn requires_key(&self) -> bool {
        match self {
            ArgumentValue::Key(_) => true,
            ArgumentValue::Object(children) => children.iter().any(Argument::requires_key),
            ArgumentValue::Literal(_) | ArgumentValue::Enum(_) => false,
        }
    }

    /// Builds the value for one origin object, or `None` when a key value it
    /// needs is missing or null.
    pub fn try_build(&self, origin: &Object) -> Option<Value> {
        match self {
            ArgumentValue::Literal(value) => Some(value.clone()),
            ArgumentValue::Enum(value) => Some(Value::String(value.as_str().into())),
            ArgumentValue::Key(path) => {
                let (first, rest) = path.split_first()?;
                let mut current = origin.get(format!("{EXPORT_PREFIX}{first}").as_str())?;
                for segment in rest {
                    current = current.as_object()?.get(segment.as_str())?;
                }
                (!current.is_null()).then(|| current.clone())
            }
            ArgumentValue::Object(children) => children
                .iter()
                .map(|child| Some((child.name.as_str().into(), child.value.try_build(origin)?)))
                .collect::<Option<Object>>()
                .map(Value::Object),
        }
    }

    /// Builds the value for one origin object. Missing key values become null.
    pub fn build(&self, origin: &Object) -> Value {
        self.try_build(origin).unwrap_or(Value::Null)
    }

    fn print(&self) -> String {
        match self {
            ArgumentValue::Literal(value) => print_literal(value),
            ArgumentValue::Enum(value) => value.clone(),
            ArgumentValue::Key(path) => format!("$.{}", path.join(".")),
            ArgumentValue::Object(children) => format!(
                "{{{}}}",
                children.iter().map(Argument::print).join(", ")
            ),
        }
    }

    fn key_paths<'a>(&'a self, paths: &mut Vec<&'a [String]>) {
        match self {
            ArgumentValue::Key(path) => paths.push(path),
            ArgumentValue::Object(children) => {
                for child in children {
                    child.value.key_paths(paths);
                }
            }
            ArgumentValue::Literal(_) | ArgumentValue::Enum(_) => {}
        }
    }
}

/// Renders a JSON value as a GraphQL literal.
fn print_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s.as_str()).unwrap_or_default(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(print_literal).join(", ")
        ),
        Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, value)| format!("{}: {}", name.as_str(), print_literal(value)))
                .join(", ")
        ),
    }
}

/// Rewrites single-quoted strings as GraphQL strings and quotes bare key
/// paths. Double-quoted strings are copied as written.
fn normalize_template(source: &str) -> String {
    let mut normalized = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(c) = rest.chars().next() {
        match c {
            '"' => {
                let end = if rest.starts_with("\"\"\"") {
                    rest[3..].find("\"\"\"").map(|end| end + 6)
                } else {
                    string_end(rest, '"')
                };
                let end = end.unwrap_or(rest.len());
                normalized.push_str(&rest[..end]);
                rest = &rest[end..];
            }
            '\'' => {
                let Some(end) = string_end(rest, '\'') else {
                    // unterminated, left for the parser to reject
                    normalized.push_str(rest);
                    break;
                };
                normalized.push('"');
                let mut chars = rest[1..end - 1].chars();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('\'') => normalized.push('\''),
                            Some(escaped) => {
                                normalized.push('\\');
                                normalized.push(escaped);
                            }
                            None => normalized.push('\\'),
                        },
                        '"' => normalized.push_str("\\\""),
                        c => normalized.push(c),
                    }
                }
                normalized.push('"');
                rest = &rest[end..];
            }
            '$' => match KEY_PATH.find(rest) {
                Some(path) => {
                    normalized.push('"');
                    normalized.push_str(path.as_str());
                    normalized.push('"');
                    rest = &rest[path.end()..];
                }
                None => {
                    normalized.push(c);
                    rest = &rest[1..];
                }
            },
            c => {
                normalized.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    normalized
}

/// Byte offset just past the closing `quote` of the string opening `source`.
fn string_end(source: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (index, c) in source.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == quote => return Some(index + c.len_utf8()),
            _ => {}
        }
    }
    None
}

/// A named resolver argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    name: String,
    value: ArgumentValue,
    type_signature: String,
    list: bool,
}

impl Argument {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ArgumentValue {
        &self.value
    }

    pub fn requires_key(&self) -> bool {
        self.value.requires_key()
    }

    pub fn build(&self, origin: &Object) -> Value {
        self.value.build(origin)
    }

    pub fn try_build(&self, origin: &Object) -> Option<Value> {
        self.value.try_build(origin)
    }

    /// Renders the argument inline, as `name: value`.
    pub fn print(&self) -> String {
        format!("{}: {}", self.name, self.value.print())
    }

    /// The declared type of the argument, as a variable type.
    pub fn type_signature(&self) -> &str {
        &self.type_signature
    }
}

/// Builds [`Argument`]s from templates, checked against a resolver field.
pub struct ArgumentsParser;

impl ArgumentsParser {
    /// Parses `template` as the arguments of `field`.
    ///
    /// `list` tells whether the resolver receives all keys of a batch at once,
    /// in which case key paths must feed a list argument.
    pub fn parse(
        template: &str,
        field: &FieldDefinition,
        schema: &Schema,
        list: bool,
    ) -> Result<Vec<Argument>, ArgumentError> {
        let invalid = |reason: String| ArgumentError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        let mut source = template.trim();
        if source.starts_with('(') && source.ends_with(')') {
            source = &source[1..source.len() - 1];
        }
        let source = normalize_template(source);

        let document = ast::Document::parse(format!("{{ f({source}) }}"), "arguments.graphql")
            .map_err(|invalid_document| invalid(invalid_document.errors.to_string()))?;
        let arguments = document
            .definitions
            .iter()
            .find_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => {
                    match operation.selection_set.first() {
                        Some(ast::Selection::Field(field)) => Some(&field.arguments),
                        _ => None,
                    }
                }
                _ => None,
            })
            .ok_or_else(|| invalid("expected a list of arguments".to_string()))?;

        let mut built = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let definition = field
                .arguments
                .iter()
                .find(|definition| definition.name == argument.name)
                .ok_or_else(|| ArgumentError::UnknownArgument {
                    field: field.name.to_string(),
                    argument: argument.name.to_string(),
                })?;
            let built_argument = Self::build_argument(
                argument.name.as_str(),
                &argument.value,
                &definition.ty,
                schema,
            )?;
            Self::verify_cardinality(&built_argument, list, true)?;
            built.push(built_argument);
        }

        for definition in &field.arguments {
            let required = definition.ty.is_non_null() && definition.default_value.is_none();
            if required && !built.iter().any(|argument| argument.name == definition.name.as_str()) {
                return Err(ArgumentError::MissingArgument {
                    field: field.name.to_string(),
                    argument: definition.name.to_string(),
                });
            }
        }

        Ok(built)
    }

    fn build_argument(
        name: &str,
        value: &ast::Value,
        ty: &ast::Type,
        schema: &Schema,
    ) -> Result<Argument, ArgumentError> {
        Ok(Argument {
            name: name.to_string(),
            value: Self::build_value(name, value, ty, schema)?,
            type_signature: ty.to_string(),
            list: ty.is_list(),
        })
    }

    fn build_value(
        name: &str,
        value: &ast::Value,
        ty: &ast::Type,
        schema: &Schema,
    ) -> Result<ArgumentValue, ArgumentError> {
        Ok(match value {
            ast::Value::String(path) if path.starts_with("$.") => {
                ArgumentValue::Key(path[2..].split('.').map(str::to_string).collect())
            }
            ast::Value::Enum(value) => ArgumentValue::Enum(value.to_string()),
            ast::Value::Variable(_) => {
                return Err(ArgumentError::VariableNotAllowed {
                    argument: name.to_string(),
                })
            }
            ast::Value::Object(fields) => {
                let type_name = ty.inner_named_type();
                let Some(ExtendedType::InputObject(input)) = schema.types.get(type_name) else {
                    return Err(ArgumentError::UnexpectedObject {
                        argument: name.to_string(),
                    });
                };
                let mut children = Vec::with_capacity(fields.len());
                for (field_name, field_value) in fields {
                    let definition = input.fields.get(field_name).ok_or_else(|| {
                        ArgumentError::UnknownInputField {
                            type_name: type_name.to_string(),
                            field: field_name.to_string(),
                        }
                    })?;
                    children.push(Self::build_argument(
                        field_name.as_str(),
                        field_value,
                        &definition.ty,
                        schema,
                    )?);
                }
                for (field_name, definition) in &input.fields {
                    let required = definition.ty.is_non_null() && definition.default_value.is_none();
                    if required && !children.iter().any(|child| child.name == field_name.as_str()) {
                        return Err(ArgumentError::MissingInputField {
                            type_name: type_name.to_string(),
                            field: field_name.to_string(),
                        });
                    }
                }
                ArgumentValue::Object(children)
            }
            literal => ArgumentValue::Literal(from_ast_value(literal).ok_or_else(|| {
                ArgumentError::InvalidTemplate {
                    template: name.to_string(),
                    reason: format!("'{literal}' is not a constant value"),
                }
            })?),
        })
    }

    /// A list resolver feeds a whole batch of key values to one list argument;
    /// a singular resolver feeds one key value to a non-list argument.
    fn verify_cardinality(argument: &Argument, list: bool, top_level: bool) -> Result<(), ArgumentError> {
        if !argument.requires_key() {
            return Ok(());
        }
        if top_level {
            if list && !argument.list {
                return Err(ArgumentError::KeyCardinality {
                    argument: argument.name.clone(),
                    reason: "must be a list to receive the keys of a list resolver".to_string(),
                });
            }
            if !list && argument.list {
                return Err(ArgumentError::KeyCardinality {
                    argument: argument.name.clone(),
                    reason: "cannot be a list to receive the key of a singular resolver".to_string(),
                });
            }
        } else if argument.list {
            return Err(ArgumentError::KeyCardinality {
                argument: argument.name.clone(),
                reason: "cannot be a list when built from a key".to_string(),
            });
        }
        if let ArgumentValue::Object(children) = &argument.value {
            for child in children {
                Self::verify_cardinality(child, list, false)?;
            }
        }
        Ok(())
    }

    /// Checks that every key path of `arguments` selects a field of `key`.
    pub fn verify_key(arguments: &[Argument], key: &Key) -> Result<(), ArgumentError> {
        let mut paths = Vec::new();
        for argument in arguments {
            argument.value.key_paths(&mut paths);
        }
        for path in paths {
            let mut fields: &[KeyField] = key.fields();
            for segment in path {
                match fields.iter().find(|field| field.name() == segment) {
                    Some(field) => fields = field.selections(),
                    None => {
                        return Err(ArgumentError::KeyPathNotInKey {
                            path: format!("$.{}", path.join(".")),
                            key: key.definition().to_string(),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}
