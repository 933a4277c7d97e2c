//! Join keys identifying an entity across locations.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Schema;
use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::query_planner::selection::Field;
use crate::query_planner::selection::Selection;
use crate::spec::TYPENAME;

/// Alias prefix of the fields captured to build keys for dependent steps.
pub const EXPORT_PREFIX: &str = "_export_";

/// Alias of the `__typename` captured alongside every key export.
pub const TYPENAME_EXPORT: &str = "_export___typename";

/// An invalid key template.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum KeyError {
    /// invalid key '{template}': {reason}
    InvalidTemplate {
        /// The key template.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// key field '{field}' does not exist on type '{type_name}'
    UnknownField {
        /// The owning type.
        type_name: String,
        /// The missing field.
        field: String,
    },

    /// key field '{type_name}.{field}' returns a composite type and must select subfields
    MissingSelections {
        /// The owning type.
        type_name: String,
        /// The composite field.
        field: String,
    },

    /// key field '{type_name}.{field}' returns a leaf type and cannot select subfields
    UnexpectedSelections {
        /// The owning type.
        type_name: String,
        /// The leaf field.
        field: String,
    },
}

/// One field of a key, with its own nested key fields when it is composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    name: String,
    selections: Vec<KeyField>,
}

impl KeyField {
    /// The field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The nested key fields.
    pub fn selections(&self) -> &[KeyField] {
        &self.selections
    }

    fn write_definition(&self, out: &mut String) {
        out.push_str(&self.name);
        if !self.selections.is_empty() {
            out.push_str(" { ");
            write_fields(&self.selections, out);
            out.push_str(" }");
        }
    }
}

fn write_fields(fields: &[KeyField], out: &mut String) {
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        field.write_definition(out);
    }
}

/// A canonical field set: sorted, deduplicated, and compared by its
/// rendered definition.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key {
    fields: Vec<KeyField>,
    definition: String,
}

impl Key {
    /// Parses a field-set template such as `"id"` or `"sku owner { id }"`.
    pub fn parse(template: &str) -> Result<Self, KeyError> {
        let invalid = |reason: &str| KeyError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };
        if template.trim().is_empty() {
            return Err(invalid("a key must select at least one field"));
        }

        let document = ast::Document::parse(format!("{{ {template} }}"), "key.graphql")
            .map_err(|invalid_document| invalid(&invalid_document.errors.to_string()))?;
        let mut operations = document.definitions.iter().filter_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        });
        let operation = match (operations.next(), operations.next()) {
            (Some(operation), None) if document.definitions.len() == 1 => operation,
            _ => return Err(invalid("a key must be a single selection set")),
        };

        let fields = Self::build_fields(&operation.selection_set, &invalid)?;
        Ok(Self::from_fields(fields))
    }

    fn build_fields(
        selections: &[ast::Selection],
        invalid: &dyn Fn(&str) -> KeyError,
    ) -> Result<Vec<KeyField>, KeyError> {
        let mut fields: BTreeMap<String, Vec<KeyField>> = BTreeMap::new();
        for selection in selections {
            let ast::Selection::Field(field) = selection else {
                return Err(invalid("fragments are not allowed in keys"));
            };
            if field.alias.is_some() {
                return Err(invalid("aliases are not allowed in keys"));
            }
            if !field.arguments.is_empty() {
                return Err(invalid("arguments are not allowed in keys"));
            }
            if !field.directives.is_empty() {
                return Err(invalid("directives are not allowed in keys"));
            }
            let nested = Self::build_fields(&field.selection_set, invalid)?;
            fields
                .entry(field.name.as_str().to_string())
                .or_default()
                .extend(nested);
        }
        Ok(fields
            .into_iter()
            .map(|(name, nested)| KeyField {
                name,
                selections: Self::canonicalize(nested),
            })
            .collect())
    }

    /// Merges duplicate nested fields and sorts them by name.
    fn canonicalize(fields: Vec<KeyField>) -> Vec<KeyField> {
        let mut merged: BTreeMap<String, Vec<KeyField>> = BTreeMap::new();
        for field in fields {
            merged.entry(field.name).or_default().extend(field.selections);
        }
        merged
            .into_iter()
            .map(|(name, nested)| KeyField {
                name,
                selections: Self::canonicalize(nested),
            })
            .collect()
    }

    fn from_fields(fields: Vec<KeyField>) -> Self {
        let mut definition = String::new();
        write_fields(&fields, &mut definition);
        Key { fields, definition }
    }

    /// The canonical definition of this key.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// The top-level key fields.
    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    /// Whether a location selecting `available` fields of the entity type can
    /// export this key.
    pub fn is_exportable_from(&self, mut available: impl FnMut(&str) -> bool) -> bool {
        self.fields.iter().all(|field| available(field.name()))
    }

    /// The aliased selections capturing this key's values, followed by the
    /// `__typename` export.
    pub(crate) fn export_nodes(&self) -> Vec<Selection> {
        let mut nodes: Vec<Selection> = self
            .fields
            .iter()
            .map(|field| {
                Selection::Field(Field {
                    alias: Some(format!("{EXPORT_PREFIX}{}", field.name)),
                    name: field.name.clone(),
                    arguments: String::new(),
                    directives: String::new(),
                    selections: Self::plain_nodes(&field.selections),
                })
            })
            .collect();
        nodes.push(Selection::typename_hint());
        nodes
    }

    fn plain_nodes(fields: &[KeyField]) -> Option<Vec<Selection>> {
        if fields.is_empty() {
            return None;
        }
        Some(
            fields
                .iter()
                .map(|field| {
                    Selection::Field(Field {
                        alias: None,
                        name: field.name.clone(),
                        arguments: String::new(),
                        directives: String::new(),
                        selections: Self::plain_nodes(&field.selections),
                    })
                })
                .collect(),
        )
    }

    /// Checks the key against the fields of `type_name` in `schema`.
    pub fn validate(&self, schema: &Schema, type_name: &str) -> Result<(), KeyError> {
        Self::validate_fields(&self.fields, schema, type_name)
    }

    fn validate_fields(fields: &[KeyField], schema: &Schema, type_name: &str) -> Result<(), KeyError> {
        for field in fields {
            if field.name == TYPENAME {
                continue;
            }
            let definition = match schema.types.get(type_name) {
                Some(ExtendedType::Object(object)) => object.fields.get(field.name.as_str()),
                Some(ExtendedType::Interface(interface)) => interface.fields.get(field.name.as_str()),
                _ => None,
            }
            .ok_or_else(|| KeyError::UnknownField {
                type_name: type_name.to_string(),
                field: field.name.clone(),
            })?;

            let field_type = definition.ty.inner_named_type().as_str();
            let composite = matches!(
                schema.types.get(field_type),
                Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
            );
            match (composite, field.selections.is_empty()) {
                (true, true) => {
                    return Err(KeyError::MissingSelections {
                        type_name: type_name.to_string(),
                        field: field.name.clone(),
                    })
                }
                (false, false) => {
                    return Err(KeyError::UnexpectedSelections {
                        type_name: type_name.to_string(),
                        field: field.name.clone(),
                    })
                }
                (true, false) => Self::validate_fields(&field.selections, schema, field_type)?,
                (false, true) => {}
            }
        }
        Ok(())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.definition == other.definition
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.definition.hash(state)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.definition).finish()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.definition)
    }
}

impl TryFrom<String> for Key {
    type Error = KeyError;

    fn try_from(template: String) -> Result<Self, Self::Error> {
        Key::parse(&template)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_planner::selection::render;

    #[test]
    fn test_key_canonicalization() {
        let key = Key::parse("sku id").unwrap();
        assert_eq!(key.definition(), "id sku");
        assert_eq!(key, Key::parse("id sku").unwrap());
        assert_eq!(key, Key::parse("id sku id").unwrap());
        assert_eq!(Key::parse(key.definition()).unwrap(), key);
    }

    #[test]
    fn test_nested_key_canonicalization() {
        let key = Key::parse("owner { name id } id owner { id }").unwrap();
        assert_eq!(key.definition(), "id owner { id name }");
        assert_eq!(Key::parse(key.definition()).unwrap(), key);
        assert_eq!(key.fields()[1].selections().len(), 2);
    }

    #[test]
    fn test_invalid_templates() {
        for template in [
            "",
            "   ",
            "alias: id",
            "id(format: SHORT)",
            "id @tag",
            "... on Product { id }",
            "{ id }",
            "id {",
        ] {
            assert!(
                matches!(Key::parse(template), Err(KeyError::InvalidTemplate { .. })),
                "{template} should be rejected"
            );
        }
    }

    #[test]
    fn test_export_nodes() {
        let key = Key::parse("upc owner { id }").unwrap();
        insta::assert_snapshot!(
            render(&key.export_nodes()),
            @"{ _export_owner: owner { id } _export_upc: upc _export___typename: __typename }"
        );
    }

    #[test]
    fn test_key_serde() {
        let key: Key = serde_json::from_str(r#""sku id""#).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""id sku""#);
        assert!(serde_json::from_str::<Key>(r#""a: b""#).is_err());
    }

    #[test]
    fn test_key_validation() {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { product(upc: ID!): Product }
            type Product { upc: ID! owner: User name: String }
            type User { id: ID! }
            "#,
            "schema.graphql",
        )
        .unwrap();

        assert!(Key::parse("upc").unwrap().validate(&schema, "Product").is_ok());
        assert!(Key::parse("upc owner { id }").unwrap().validate(&schema, "Product").is_ok());
        assert_eq!(
            Key::parse("sku").unwrap().validate(&schema, "Product"),
            Err(KeyError::UnknownField {
                type_name: "Product".to_string(),
                field: "sku".to_string()
            })
        );
        assert_eq!(
            Key::parse("owner").unwrap().validate(&schema, "Product"),
            Err(KeyError::MissingSelections {
                type_name: "Product".to_string(),
                field: "owner".to_string()
            })
        );
        assert_eq!(
            Key::parse("upc { id }").unwrap().validate(&schema, "Product"),
            Err(KeyError::UnexpectedSelections {
                type_name: "Product".to_string(),
                field: "upc".to_string()
            })
        );
    }
}
