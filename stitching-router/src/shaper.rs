//! Reconciles the merged result tree with the client's selections.

use serde_json_bytes::ByteString;
use apollo_compiler::ast;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::resolver::key::TYPENAME_EXPORT;
use crate::spec::response_key;
use crate::spec::InvalidValue;
use crate::spec::Query;
use crate::spec::Selection;
use crate::spec::TYPENAME;
use crate::supergraph::Supergraph;

const INTROSPECTION_FIELDS: [&str; 2] = ["__schema", "__type"];

/// Rebuilds the response `data` from the raw result tree.
///
/// Output objects only carry the requested response keys, in request order, so
/// exported key fields never reach the client. A null in a non-null position
/// invalidates its parent, up to the closest nullable ancestor.
pub(crate) struct Shaper<'a> {
    supergraph: &'a Supergraph,
    query: &'a Query,
}

impl<'a> Shaper<'a> {
    pub(crate) fn new(supergraph: &'a Supergraph, query: &'a Query) -> Self {
        Self { supergraph, query }
    }

    pub(crate) fn shape(&self, data: &Value) -> Value {
        let Some(input) = data.as_object() else {
            return Value::Null;
        };
        let operation = &self.query.operation;
        let mut output = Object::new();
        match self.apply_selection_set(
            &operation.selection_set,
            input,
            &mut output,
            &operation.type_name,
            true,
        ) {
            Ok(()) => Value::Object(output),
            Err(InvalidValue) => Value::Null,
        }
    }

    fn apply_selection_set(
        &self,
        selection_set: &[Selection],
        input: &Object,
        output: &mut Object,
        type_name: &str,
        is_root: bool,
    ) -> Result<(), InvalidValue> {
        for selection in selection_set {
            match selection {
                Selection::Field {
                    name,
                    alias,
                    selection_set,
                    field_type,
                    ..
                } => {
                    let key = response_key(name, alias.as_ref());
                    if name == TYPENAME {
                        let typename = if is_root {
                            Value::String(self.query.kind().default_type_name().into())
                        } else {
                            input
                                .get(key)
                                .filter(|value| value.is_string())
                                .cloned()
                                .unwrap_or_else(|| Value::String(type_name.into()))
                        };
                        output.insert::<ByteString>(key.into(), typename);
                        continue;
                    }
                    if INTROSPECTION_FIELDS.contains(&name.as_str()) {
                        output.insert::<ByteString>(key.into(), input.get(key).cloned().unwrap_or_default());
                        continue;
                    }

                    let input_value = input.get(key).unwrap_or(&Value::Null);
                    let output_value = output.entry(key).or_insert(Value::Null);
                    self.format_value(&field_type.0, input_value, output_value, selection_set)?;
                }
                Selection::InlineFragment {
                    type_condition,
                    selection_set,
                } => {
                    let applies = type_condition
                        .as_deref()
                        .map(|condition| self.supergraph.is_possible_type(condition, type_name))
                        .unwrap_or(true);
                    if applies {
                        self.apply_selection_set(selection_set, input, output, type_name, is_root)?;
                    }
                }
                Selection::FragmentSpread { name } => {
                    let Some(fragment) = self.query.fragments.get(name) else {
                        failfast_debug!("missing fragment named: {}", name);
                        continue;
                    };
                    if self
                        .supergraph
                        .is_possible_type(&fragment.type_condition, type_name)
                    {
                        self.apply_selection_set(
                            &fragment.selection_set,
                            input,
                            output,
                            type_name,
                            is_root,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes `input` into `output` following the declared type.
    ///
    /// Nullable positions absorb invalid values by becoming null and return
    /// `Ok`; non-null positions return `InvalidValue` so that the caller
    /// nullifies itself.
    fn format_value(
        &self,
        field_type: &ast::Type,
        input: &Value,
        output: &mut Value,
        selection_set: &[Selection],
    ) -> Result<(), InvalidValue> {
        match field_type {
            ast::Type::NonNullNamed(type_name) => {
                self.format_named(type_name.as_str(), input, output, selection_set);
                if output.is_null() {
                    return Err(InvalidValue);
                }
                Ok(())
            }
            ast::Type::NonNullList(item_type) => {
                self.format_list(item_type, input, output, selection_set);
                if output.is_null() {
                    return Err(InvalidValue);
                }
                Ok(())
            }
            ast::Type::Named(type_name) => {
                self.format_named(type_name.as_str(), input, output, selection_set);
                Ok(())
            }
            ast::Type::List(item_type) => {
                self.format_list(item_type, input, output, selection_set);
                Ok(())
            }
        }
    }

    fn format_list(
        &self,
        item_type: &ast::Type,
        input: &Value,
        output: &mut Value,
        selection_set: &[Selection],
    ) {
        let Value::Array(input_array) = input else {
            *output = Value::Null;
            return;
        };
        let reuse = matches!(output, Value::Array(existing) if existing.len() == input_array.len());
        if !reuse {
            *output = Value::Array(vec![Value::Null; input_array.len()]);
        }
        let Value::Array(output_array) = output else {
            return;
        };
        let result = input_array
            .iter()
            .zip(output_array.iter_mut())
            .try_for_each(|(element, output_element)| {
                self.format_value(item_type, element, output_element, selection_set)
            });
        if result.is_err() {
            *output = Value::Null;
        }
    }

    fn format_named(
        &self,
        type_name: &str,
        input: &Value,
        output: &mut Value,
        selection_set: &[Selection],
    ) {
        if self.supergraph.is_leaf(type_name) {
            *output = input.clone();
            return;
        }
        let Value::Object(input_object) = input else {
            *output = Value::Null;
            return;
        };
        // the captured typename wins over the declared type
        let typename = input_object
            .get(TYPENAME)
            .or_else(|| input_object.get(TYPENAME_EXPORT))
            .and_then(Value::as_str)
            .unwrap_or(type_name)
            .to_string();

        if !output.is_object() {
            *output = Value::Object(Object::new());
        }
        let Value::Object(output_object) = output else {
            return;
        };
        if self
            .apply_selection_set(selection_set, input_object, output_object, &typename, false)
            .is_err()
        {
            *output = Value::Null;
        }
    }
}
