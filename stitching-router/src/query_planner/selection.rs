use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::resolver::key::TYPENAME_EXPORT;
use crate::spec::TYPENAME;

/// A selection sent to a location as part of a step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub(crate) enum Selection {
    /// A field selection.
    Field(Field),

    /// An inline fragment selection.
    InlineFragment(InlineFragment),
}

/// The field that is used
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Field {
    /// An optional alias for the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) alias: Option<String>,

    /// The name of the field.
    pub(crate) name: String,

    /// Rendered arguments, including their parentheses, or empty.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub(crate) arguments: String,

    /// Rendered directives, or empty.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub(crate) directives: String,

    /// The selections for the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) selections: Option<Vec<Selection>>,
}

/// An inline fragment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineFragment {
    /// The required fragment type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) type_condition: Option<String>,

    /// The selections from the fragment.
    pub(crate) selections: Vec<Selection>,
}

impl Selection {
    /// `_export___typename: __typename`
    pub(crate) fn typename_hint() -> Self {
        Selection::Field(Field {
            alias: Some(TYPENAME_EXPORT.to_string()),
            name: TYPENAME.to_string(),
            arguments: String::new(),
            directives: String::new(),
            selections: None,
        })
    }
}

/// Appends the nodes that `target` does not hold yet.
pub(crate) fn push_unique(target: &mut Vec<Selection>, nodes: impl IntoIterator<Item = Selection>) {
    for node in nodes {
        if !target.contains(&node) {
            target.push(node);
        }
    }
}

/// Renders a selection set as `{ a b: c(x: 1) { d } ... on T { e } }`.
pub(crate) fn render(selections: &[Selection]) -> String {
    let mut out = String::new();
    write_selection_set(&mut out, selections);
    out
}

fn write_selection_set(out: &mut String, selections: &[Selection]) {
    if selections.is_empty() {
        // an empty selection set is not valid GraphQL
        out.push_str("{ __typename }");
        return;
    }
    out.push_str("{ ");
    for (index, selection) in selections.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    out.push_str(alias);
                    out.push_str(": ");
                }
                out.push_str(&field.name);
                out.push_str(&field.arguments);
                if !field.directives.is_empty() {
                    out.push(' ');
                    out.push_str(&field.directives);
                }
                if let Some(selections) = &field.selections {
                    out.push(' ');
                    write_selection_set(out, selections);
                }
            }
            Selection::InlineFragment(fragment) => {
                out.push_str("...");
                if let Some(type_condition) = &fragment.type_condition {
                    out.push_str(" on ");
                    out.push_str(type_condition);
                }
                out.push(' ');
                write_selection_set(out, &fragment.selections);
            }
        }
    }
    out.push_str(" }");
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = render(std::slice::from_ref(self));
        // strip the enclosing braces
        f.write_str(&rendered[2..rendered.len() - 2])
    }
}
