use std::fmt;

use apollo_compiler::ast;

#[derive(Debug)]
pub(crate) struct InvalidValue;

/// The declared type of a selected field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FieldType(pub(crate) ast::Type);

impl FieldType {
    pub(crate) fn inner_type_name(&self) -> &str {
        self.0.inner_named_type().as_str()
    }
}

impl From<&ast::Type> for FieldType {
    fn from(ty: &ast::Type) -> Self {
        Self(ty.clone())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
