//! Preparation of client operations against the supergraph schema.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod field_type;
mod fragments;
pub(crate) mod query;
mod selection;

use displaydoc::Display;
pub(crate) use field_type::*;
pub(crate) use fragments::*;
pub use query::Query;
pub(crate) use selection::*;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::graphql::ErrorExtension;

pub(crate) const TYPENAME: &str = "__typename";

/// GraphQL document errors.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SpecError {
    /// must provide query string
    MissingQuery,
    /// parsing error: {0}
    ParsingError(String),
    /// validation error: {0}
    ValidationError(String),
    /// unknown operation named "{0}"
    UnknownOperation(String),
    /// must provide operation name if query contains multiple operations
    OperationNameRequired,
    /// missing value for required variable '{0}'
    MissingVariable(String),
    /// subscription operation is not supported
    SubscriptionNotSupported,
    /// selection processing recursion limit exceeded
    RecursionLimitExceeded,
}

impl ErrorExtension for SpecError {
    fn extension_code(&self) -> String {
        match self {
            SpecError::MissingQuery => "MISSING_QUERY_STRING",
            SpecError::ParsingError(_) => "GRAPHQL_PARSE_FAILED",
            SpecError::ValidationError(_) => "GRAPHQL_VALIDATION_FAILED",
            SpecError::UnknownOperation(_) => "GRAPHQL_VALIDATION_FAILED",
            SpecError::OperationNameRequired => "GRAPHQL_VALIDATION_FAILED",
            SpecError::MissingVariable(_) => "VALIDATION_INVALID_TYPE_VARIABLE",
            SpecError::SubscriptionNotSupported => "SUBSCRIPTION_NOT_SUPPORTED",
            SpecError::RecursionLimitExceeded => "RECURSION_LIMIT_EXCEEDED",
        }
        .to_string()
    }
}
