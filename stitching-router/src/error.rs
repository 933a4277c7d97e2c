//! Stitching errors.
use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
pub use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::json_ext::Object;
use crate::json_ext::Value;
pub use crate::resolver::arguments::ArgumentError;
pub use crate::resolver::key::KeyError;
pub use crate::spec::SpecError;
pub use crate::supergraph::SupergraphError;

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead converted to JSON for
/// [`struct@Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// location '{location}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The location that responded with the malformed response.
        location: String,

        /// The reason the response could not be used.
        reason: String,
    },

    /// fetch failed from '{location}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        /// The location that failed.
        location: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// no service is bound to location '{location}'
    UnknownLocation {
        /// The location without a service.
        location: String,
    },
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::UnknownLocation { .. } => "UNKNOWN_LOCATION",
        }
        .to_string()
    }

    fn custom_extension_details(&self) -> Option<Object> {
        match serde_json_bytes::to_value(self) {
            Ok(Value::Object(mut details)) => {
                details.remove("reason");
                Some(details)
            }
            _ => None,
        }
    }
}

/// An error while building a query plan.
///
/// Planning errors are fatal for the request: no location is called.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PlanningError {
    /// no route from location '{from}' to location '{to}' for type '{type_name}'
    NoRoute {
        /// The type being resolved.
        type_name: String,
        /// The location holding the origin objects.
        from: String,
        /// The location serving the requested fields.
        to: String,
    },

    /// alias '{0}' uses the reserved '_export_' prefix
    ReservedAlias(String),

    /// no location serves field '{type_name}.{field}'
    UnservedField {
        /// The parent type.
        type_name: String,
        /// The field name.
        field: String,
    },

    /// the supergraph has no root type for {0} operations
    MissingRootType(String),

    /// fragment '{0}' is not defined
    UnknownFragment(String),

    /// plan exceeds the limit of {0} steps
    TooManySteps(usize),
}

impl ErrorExtension for PlanningError {
    fn extension_code(&self) -> String {
        match self {
            PlanningError::NoRoute { .. } => "NO_ROUTE",
            PlanningError::ReservedAlias(_) => "RESERVED_ALIAS",
            PlanningError::UnservedField { .. } => "UNSERVED_FIELD",
            PlanningError::MissingRootType(_) => "MISSING_ROOT_TYPE",
            PlanningError::UnknownFragment(_) => "UNKNOWN_FRAGMENT",
            PlanningError::TooManySteps(_) => "TOO_MANY_STEPS",
        }
        .to_string()
    }
}

/// An error preventing a request from being planned.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryPlannerError {
    /// {0}
    SpecError(SpecError),

    /// {0}
    PlanningError(PlanningError),
}

impl From<SpecError> for QueryPlannerError {
    fn from(err: SpecError) -> Self {
        QueryPlannerError::SpecError(err)
    }
}

impl From<PlanningError> for QueryPlannerError {
    fn from(err: PlanningError) -> Self {
        QueryPlannerError::PlanningError(err)
    }
}

impl ErrorExtension for QueryPlannerError {
    fn extension_code(&self) -> String {
        match self {
            QueryPlannerError::SpecError(err) => err.extension_code(),
            QueryPlannerError::PlanningError(err) => err.extension_code(),
        }
    }
}

impl QueryPlannerError {
    /// The GraphQL error reported to the client.
    pub fn into_graphql_error(self) -> Error {
        self.to_graphql_error(None)
    }
}
