//! The seam between the executor and the services behind each location.

use std::fmt;

use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;
use tower::util::BoxService;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::graphql;
use crate::json_ext::Object;
use crate::Context;

/// A sub-query sent to one location.
#[non_exhaustive]
pub struct SubgraphRequest {
    /// The location the document is sent to.
    pub location: String,

    /// The GraphQL document.
    pub document: String,

    /// The variables of the document.
    pub variables: Object,

    /// Context of the supergraph request.
    pub context: Context,
}

#[buildstructor::buildstructor]
impl SubgraphRequest {
    /// This is the constructor (or builder) to use when constructing a real SubgraphRequest.
    #[builder(visibility = "pub")]
    fn new(
        location: String,
        document: String,
        // Skip the `Object` type alias in order to use buildstructor’s map special-casing
        variables: JsonMap<ByteString, Value>,
        context: Context,
    ) -> Self {
        Self {
            location,
            document,
            variables,
            context,
        }
    }
}

impl fmt::Debug for SubgraphRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubgraphRequest")
            .field("location", &self.location)
            .field("document", &self.document)
            .field("variables", &self.variables)
            .finish()
    }
}

/// The service called for each document sent to a location.
pub type LocationService = BoxService<SubgraphRequest, graphql::Response, BoxError>;

/// make new instances of the location service
///
/// there can be multiple instances of that service executing at any given time
pub trait MakeLocationService: Send + Sync + 'static {
    fn make(&self) -> LocationService;
}

impl<S> MakeLocationService for S
where
    S: Service<SubgraphRequest, Response = graphql::Response, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    <S as Service<SubgraphRequest>>::Future: Send,
{
    fn make(&self) -> LocationService {
        self.clone().boxed()
    }
}
