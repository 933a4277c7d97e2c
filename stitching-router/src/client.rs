//! The request pipeline: prepare, plan, execute, shape.

use std::sync::Arc;

use tracing_futures::Instrument;

use crate::error::QueryPlannerError;
use crate::executor::Executor;
use crate::graphql;
use crate::query_planner::Planner;
use crate::query_planner::QueryPlan;
use crate::shaper::Shaper;
use crate::spec::Query;
use crate::supergraph::Supergraph;
use crate::Configuration;
use crate::Context;

pub(crate) const EXECUTE_SPAN_NAME: &str = "execute";

/// Context key holding the number of documents sent to locations for the request.
pub const QUERY_COUNT_CONTEXT_KEY: &str = "stitching::query_count";

/// Answers GraphQL requests against a [`Supergraph`].
///
/// Cheap to clone; plans are computed for every request.
#[derive(Clone, Debug)]
pub struct Client {
    supergraph: Arc<Supergraph>,
    configuration: Arc<Configuration>,
}

#[buildstructor::buildstructor]
impl Client {
    /// Returns a builder for a client.
    ///
    /// Builder methods:
    ///
    /// * `.supergraph(impl Into<Arc<Supergraph>>)`
    ///   Required.
    ///
    /// * `.configuration(Configuration)`
    ///   Optional, defaults to [`Configuration::default`].
    #[builder(visibility = "pub")]
    fn new(supergraph: Arc<Supergraph>, configuration: Option<Configuration>) -> Self {
        Self {
            supergraph,
            configuration: Arc::new(configuration.unwrap_or_default()),
        }
    }

    pub fn supergraph(&self) -> &Supergraph {
        &self.supergraph
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Prepares and plans a request without executing it.
    pub fn plan(&self, request: &graphql::Request) -> Result<QueryPlan, QueryPlannerError> {
        let query = Query::parse(request, self.supergraph.schema())?;
        self.plan_query(&query)
    }

    fn plan_query(&self, query: &Query) -> Result<QueryPlan, QueryPlannerError> {
        let plan = Planner::new(
            &self.supergraph,
            query,
            self.configuration.planning.max_steps,
        )
        .plan()?;
        tracing::trace!(operation = ?query.operation_name(), "query plan\n{}", plan);
        Ok(plan)
    }

    /// Runs a request end to end.
    ///
    /// Errors raised before any location is called produce a response without
    /// `data`. Location failures are reported in `errors` next to the data
    /// that could be resolved.
    pub async fn execute(&self, request: graphql::Request, context: Context) -> graphql::Response {
        let query = match Query::parse(&request, self.supergraph.schema()) {
            Ok(query) => query,
            Err(err) => return Self::error_response(err.into()),
        };
        let plan = match self.plan_query(&query) {
            Ok(plan) => plan,
            Err(err) => return Self::error_response(err),
        };

        let result = Executor::new(
            &self.supergraph,
            &query,
            &context,
            self.configuration.execution.nonblocking,
        )
        .execute(&plan)
        .instrument(tracing::info_span!(
            EXECUTE_SPAN_NAME,
            "stitching.operation.name" = query.operation_name().unwrap_or_default(),
            "stitching.operation.kind" = %query.kind(),
            "otel.kind" = "INTERNAL"
        ))
        .await;

        tracing::debug!(query_count = result.query_count, "request executed");
        if let Err(err) = context.insert(QUERY_COUNT_CONTEXT_KEY, result.query_count) {
            failfast_debug!("could not record query count: {}", err);
        }

        let data = Shaper::new(&self.supergraph, &query).shape(&result.data);
        graphql::Response::builder()
            .data(data)
            .errors(result.errors)
            .build()
    }

    fn error_response(err: QueryPlannerError) -> graphql::Response {
        tracing::debug!(error = %err, "request could not be planned");
        graphql::Response::builder()
            .error(err.into_graphql_error())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use serde_json_bytes::json;
    use tower::BoxError;

    use super::*;
    use crate::services::SubgraphRequest;
    use crate::supergraph::tests::storefronts_supergraph;

    fn counting(
        count: &Arc<AtomicUsize>,
        response: serde_json_bytes::Value,
    ) -> impl tower::Service<
        SubgraphRequest,
        Response = graphql::Response,
        Error = BoxError,
        Future = futures::future::Ready<Result<graphql::Response, BoxError>>,
    > + Clone {
        let count = count.clone();
        tower::service_fn(move |_request: SubgraphRequest| {
            count.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(serde_json_bytes::from_value::<graphql::Response>(
                response.clone(),
            )
            .unwrap()))
        })
    }

    fn client(storefronts: &Arc<AtomicUsize>, products: &Arc<AtomicUsize>) -> Client {
        let supergraph = storefronts_supergraph()
            .with_service(
                "storefronts",
                counting(
                    storefronts,
                    json!({ "data": { "storefront": { "name": "Shop", "products": [
                        { "_export_upc": "1", "_export___typename": "Product" },
                    ] } } }),
                ),
            )
            .with_service(
                "products",
                counting(
                    products,
                    json!({ "data": { "_0_0_result": { "name": "Table", "price": 10 } } }),
                ),
            );
        Client::builder().supergraph(Arc::new(supergraph)).build()
    }

    #[tokio::test]
    async fn test_execute() {
        let storefronts = Arc::new(AtomicUsize::new(0));
        let products = Arc::new(AtomicUsize::new(0));
        let context = Context::new();
        let response = client(&storefronts, &products)
            .execute(
                graphql::Request::builder()
                    .query(r#"{ storefront(id: "1") { name products { name price } } }"#)
                    .build(),
                context.clone(),
            )
            .await;

        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "storefront": {
              "name": "Shop",
              "products": [
                {
                  "name": "Table",
                  "price": 10
                }
              ]
            }
          }
        }
        "###);
        assert_eq!(storefronts.load(Ordering::SeqCst), 1);
        assert_eq!(products.load(Ordering::SeqCst), 1);
        assert_eq!(
            context.get::<_, usize>(QUERY_COUNT_CONTEXT_KEY).unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_invalid_request_calls_no_location() {
        let storefronts = Arc::new(AtomicUsize::new(0));
        let products = Arc::new(AtomicUsize::new(0));
        let response = client(&storefronts, &products)
            .execute(
                graphql::Request::builder()
                    .query(r#"{ storefront(id: "1") { sku } }"#)
                    .build(),
                Context::new(),
            )
            .await;

        assert_eq!(response.data, None);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].extension_code(),
            Some("GRAPHQL_VALIDATION_FAILED")
        );
        assert_eq!(storefronts.load(Ordering::SeqCst), 0);
        assert_eq!(products.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_planning_error_is_reported() {
        let storefronts = Arc::new(AtomicUsize::new(0));
        let products = Arc::new(AtomicUsize::new(0));
        let response = client(&storefronts, &products)
            .execute(
                graphql::Request::builder()
                    .query(r#"{ storefront(id: "1") { _export_id: id } }"#)
                    .build(),
                Context::new(),
            )
            .await;

        assert_eq!(response.data, None);
        assert_eq!(response.errors[0].extension_code(), Some("RESERVED_ALIAS"));
        assert_eq!(storefronts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plan() {
        let storefronts = Arc::new(AtomicUsize::new(0));
        let products = Arc::new(AtomicUsize::new(0));
        let client = client(&storefronts, &products);
        let plan = client
            .plan(
                &graphql::Request::builder()
                    .query(r#"{ storefront(id: "1") { products { price } } }"#)
                    .build(),
            )
            .unwrap();
        assert_eq!(plan.ops().len(), 2);
        assert_eq!(plan.ops()[1].after, Some(0));
        assert_eq!(plan.ops()[1].location, "products");

        let err = client
            .plan(&graphql::Request::builder().query("{ storefront").build())
            .unwrap_err();
        assert!(matches!(err, QueryPlannerError::SpecError(_)));
        assert_eq!(storefronts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_configuration_defaults() {
        let client = Client::builder()
            .supergraph(Arc::new(storefronts_supergraph()))
            .build();
        assert_eq!(client.configuration(), &Configuration::default());
    }
}
