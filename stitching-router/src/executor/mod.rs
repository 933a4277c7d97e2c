//! Plan execution.
//!
//! Ops run tier by tier. The ops of a tier that share a location and a
//! resolver are coalesced into one document; each root op gets its own. Once
//! every document of a tier has answered, results are merged into the shared
//! result tree and errors are mapped onto it.

mod batch;

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use tower::ServiceExt;
use tracing_futures::Instrument;

use self::batch::Document;
use self::batch::Origin;
use self::batch::ResolverBatch;
use crate::error::FetchError;
use crate::graphql;
use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::query_planner::Op;
use crate::query_planner::QueryPlan;
use crate::query_planner::FETCH_SPAN_NAME;
use crate::query_planner::TIER_SPAN_NAME;
use crate::resolver::key::TYPENAME_EXPORT;
use crate::resolver::Resolver;
use crate::services::SubgraphRequest;
use crate::spec::Query;
use crate::spec::TYPENAME;
use crate::supergraph::Supergraph;
use crate::Context;

/// The merged result tree and the errors collected while building it.
#[derive(Debug)]
pub(crate) struct ExecutionResult {
    pub(crate) data: Value,
    pub(crate) errors: Vec<Error>,
    /// Number of documents sent to locations.
    pub(crate) query_count: usize,
}

/// Where the results of a document go.
enum Target<'a> {
    Root {
        op: &'a Op,
        /// Objects at the op path, or none to merge at the root.
        origins: Option<Vec<Path>>,
    },
    Resolver {
        resolver: Arc<Resolver>,
        batches: Vec<ResolverBatch<'a>>,
    },
}

struct Dispatch<'a> {
    location: String,
    document: Document,
    target: Target<'a>,
}

/// Runs one plan for one request.
pub(crate) struct Executor<'a> {
    supergraph: &'a Supergraph,
    query: &'a Query,
    context: &'a Context,
    nonblocking: bool,
    data: Value,
    errors: Vec<Error>,
    completed: Vec<bool>,
    query_count: AtomicUsize,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        supergraph: &'a Supergraph,
        query: &'a Query,
        context: &'a Context,
        nonblocking: bool,
    ) -> Self {
        Self {
            supergraph,
            query,
            context,
            nonblocking,
            data: Value::Object(Object::new()),
            errors: Vec::new(),
            completed: Vec::new(),
            query_count: AtomicUsize::new(0),
        }
    }

    pub(crate) async fn execute(mut self, plan: &'a QueryPlan) -> ExecutionResult {
        self.completed = vec![false; plan.ops().len()];

        for (depth, tier) in plan.tiers().into_iter().enumerate() {
            let dispatches = self.prepare_tier(tier);
            if dispatches.is_empty() {
                continue;
            }
            let responses = self
                .dispatch(&dispatches)
                .instrument(tracing::info_span!(
                    TIER_SPAN_NAME,
                    "stitching.tier" = depth,
                    "otel.kind" = "INTERNAL"
                ))
                .await;
            for (dispatch, response) in dispatches.into_iter().zip(responses) {
                self.merge(dispatch, response);
            }
        }

        ExecutionResult {
            data: self.data,
            errors: self.errors,
            query_count: self.query_count.load(Ordering::SeqCst),
        }
    }

    /// Builds the documents of a tier from the current result tree.
    fn prepare_tier(&self, tier: Vec<&'a Op>) -> Vec<Dispatch<'a>> {
        let operation_name = self.query.operation_name();
        let mut dispatches = Vec::new();
        let mut groups: IndexMap<(String, String), (Arc<Resolver>, Vec<ResolverBatch<'a>>)> =
            IndexMap::new();

        for op in tier {
            if let Some(after) = op.after {
                if !self.completed.get(after).copied().unwrap_or_default() {
                    tracing::debug!(step = op.step, after, "skipping op extending an incomplete op");
                    continue;
                }
            }

            match &op.resolver {
                None => {
                    let origins = if op.path.is_empty() {
                        None
                    } else {
                        let mut paths = Vec::new();
                        self.data.select_values_and_paths(&op.path, |path, object| {
                            if self.matches_type_condition(op, object) {
                                paths.push(path.clone());
                            }
                        });
                        if paths.is_empty() {
                            tracing::debug!(step = op.step, "no object to extend, skipping op");
                            continue;
                        }
                        Some(paths)
                    };
                    let document = batch::root_document(
                        op,
                        operation_name,
                        &self.query.operation.rendered_directives(),
                        &self.query.variables,
                    );
                    dispatches.push(Dispatch {
                        location: op.location.clone(),
                        document,
                        target: Target::Root { op, origins },
                    });
                }
                Some(version) => {
                    let Some(resolver) = self.supergraph.resolver(version) else {
                        failfast_error!("no resolver with version {version} in the supergraph");
                        continue;
                    };
                    let mut origins = Vec::new();
                    self.data.select_values_and_paths(&op.path, |path, object| {
                        if self.matches_type_condition(op, object) {
                            if let Some(origin) = Origin::build(path, object, resolver) {
                                origins.push(origin);
                            }
                        }
                    });
                    if origins.is_empty() {
                        tracing::debug!(step = op.step, "no object to extend, skipping op");
                        continue;
                    }
                    groups
                        .entry((op.location.clone(), version.to_string()))
                        .or_insert_with(|| (resolver.clone(), Vec::new()))
                        .1
                        .push(ResolverBatch { op, origins });
                }
            }
        }

        for ((location, _), (resolver, batches)) in groups {
            let document = batch::resolver_document(
                &resolver,
                &batches,
                operation_name,
                &self.query.variables,
            );
            dispatches.push(Dispatch {
                location,
                document,
                target: Target::Resolver { resolver, batches },
            });
        }
        dispatches
    }

    fn matches_type_condition(&self, op: &Op, object: &Object) -> bool {
        let Some(type_condition) = &op.type_condition else {
            return true;
        };
        object
            .get(TYPENAME_EXPORT)
            .or_else(|| object.get(TYPENAME))
            .and_then(|typename| typename.as_str())
            .map(|typename| self.supergraph.is_possible_type(type_condition, typename))
            .unwrap_or_default()
    }

    async fn dispatch(&self, dispatches: &[Dispatch<'a>]) -> Vec<Result<graphql::Response, FetchError>> {
        if self.nonblocking {
            join_all(dispatches.iter().map(|dispatch| self.fetch(dispatch))).await
        } else {
            let mut responses = Vec::with_capacity(dispatches.len());
            for dispatch in dispatches {
                responses.push(self.fetch(dispatch).await);
            }
            responses
        }
    }

    async fn fetch(&self, dispatch: &Dispatch<'a>) -> Result<graphql::Response, FetchError> {
        let location = dispatch.location.as_str();
        let service = self
            .supergraph
            .service(location)
            .ok_or_else(|| FetchError::UnknownLocation {
                location: location.to_string(),
            })?;
        self.query_count.fetch_add(1, Ordering::SeqCst);

        let request = SubgraphRequest::builder()
            .location(location)
            .document(dispatch.document.source.clone())
            .variables(dispatch.document.variables.clone())
            .context(self.context.clone())
            .build();
        tracing::trace!(location, document = %dispatch.document.source, "sending document");

        service
            .oneshot(request)
            .instrument(tracing::info_span!(
                FETCH_SPAN_NAME,
                "stitching.location" = %location,
                "otel.kind" = "INTERNAL"
            ))
            .await
            .map_err(|error| FetchError::SubrequestHttpError {
                location: location.to_string(),
                reason: error.to_string(),
            })
    }

    fn merge(&mut self, dispatch: Dispatch<'a>, response: Result<graphql::Response, FetchError>) {
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(location = %dispatch.location, "{error}");
                self.errors.push(error.to_graphql_error(None));
                return;
            }
        };
        let graphql::Response { data, errors, .. } = response;

        match dispatch.target {
            Target::Root { op, origins } => {
                if let Some(data) = data {
                    match origins {
                        None => self.data.deep_merge(data),
                        Some(paths) => {
                            for path in paths {
                                self.merge_at(&path, data.clone());
                            }
                        }
                    }
                }
                self.errors
                    .extend(errors.into_iter().map(|error| batch::repath_root_error(error, op)));
                self.completed[op.step] = true;
            }
            Target::Resolver { resolver, batches } => {
                match data {
                    None | Some(Value::Null) => {}
                    Some(Value::Object(data)) => {
                        for (path, value) in batch::scatter_results(&resolver, &batches, data) {
                            self.merge_at(&path, value);
                        }
                    }
                    Some(other) => {
                        let error = FetchError::SubrequestMalformedResponse {
                            location: dispatch.location.clone(),
                            reason: format!(
                                "invalid type {}, expected an object",
                                crate::json_ext::kind(&other)
                            ),
                        };
                        self.errors.push(error.to_graphql_error(None));
                        return;
                    }
                }
                self.errors.extend(
                    errors
                        .into_iter()
                        .map(|error| batch::repath_resolver_error(error, &batches)),
                );
                for batch in &batches {
                    self.completed[batch.op.step] = true;
                }
            }
        }
    }

    fn merge_at(&mut self, path: &Path, value: Value) {
        match self.data.get_path_mut(path) {
            Some(target) => target.deep_merge(value),
            None => {
                failfast_debug!("no value at {path} to merge results into");
            }
        }
    }
}
