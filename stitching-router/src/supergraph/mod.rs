//! Routing metadata of a stitched supergraph.
//!
//! The supergraph knows which locations serve each field, how each entity type
//! can be fetched by key at each location, and the service bound to each
//! location. It is read-only once built and shared by every request.

mod definition;
mod routing;

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use displaydoc::Display;
use indexmap::IndexSet;
use thiserror::Error;

pub use self::definition::STITCHING_DIRECTIVES;
use crate::error::ArgumentError;
use crate::error::KeyError;
use crate::query_planner::OperationKind;
use crate::resolver::Resolver;
use crate::resolver::ResolverVersion;
use crate::services::LocationService;
use crate::services::MakeLocationService;

/// Location of the fields only the supergraph itself can answer, such as
/// introspection.
pub const SUPERGRAPH_LOCATION: &str = "__super";

/// An invalid supergraph.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SupergraphError {
    /// invalid supergraph schema: {0}
    InvalidSchema(String),

    /// invalid @{directive} directive on '{coordinate}': {reason}
    InvalidDirective {
        /// The directive name.
        directive: String,
        /// The type or field carrying it.
        coordinate: String,
        /// What is wrong with it.
        reason: String,
    },

    /// resolver of type '{type_name}' at location '{location}' has an invalid key: {error}
    InvalidKey {
        /// The resolved type.
        type_name: String,
        /// The resolver location.
        location: String,
        /// The key error.
        error: KeyError,
    },

    /// resolver of type '{type_name}' at location '{location}' has invalid arguments: {error}
    InvalidArguments {
        /// The resolved type.
        type_name: String,
        /// The resolver location.
        location: String,
        /// The arguments error.
        error: ArgumentError,
    },

    /// type '{0}' is not defined in the supergraph schema
    UnknownType(String),
}

/// Routing metadata and location bindings of a stitched schema.
pub struct Supergraph {
    schema: Arc<Valid<Schema>>,
    /// type → field → locations serving it, in preference order
    fields: HashMap<String, HashMap<String, Vec<String>>>,
    /// type → location → fields served there
    fields_by_location: HashMap<String, HashMap<String, HashSet<String>>>,
    locations_by_type: HashMap<String, IndexSet<String>>,
    /// concrete or abstract type → resolvers able to return it
    resolvers: HashMap<String, Vec<Arc<Resolver>>>,
    resolvers_by_version: HashMap<ResolverVersion, Arc<Resolver>>,
    possible_types: HashMap<String, IndexSet<String>>,
    services: HashMap<String, Arc<dyn MakeLocationService>>,
}

#[buildstructor::buildstructor]
impl Supergraph {
    /// Returns a builder for a supergraph.
    ///
    /// `fields` maps each type to its fields and the locations serving them;
    /// `resolvers` maps each type to the resolvers declared for it.
    #[builder(visibility = "pub")]
    fn new(
        schema: Valid<Schema>,
        fields: HashMap<String, HashMap<String, Vec<String>>>,
        resolvers: HashMap<String, Vec<Resolver>>,
        services: HashMap<String, Arc<dyn MakeLocationService>>,
    ) -> Result<Self, SupergraphError> {
        let possible_types = Self::compute_possible_types(&schema);

        let mut fields_by_location: HashMap<String, HashMap<String, HashSet<String>>> =
            HashMap::new();
        let mut locations_by_type: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (type_name, type_fields) in &fields {
            if !schema.types.contains_key(type_name.as_str()) {
                return Err(SupergraphError::UnknownType(type_name.clone()));
            }
            for (field_name, locations) in type_fields {
                for location in locations {
                    fields_by_location
                        .entry(type_name.clone())
                        .or_default()
                        .entry(location.clone())
                        .or_default()
                        .insert(field_name.clone());
                    locations_by_type
                        .entry(type_name.clone())
                        .or_default()
                        .insert(location.clone());
                }
            }
        }
        // unions have no fields: they live wherever one of their members does
        for (type_name, extended) in &schema.types {
            if let ExtendedType::Union(union) = extended {
                let locations: BTreeSet<String> = union
                    .members
                    .iter()
                    .filter_map(|member| locations_by_type.get(member.as_str()))
                    .flatten()
                    .cloned()
                    .collect();
                locations_by_type.insert(type_name.to_string(), locations);
            }
        }

        let mut by_type: HashMap<String, Vec<Arc<Resolver>>> = HashMap::new();
        let mut resolvers_by_version = HashMap::new();
        let mut resolvers: Vec<_> = resolvers.into_iter().collect();
        resolvers.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (type_name, type_resolvers) in resolvers {
            if !schema.types.contains_key(type_name.as_str()) {
                return Err(SupergraphError::UnknownType(type_name));
            }
            for resolver in type_resolvers {
                let resolver = Arc::new(resolver);
                resolvers_by_version.insert(resolver.version().clone(), resolver.clone());
                let mut targets = vec![type_name.clone()];
                if let Some(concrete_types) = possible_types.get(&type_name) {
                    targets.extend(concrete_types.iter().filter(|t| **t != type_name).cloned());
                }
                for target in targets {
                    by_type.entry(target).or_default().push(resolver.clone());
                }
            }
        }

        Ok(Self {
            schema: Arc::new(schema),
            fields,
            fields_by_location,
            locations_by_type: locations_by_type
                .into_iter()
                .map(|(type_name, locations)| (type_name, locations.into_iter().collect()))
                .collect(),
            resolvers: by_type,
            resolvers_by_version,
            possible_types,
            services,
        })
    }
}

impl Supergraph {
    fn compute_possible_types(schema: &Schema) -> HashMap<String, IndexSet<String>> {
        let mut possible_types: HashMap<String, IndexSet<String>> = HashMap::new();
        for (type_name, extended) in &schema.types {
            match extended {
                ExtendedType::Object(object) => {
                    possible_types
                        .entry(type_name.to_string())
                        .or_default()
                        .insert(type_name.to_string());
                    for interface in &object.implements_interfaces {
                        possible_types
                            .entry(interface.as_str().to_string())
                            .or_default()
                            .insert(type_name.to_string());
                    }
                }
                ExtendedType::Union(union) => {
                    possible_types.entry(type_name.to_string()).or_default().extend(
                        union
                            .members
                            .iter()
                            .map(|member| member.as_str().to_string()),
                    );
                }
                _ => {}
            }
        }
        possible_types
    }

    /// Binds a service to a location, replacing any previous binding.
    pub fn with_service<S>(mut self, location: impl Into<String>, service: S) -> Self
    where
        S: MakeLocationService,
    {
        self.services.insert(location.into(), Arc::new(service));
        self
    }

    /// The supergraph schema requests are validated against.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// Locations serving `type_name.field`, in preference order.
    pub fn locations_for_field(&self, type_name: &str, field: &str) -> &[String] {
        self.fields
            .get(type_name)
            .and_then(|fields| fields.get(field))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `location` serves `type_name.field`.
    pub fn has_field_at(&self, type_name: &str, location: &str, field: &str) -> bool {
        self.fields_by_location
            .get(type_name)
            .and_then(|locations| locations.get(location))
            .map(|fields| fields.contains(field))
            .unwrap_or_default()
    }

    /// Locations holding any field of `type_name`.
    pub fn locations_for_type(&self, type_name: &str) -> Option<&IndexSet<String>> {
        self.locations_by_type.get(type_name)
    }

    pub(crate) fn type_at_location(&self, type_name: &str, location: &str) -> bool {
        self.locations_for_type(type_name)
            .map(|locations| locations.contains(location))
            .unwrap_or_default()
    }

    /// Resolvers able to return `type_name`, including the resolvers of the
    /// abstract types it belongs to.
    pub fn resolvers_for_type(&self, type_name: &str) -> &[Arc<Resolver>] {
        self.resolvers
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn resolver(&self, version: &ResolverVersion) -> Option<&Arc<Resolver>> {
        self.resolvers_by_version.get(version)
    }

    pub(crate) fn possible_types(&self, type_name: &str) -> Option<&IndexSet<String>> {
        self.possible_types.get(type_name)
    }

    /// Whether an object of type `typename` satisfies the type condition.
    pub(crate) fn is_possible_type(&self, type_condition: &str, typename: &str) -> bool {
        type_condition == typename
            || self
                .possible_types(type_condition)
                .map(|types| types.contains(typename))
                .unwrap_or_default()
    }

    pub(crate) fn is_abstract(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
        )
    }

    pub(crate) fn is_interface(&self, type_name: &str) -> bool {
        matches!(self.schema.types.get(type_name), Some(ExtendedType::Interface(_)))
    }

    pub(crate) fn is_leaf(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_))
        )
    }

    pub(crate) fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        self.schema
            .root_operation(OperationType::from(kind))
            .map(|name| name.as_str())
    }

    /// A new instance of the service bound to `location`.
    pub(crate) fn service(&self, location: &str) -> Option<LocationService> {
        self.services.get(location).map(|service| service.make())
    }
}

impl fmt::Debug for Supergraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supergraph")
            .field("fields", &self.fields)
            .field("resolvers", &self.resolvers_by_version.values().collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use maplit::hashmap;

    use super::*;
    use crate::resolver::ArgumentsParser;
    use crate::resolver::Key;

    pub(crate) const SCHEMA: &str = r#"
        directive @cached(if: Boolean) on QUERY
        type Query {
            storefront(id: ID!): Storefront
            product(upc: ID!): Product
            node(id: ID!): Node
        }
        interface Node { id: ID! }
        type Storefront implements Node { id: ID! name: String products: [Product] }
        type Product { upc: ID! name: String price: Int }
        union Result = Storefront | Product
    "#;

    pub(crate) fn storefronts_supergraph() -> Supergraph {
        let schema = Schema::parse_and_validate(SCHEMA, "supergraph.graphql").unwrap();
        let product_field = schema.type_field("Query", "product").unwrap().clone();
        let arguments = ArgumentsParser::parse("upc: $.upc", &product_field, &schema, false).unwrap();
        Supergraph::builder()
            .schema(schema)
            .fields(hashmap! {
                "Query".to_string() => hashmap! {
                    "storefront".to_string() => vec!["storefronts".to_string()],
                    "product".to_string() => vec!["products".to_string()],
                    "node".to_string() => vec!["storefronts".to_string()],
                },
                "Node".to_string() => hashmap! {
                    "id".to_string() => vec!["storefronts".to_string()],
                },
                "Storefront".to_string() => hashmap! {
                    "id".to_string() => vec!["storefronts".to_string()],
                    "name".to_string() => vec!["storefronts".to_string()],
                    "products".to_string() => vec!["storefronts".to_string()],
                },
                "Product".to_string() => hashmap! {
                    "upc".to_string() => vec!["storefronts".to_string(), "products".to_string()],
                    "name".to_string() => vec!["products".to_string()],
                    "price".to_string() => vec!["products".to_string()],
                },
            })
            .resolvers(hashmap! {
                "Product".to_string() => vec![
                    Resolver::builder()
                        .location("products")
                        .type_name("Product")
                        .field("product")
                        .key(Key::parse("upc").unwrap())
                        .arguments(arguments)
                        .build(),
                ],
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_field_locations() {
        let supergraph = storefronts_supergraph();
        assert_eq!(
            supergraph.locations_for_field("Product", "upc"),
            &["storefronts".to_string(), "products".to_string()]
        );
        assert!(supergraph.locations_for_field("Product", "sku").is_empty());
        assert!(supergraph.has_field_at("Product", "products", "price"));
        assert!(!supergraph.has_field_at("Product", "storefronts", "price"));
        assert!(supergraph.type_at_location("Product", "storefronts"));
        assert!(supergraph.type_at_location("Result", "products"));
    }

    #[test]
    fn test_type_relations() {
        let supergraph = storefronts_supergraph();
        assert!(supergraph.is_possible_type("Node", "Storefront"));
        assert!(supergraph.is_possible_type("Result", "Product"));
        assert!(!supergraph.is_possible_type("Node", "Product"));
        assert!(supergraph.is_abstract("Result"));
        assert!(supergraph.is_interface("Node"));
        assert!(supergraph.is_leaf("ID"));
        assert!(!supergraph.is_leaf("Product"));
        assert_eq!(supergraph.root_type_name(OperationKind::Query), Some("Query"));
        assert_eq!(supergraph.root_type_name(OperationKind::Mutation), None);
    }

    #[test]
    fn test_resolver_registry() {
        let supergraph = storefronts_supergraph();
        let resolver = &supergraph.resolvers_for_type("Product")[0];
        assert_eq!(resolver.location(), "products");
        assert!(Arc::ptr_eq(
            supergraph.resolver(resolver.version()).unwrap(),
            resolver
        ));
        assert!(supergraph.resolvers_for_type("Storefront").is_empty());
    }

    #[test]
    fn test_unknown_types_are_rejected() {
        let schema = Schema::parse_and_validate(SCHEMA, "supergraph.graphql").unwrap();
        let error = Supergraph::builder()
            .schema(schema)
            .fields(hashmap! {
                "Missing".to_string() => hashmap! { "id".to_string() => vec!["a".to_string()] },
            })
            .build()
            .unwrap_err();
        assert_eq!(error, SupergraphError::UnknownType("Missing".to_string()));
    }
}
