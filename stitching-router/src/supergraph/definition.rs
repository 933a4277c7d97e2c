//! Loading a supergraph from an exported SDL carrying routing directives.

use std::collections::HashMap;

use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Schema;

use super::Supergraph;
use super::SupergraphError;
use crate::resolver::ArgumentsParser;
use crate::resolver::Key;
use crate::resolver::Resolver;
use crate::resolver::Sha256Hasher;
use crate::resolver::VersionHasher;

/// Declarations of the directives a supergraph definition is annotated with.
///
/// They are added to definitions that do not declare them.
pub const STITCHING_DIRECTIVES: &str = r#"
directive @source(location: String!) repeatable on FIELD_DEFINITION
directive @resolver(location: String!, key: String!, field: String!, arguments: String, list: Boolean, typeName: String) repeatable on OBJECT | INTERFACE | UNION
"#;

const SOURCE: &str = "source";
const RESOLVER: &str = "resolver";

impl Supergraph {
    /// Loads a supergraph from its SDL, versioning resolvers with SHA-256.
    ///
    /// Fields carry one `@source(location:)` per location serving them and
    /// types carry one `@resolver(...)` per entry point fetching them by key.
    /// Fields without `@source` are not routable. Services are bound
    /// afterwards with [`Supergraph::with_service`].
    pub fn from_definition(sdl: &str) -> Result<Self, SupergraphError> {
        Self::from_definition_with_hasher(sdl, &Sha256Hasher)
    }

    /// Same as [`Supergraph::from_definition`] with a custom resolver hasher.
    pub fn from_definition_with_hasher(
        sdl: &str,
        hasher: &dyn VersionHasher,
    ) -> Result<Self, SupergraphError> {
        let source = if sdl.contains("directive @resolver") {
            sdl.to_string()
        } else {
            format!("{STITCHING_DIRECTIVES}\n{sdl}")
        };
        let schema = Schema::parse_and_validate(source, "supergraph.graphql")
            .map_err(|invalid| SupergraphError::InvalidSchema(invalid.errors.to_string()))?;

        let mut fields: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        let mut resolvers: HashMap<String, Vec<Resolver>> = HashMap::new();
        for (type_name, extended) in &schema.types {
            if extended.is_built_in() {
                continue;
            }
            let type_fields = match extended {
                ExtendedType::Object(object) => Some(&object.fields),
                ExtendedType::Interface(interface) => Some(&interface.fields),
                _ => None,
            };
            for (field_name, field) in type_fields.into_iter().flatten() {
                let locations = field
                    .directives
                    .get_all(SOURCE)
                    .map(|directive| {
                        required_string(directive, "location", &format!("{type_name}.{field_name}"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if !locations.is_empty() {
                    fields
                        .entry(type_name.to_string())
                        .or_default()
                        .insert(field_name.to_string(), locations);
                }
            }

            for directive in extended.directives().get_all(RESOLVER) {
                let resolver = build_resolver(&schema, type_name.as_str(), directive, hasher)?;
                resolvers
                    .entry(resolver.type_name().to_string())
                    .or_default()
                    .push(resolver);
            }
        }

        Supergraph::builder()
            .schema(schema)
            .fields(fields)
            .resolvers(resolvers)
            .build()
    }
}

fn invalid_directive(directive: &str, coordinate: &str, reason: String) -> SupergraphError {
    SupergraphError::InvalidDirective {
        directive: directive.to_string(),
        coordinate: coordinate.to_string(),
        reason,
    }
}

fn optional_string<'a>(directive: &'a ast::Directive, argument: &str) -> Option<&'a str> {
    directive
        .specified_argument_by_name(argument)
        .and_then(|value| value.as_str())
}

fn required_string(
    directive: &ast::Directive,
    argument: &str,
    coordinate: &str,
) -> Result<String, SupergraphError> {
    optional_string(directive, argument)
        .map(str::to_string)
        .ok_or_else(|| {
            invalid_directive(
                directive.name.as_str(),
                coordinate,
                format!("missing string argument '{argument}'"),
            )
        })
}

fn build_resolver(
    schema: &Schema,
    owner: &str,
    directive: &ast::Directive,
    hasher: &dyn VersionHasher,
) -> Result<Resolver, SupergraphError> {
    let location = required_string(directive, "location", owner)?;
    let field = required_string(directive, "field", owner)?;
    let key_template = required_string(directive, "key", owner)?;
    let list = directive
        .specified_argument_by_name("list")
        .and_then(|value| value.to_bool())
        .unwrap_or_default();
    let type_name = optional_string(directive, "typeName").unwrap_or(owner).to_string();

    let key = Key::parse(&key_template).map_err(|error| SupergraphError::InvalidKey {
        type_name: type_name.clone(),
        location: location.clone(),
        error,
    })?;
    if !matches!(schema.types.get(type_name.as_str()), Some(ExtendedType::Union(_))) {
        key.validate(schema, &type_name)
            .map_err(|error| SupergraphError::InvalidKey {
                type_name: type_name.clone(),
                location: location.clone(),
                error,
            })?;
    }

    let query_type = schema
        .root_operation(OperationType::Query)
        .ok_or_else(|| invalid_directive(RESOLVER, owner, "the schema has no query type".to_string()))?;
    let field_definition = schema.type_field(query_type, &field).map_err(|_| {
        invalid_directive(
            RESOLVER,
            owner,
            format!("resolver field '{query_type}.{field}' is not defined"),
        )
    })?;

    let template = match optional_string(directive, "arguments") {
        Some(template) => template.to_string(),
        None => match key.fields() {
            [single] if single.selections().is_empty() => {
                format!("{0}: $.{0}", single.name())
            }
            _ => {
                return Err(invalid_directive(
                    RESOLVER,
                    owner,
                    format!("key '{}' requires explicit arguments", key.definition()),
                ))
            }
        },
    };
    let invalid_arguments = |error| SupergraphError::InvalidArguments {
        type_name: type_name.clone(),
        location: location.clone(),
        error,
    };
    let arguments = ArgumentsParser::parse(&template, field_definition, schema, list)
        .map_err(invalid_arguments)?;
    ArgumentsParser::verify_key(&arguments, &key).map_err(invalid_arguments)?;

    Ok(Resolver::with_hasher(
        location,
        type_name.clone(),
        field,
        list,
        key,
        arguments,
        hasher,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArgumentError;

    const SDL: &str = r#"
        type Query {
            storefront(id: ID!): Storefront @source(location: "storefronts")
            product(upc: ID!): Product @source(location: "products")
            productsByUpcs(upcs: [ID!]!): [Product]! @source(location: "products")
        }
        type Storefront {
            id: ID! @source(location: "storefronts")
            name: String @source(location: "storefronts")
            products: [Product] @source(location: "storefronts")
        }
        type Product
            @resolver(location: "products", key: "upc", field: "product")
            @resolver(location: "products", key: "upc", field: "productsByUpcs", arguments: "upcs: $.upc", list: true)
        {
            upc: ID! @source(location: "storefronts") @source(location: "products")
            name: String @source(location: "products")
            price: Int @source(location: "products")
        }
    "#;

    #[test]
    fn test_from_definition() {
        let supergraph = Supergraph::from_definition(SDL).unwrap();
        assert_eq!(
            supergraph.locations_for_field("Product", "upc"),
            &["storefronts".to_string(), "products".to_string()]
        );
        assert_eq!(
            supergraph.locations_for_field("Query", "storefront"),
            &["storefronts".to_string()]
        );

        let resolvers = supergraph.resolvers_for_type("Product");
        assert_eq!(resolvers.len(), 2);
        assert_eq!(resolvers[0].field(), "product");
        assert!(!resolvers[0].list());
        assert_eq!(resolvers[0].arguments()[0].print(), "upc: $.upc");
        assert_eq!(resolvers[1].field(), "productsByUpcs");
        assert!(resolvers[1].list());
        assert_ne!(resolvers[0].version(), resolvers[1].version());
    }

    #[test]
    fn test_definitions_are_versioned_deterministically() {
        let first = Supergraph::from_definition(SDL).unwrap();
        let second = Supergraph::from_definition(SDL).unwrap();
        assert_eq!(
            first.resolvers_for_type("Product")[0].version(),
            second.resolvers_for_type("Product")[0].version()
        );
    }

    #[test]
    fn test_invalid_resolver_key() {
        let sdl = SDL.replace(r#"key: "upc", field: "product")"#, r#"key: "sku", field: "product")"#);
        let error = Supergraph::from_definition(&sdl).unwrap_err();
        assert!(matches!(error, SupergraphError::InvalidKey { .. }), "{error}");
    }

    #[test]
    fn test_unknown_resolver_field() {
        let sdl = SDL.replace(r#"field: "product")"#, r#"field: "item")"#);
        let error = Supergraph::from_definition(&sdl).unwrap_err();
        assert!(matches!(error, SupergraphError::InvalidDirective { .. }), "{error}");
    }

    #[test]
    fn test_list_resolver_requires_list_argument() {
        let sdl = SDL.replace(r#"arguments: "upcs: $.upc", list: true"#, r#"arguments: "upcs: $.upc""#);
        let error = Supergraph::from_definition(&sdl).unwrap_err();
        assert!(
            matches!(
                error,
                SupergraphError::InvalidArguments {
                    error: ArgumentError::KeyCardinality { .. },
                    ..
                }
            ),
            "{error}"
        );
    }

    #[test]
    fn test_invalid_schema() {
        let error = Supergraph::from_definition("type Query { broken: Missing }").unwrap_err();
        assert!(matches!(error, SupergraphError::InvalidSchema(_)));
    }
}
