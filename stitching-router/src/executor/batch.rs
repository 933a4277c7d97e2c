//! Documents sent to locations, and the mapping of their results and errors
//! back onto the result tree.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json_bytes::ByteString;

use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::query_planner::Op;
use crate::resolver::Resolver;

static RESULT_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^_(\d+)(?:_(\d+))?_result$").expect("this regex to match batch aliases is valid")
});

/// An object of the result tree extended by a resolver op.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Origin {
    /// Absolute path of the object in the result tree.
    pub(crate) path: Path,
    /// Values of the key arguments built from the object, by argument index.
    pub(crate) keys: Vec<(usize, Value)>,
}

impl Origin {
    /// Builds the key arguments of `resolver` from `object`, or returns `None`
    /// when one of its key values is missing.
    pub(crate) fn build(path: &Path, object: &Object, resolver: &Resolver) -> Option<Self> {
        let keys = resolver
            .arguments()
            .iter()
            .enumerate()
            .filter(|(_, argument)| argument.requires_key())
            .map(|(index, argument)| Some((index, argument.try_build(object)?)))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            path: path.clone(),
            keys,
        })
    }

    fn key(&self, argument: usize) -> Value {
        self.keys
            .iter()
            .find(|(index, _)| *index == argument)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }
}

/// The origin objects of one op in a resolver document.
#[derive(Debug)]
pub(crate) struct ResolverBatch<'a> {
    pub(crate) op: &'a Op,
    pub(crate) origins: Vec<Origin>,
}

/// A document with its variables, ready to be sent.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Document {
    pub(crate) source: String,
    pub(crate) variables: Object,
}

#[derive(Default)]
struct DocumentBuilder {
    declarations: IndexMap<String, String>,
    variables: Object,
}

impl DocumentBuilder {
    fn declare(&mut self, name: String, ty: &str, value: Value) {
        self.declarations.entry(name.clone()).or_insert_with(|| ty.to_string());
        self.variables.insert(ByteString::from(name), value);
    }

    /// Declares the request variables an op uses.
    fn forward(&mut self, op: &Op, request_variables: &Object) {
        for (name, ty) in &op.variables {
            self.declarations
                .entry(name.clone())
                .or_insert_with(|| ty.clone());
            if let Some(value) = request_variables.get(name.as_str()) {
                self.variables.insert::<ByteString>(name.as_str().into(), value.clone());
            }
        }
    }

    fn finish(self, keyword: &str, name: Option<String>, directives: &str, body: &str) -> Document {
        let mut source = keyword.to_string();
        if let Some(name) = name {
            source.push(' ');
            source.push_str(&name);
        }
        if !self.declarations.is_empty() {
            let declarations: Vec<String> = self
                .declarations
                .iter()
                .map(|(name, ty)| format!("${name}: {ty}"))
                .collect();
            source.push('(');
            source.push_str(&declarations.join(", "));
            source.push(')');
        }
        if !directives.is_empty() {
            source.push(' ');
            source.push_str(directives);
        }
        source.push(' ');
        source.push_str(body);
        Document {
            source,
            variables: self.variables,
        }
    }
}

fn operation_name<'a>(name: Option<&str>, steps: impl Iterator<Item = &'a Op>) -> Option<String> {
    name.map(|name| {
        let mut rendered = name.to_string();
        for op in steps {
            rendered.push_str(&format!("_{}", op.step));
        }
        rendered
    })
}

/// `query Name_<step>($var: Type) @directives { ... }`
pub(crate) fn root_document(
    op: &Op,
    name: Option<&str>,
    directives: &str,
    request_variables: &Object,
) -> Document {
    let mut builder = DocumentBuilder::default();
    builder.forward(op, request_variables);
    builder.finish(
        op.operation_type.as_str(),
        operation_name(name, std::iter::once(op)),
        directives,
        &op.selections,
    )
}

/// One aliased resolver call per batch for list resolvers (`_<b>_result`),
/// or per origin object for singular resolvers (`_<b>_<k>_result`).
pub(crate) fn resolver_document(
    resolver: &Resolver,
    batches: &[ResolverBatch<'_>],
    name: Option<&str>,
    request_variables: &Object,
) -> Document {
    let mut builder = DocumentBuilder::default();
    let mut calls = Vec::new();

    for (b, batch) in batches.iter().enumerate() {
        if resolver.list() {
            let arguments = render_call_arguments(resolver, |index| {
                let variable = format!("_{b}_key_{index}");
                let keys = batch.origins.iter().map(|origin| origin.key(index)).collect();
                (variable, Value::Array(keys))
            }, &mut builder);
            calls.push(format!(
                "_{b}_result: {}{arguments} {}",
                resolver.field(),
                batch.op.selections
            ));
        } else {
            for (k, origin) in batch.origins.iter().enumerate() {
                let arguments = render_call_arguments(resolver, |index| {
                    (format!("_{b}_{k}_key_{index}"), origin.key(index))
                }, &mut builder);
                calls.push(format!(
                    "_{b}_{k}_result: {}{arguments} {}",
                    resolver.field(),
                    batch.op.selections
                ));
            }
        }
        builder.forward(batch.op, request_variables);
    }

    let body = format!("{{ {} }}", calls.join(" "));
    builder.finish(
        "query",
        operation_name(name, batches.iter().map(|batch| batch.op)),
        "",
        &body,
    )
}

/// Key arguments are bound to variables, static ones are printed inline.
fn render_call_arguments(
    resolver: &Resolver,
    mut key_variable: impl FnMut(usize) -> (String, Value),
    builder: &mut DocumentBuilder,
) -> String {
    if resolver.arguments().is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = resolver
        .arguments()
        .iter()
        .enumerate()
        .map(|(index, argument)| {
            if argument.requires_key() {
                let (variable, value) = key_variable(index);
                let rendered = format!("{}: ${variable}", argument.name());
                builder.declare(variable, argument.type_signature(), value);
                rendered
            } else {
                argument.print()
            }
        })
        .collect();
    format!("({})", rendered.join(", "))
}

/// Where each aliased result of a resolver document belongs.
pub(crate) fn scatter_results(
    resolver: &Resolver,
    batches: &[ResolverBatch<'_>],
    mut data: Object,
) -> Vec<(Path, Value)> {
    let mut results = Vec::new();
    for (b, batch) in batches.iter().enumerate() {
        if resolver.list() {
            let Some(Value::Array(items)) = data.remove(format!("_{b}_result").as_str()) else {
                continue;
            };
            for (origin, item) in batch.origins.iter().zip(items) {
                results.push((origin.path.clone(), item));
            }
        } else {
            for (k, origin) in batch.origins.iter().enumerate() {
                if let Some(item) = data.remove(format!("_{b}_{k}_result").as_str()) {
                    results.push((origin.path.clone(), item));
                }
            }
        }
    }
    results
}

/// Rewrites the path of an error raised under a batch alias to the absolute
/// path of the origin object it addresses.
pub(crate) fn repath_resolver_error(mut error: Error, batches: &[ResolverBatch<'_>]) -> Error {
    error.locations.clear();
    let Some(path) = error.path.take() else {
        return error;
    };
    let captures = match path.first() {
        Some(PathElement::Key(alias)) => RESULT_ALIAS.captures(alias),
        _ => None,
    };
    let Some(captures) = captures else {
        error.path = Some(path);
        return error;
    };
    let batch = captures
        .get(1)
        .and_then(|b| b.as_str().parse::<usize>().ok())
        .and_then(|b| batches.get(b));
    let Some(batch) = batch else {
        error.path = Some(path);
        return error;
    };

    let elements = &path.0;
    let resolved = match captures.get(2) {
        Some(k) => k
            .as_str()
            .parse::<usize>()
            .ok()
            .and_then(|k| batch.origins.get(k))
            .map(|origin| origin.path.join(Path(elements[1..].to_vec()))),
        None => match elements.get(1) {
            Some(PathElement::Index(i)) => batch
                .origins
                .get(*i)
                .map(|origin| origin.path.join(Path(elements[2..].to_vec()))),
            _ => None,
        },
    };
    error.path = Some(resolved.unwrap_or_else(|| {
        Path::from_keys(&batch.op.path).join(Path(elements[1..].to_vec()))
    }));
    error
}

/// Prefixes the errors of a root op merged below the root.
pub(crate) fn repath_root_error(mut error: Error, op: &Op) -> Error {
    if op.path.is_empty() {
        return error;
    }
    if let Some(path) = error.path.take() {
        error.path = Some(Path::from_keys(&op.path).join(path));
    }
    error
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use indexmap::IndexMap;
    use serde_json_bytes::json;

    use super::*;
    use crate::query_planner::OperationKind;
    use crate::resolver::ArgumentsParser;
    use crate::resolver::Key;

    const SCHEMA: &str = r#"
        type Query {
            product(upc: ID!, locale: String): Product
            products(upcs: [ID!]!, locale: String): [Product]!
        }
        type Product { upc: ID! name: String }
    "#;

    fn resolver(list: bool) -> Resolver {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let (field, template) = if list {
            ("products", "upcs: $.upc, locale: 'en'")
        } else {
            ("product", "upc: $.upc, locale: 'en'")
        };
        let definition = schema.type_field("Query", field).unwrap().clone();
        Resolver::builder()
            .location("products")
            .type_name("Product")
            .field(field)
            .list(list)
            .key(Key::parse("upc").unwrap())
            .arguments(ArgumentsParser::parse(template, &definition, &schema, list).unwrap())
            .build()
    }

    fn op(step: usize, path: &[&str]) -> Op {
        Op {
            step,
            after: Some(0),
            location: "products".to_string(),
            operation_type: OperationKind::Query,
            selections: "{ name }".to_string(),
            variables: IndexMap::new(),
            path: path.iter().map(|key| key.to_string()).collect(),
            type_condition: None,
            resolver: None,
        }
    }

    fn origins(resolver: &Resolver, data: serde_json_bytes::Value, keys: &[&str]) -> Vec<Origin> {
        use crate::json_ext::ValueExt;
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let mut origins = Vec::new();
        data.select_values_and_paths(&keys, |path, object| {
            if let Some(origin) = Origin::build(path, object, resolver) {
                origins.push(origin);
            }
        });
        origins
    }

    fn data() -> serde_json_bytes::Value {
        json!({
            "storefront": {
                "products": [
                    { "_export_upc": "1", "_export___typename": "Product" },
                    { "_export_upc": null, "_export___typename": "Product" },
                    { "_export_upc": "3", "_export___typename": "Product" },
                ],
                "featured": { "_export_upc": "9", "_export___typename": "Product" },
            }
        })
    }

    #[test]
    fn test_origins_skip_missing_keys() {
        let resolver = resolver(true);
        let origins = origins(&resolver, data(), &["storefront", "products"]);
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1].path.to_string(), "/storefront/products/2");
        assert_eq!(origins[1].keys, vec![(0, json!("3"))]);
    }

    #[test]
    fn test_list_resolver_document() {
        let resolver = resolver(true);
        let products = op(1, &["storefront", "products"]);
        let featured = op(2, &["storefront", "featured"]);
        let batches = vec![
            ResolverBatch {
                op: &products,
                origins: origins(&resolver, data(), &["storefront", "products"]),
            },
            ResolverBatch {
                op: &featured,
                origins: origins(&resolver, data(), &["storefront", "featured"]),
            },
        ];
        let document = resolver_document(&resolver, &batches, Some("Shop"), &Object::new());
        insta::assert_snapshot!(
            document.source,
            @r#"query Shop_1_2($_0_key_0: [ID!]!, $_1_key_0: [ID!]!) { _0_result: products(upcs: $_0_key_0, locale: "en") { name } _1_result: products(upcs: $_1_key_0, locale: "en") { name } }"#
        );
        assert_eq!(
            serde_json_bytes::Value::Object(document.variables),
            json!({ "_0_key_0": ["1", "3"], "_1_key_0": ["9"] })
        );
    }

    #[test]
    fn test_singular_resolver_document() {
        let resolver = resolver(false);
        let mut products = op(1, &["storefront", "products"]);
        products
            .variables
            .insert("lang".to_string(), "String".to_string());
        let batches = vec![ResolverBatch {
            op: &products,
            origins: origins(&resolver, data(), &["storefront", "products"]),
        }];
        let request_variables = json!({ "lang": "fr", "unused": 1 });
        let document = resolver_document(
            &resolver,
            &batches,
            None,
            request_variables.as_object().unwrap(),
        );
        insta::assert_snapshot!(
            document.source,
            @r#"query($_0_0_key_0: ID!, $_0_1_key_0: ID!, $lang: String) { _0_0_result: product(upc: $_0_0_key_0, locale: "en") { name } _0_1_result: product(upc: $_0_1_key_0, locale: "en") { name } }"#
        );
        assert_eq!(
            serde_json_bytes::Value::Object(document.variables),
            json!({ "_0_0_key_0": "1", "_0_1_key_0": "3", "lang": "fr" })
        );
    }

    #[test]
    fn test_documents_are_deterministic() {
        let resolver = resolver(false);
        let products = op(1, &["storefront", "products"]);
        let build = || {
            let batches = vec![ResolverBatch {
                op: &products,
                origins: origins(&resolver, data(), &["storefront", "products"]),
            }];
            resolver_document(&resolver, &batches, Some("Shop"), &Object::new())
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_root_document() {
        let mut root = op(0, &[]);
        root.after = None;
        root.operation_type = OperationKind::Mutation;
        root.variables.insert("id".to_string(), "ID!".to_string());
        let variables = json!({ "id": "1" });
        let document = root_document(&root, Some("Save"), "@trace", variables.as_object().unwrap());
        assert_eq!(document.source, "mutation Save_0($id: ID!) @trace { name }");
        assert_eq!(serde_json_bytes::Value::Object(document.variables), variables);
    }

    #[test]
    fn test_scatter_results() {
        let resolver = resolver(false);
        let products = op(1, &["storefront", "products"]);
        let batches = vec![ResolverBatch {
            op: &products,
            origins: origins(&resolver, data(), &["storefront", "products"]),
        }];
        let data = json!({
            "_0_0_result": { "name": "Table" },
            "_0_1_result": null,
        });
        let results = scatter_results(&resolver, &batches, data.as_object().unwrap().clone());
        assert_eq!(
            results,
            vec![
                (Path::from_keys(&["storefront", "products"]).join(Path(vec![PathElement::Index(0)])), json!({ "name": "Table" })),
                (Path::from_keys(&["storefront", "products"]).join(Path(vec![PathElement::Index(2)])), json!(null)),
            ]
        );
    }

    fn error_at(path: serde_json::Value) -> Error {
        Error::builder()
            .message("boom")
            .path(serde_json::from_value::<Path>(path).unwrap())
            .build()
    }

    #[test]
    fn test_repath_singular_errors() {
        let resolver = resolver(false);
        let products = op(1, &["storefront", "products"]);
        let batches = vec![ResolverBatch {
            op: &products,
            origins: origins(&resolver, data(), &["storefront", "products"]),
        }];
        let error = repath_resolver_error(error_at(serde_json::json!(["_0_1_result", "name"])), &batches);
        assert_eq!(error.path.unwrap().to_string(), "/storefront/products/2/name");

        let error = repath_resolver_error(error_at(serde_json::json!(["_0_7_result", "name"])), &batches);
        assert_eq!(error.path.unwrap().to_string(), "/storefront/products/name");

        let error = repath_resolver_error(error_at(serde_json::json!(["other", "name"])), &batches);
        assert_eq!(error.path.unwrap().to_string(), "/other/name");
    }

    #[test]
    fn test_repath_list_errors() {
        let resolver = resolver(true);
        let products = op(1, &["storefront", "products"]);
        let batches = vec![ResolverBatch {
            op: &products,
            origins: origins(&resolver, data(), &["storefront", "products"]),
        }];
        let error = repath_resolver_error(error_at(serde_json::json!(["_0_result", 1, "name"])), &batches);
        assert_eq!(error.path.unwrap().to_string(), "/storefront/products/2/name");

        let unpathed = repath_resolver_error(Error::builder().message("boom").build(), &batches);
        assert_eq!(unpathed.path, None);
    }

    #[test]
    fn test_repath_root_errors() {
        let nested = op(3, &["viewer", "query"]);
        let error = repath_root_error(error_at(serde_json::json!(["product", "name"])), &nested);
        assert_eq!(error.path.unwrap().to_string(), "/viewer/query/product/name");
    }
}
