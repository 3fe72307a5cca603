//! Mock engine: execute a GraphQL operation against a compiled schema.
//!
//! Values are produced lazily while walking the operation's selection sets,
//! so generation cost is bounded by the query, not the schema. Each field
//! resolves through layered per-type templates, highest precedence first:
//!
//! 1. per-call overrides
//! 2. the subgraph-specific map from the resolver source
//! 3. the `_globals` map from the resolver source
//! 4. built-in type-appropriate defaults
//!
//! Template precedence is whole-type replacement: the first layer that knows
//! a type supplies its entire template; fields absent from the template fall
//! back to generated defaults.

use crate::error::{Error, Result};
use crate::introspection::is_federation_introspection;
use crate::resolvers::{ResolverMap, SharedResolverSource};
use crate::schema::{CompiledSchema, FieldType, RootKind, TypeShape};
use async_graphql::parser::parse_query;
use async_graphql::parser::types::{
    DocumentOperations, FragmentDefinition, OperationDefinition, OperationType, Selection,
    SelectionSet,
};
use async_graphql::Positioned;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// One mock execution request.
#[derive(Debug, Clone, Copy)]
pub struct MockRequest<'a> {
    pub subgraph: &'a str,
    pub query: &'a str,
    pub operation_name: Option<&'a str>,
    /// Highest-precedence resolver layer, used by embedders and tests
    pub overrides: Option<&'a ResolverMap>,
}

/// Result of a mock execution.
#[derive(Debug, Clone)]
pub struct MockExecution {
    /// Complete response body, `{"data": ...}`
    pub body: Value,
    /// True when the introspection short-circuit answered the request
    pub is_introspection: bool,
}

/// Engine that synthesizes schema-conformant responses.
#[derive(Clone)]
pub struct MockEngine {
    resolver_source: SharedResolverSource,
}

impl MockEngine {
    pub fn new(resolver_source: SharedResolverSource) -> Self {
        Self { resolver_source }
    }

    /// Execute `request` against `schema`.
    pub async fn execute(
        &self,
        schema: &CompiledSchema,
        request: MockRequest<'_>,
    ) -> Result<MockExecution> {
        if request.query.trim().is_empty() {
            return Err(Error::MissingQuery);
        }

        // Routers asking for SDL get the cached schema text back without any
        // execution machinery.
        if is_federation_introspection(request.query) {
            return Ok(MockExecution {
                body: json!({ "data": { "_service": { "sdl": schema.sdl() } } }),
                is_introspection: true,
            });
        }

        let document = parse_query(request.query)
            .map_err(|err| Error::GraphqlParse(err.to_string()))?;
        let operation = select_operation(&document.operations, request.operation_name)?;

        let root_kind = match operation.ty {
            OperationType::Query => RootKind::Query,
            OperationType::Mutation => RootKind::Mutation,
            OperationType::Subscription => {
                return Err(Error::GraphqlValidation(
                    "subscriptions cannot be mocked".to_string(),
                ))
            }
        };
        let root_type = schema.root_type(root_kind).ok_or_else(|| {
            Error::GraphqlValidation(format!(
                "schema does not define a {} type",
                match root_kind {
                    RootKind::Query => "query",
                    RootKind::Mutation => "mutation",
                    RootKind::Subscription => "subscription",
                }
            ))
        })?;

        let document_mocks = self.resolver_source.load().await;
        let mut layers: Vec<&ResolverMap> = Vec::with_capacity(3);
        if let Some(overrides) = request.overrides {
            layers.push(overrides);
        }
        if let Some(subgraph_map) = document_mocks.subgraph(request.subgraph) {
            layers.push(subgraph_map);
        }
        layers.push(&document_mocks.globals);

        let executor = Executor {
            schema,
            layers,
            fragments: &document.fragments,
        };

        let data = executor.resolve_object(
            root_type,
            root_type,
            &operation.selection_set.node,
            None,
            &mut HashSet::new(),
        )?;

        Ok(MockExecution {
            body: json!({ "data": data }),
            is_introspection: false,
        })
    }
}

fn select_operation<'a>(
    operations: &'a DocumentOperations,
    operation_name: Option<&str>,
) -> Result<&'a OperationDefinition> {
    match operations {
        DocumentOperations::Single(op) => Ok(&op.node),
        DocumentOperations::Multiple(map) => match operation_name {
            Some(name) => map
                .iter()
                .find(|(candidate, _)| candidate.as_str() == name)
                .map(|(_, op)| &op.node)
                .ok_or_else(|| {
                    Error::GraphqlValidation(format!("unknown operation '{name}'"))
                }),
            None => {
                if map.len() == 1 {
                    Ok(&map.values().next().expect("non-empty").node)
                } else {
                    Err(Error::GraphqlValidation(
                        "operationName is required when the document defines multiple operations"
                            .to_string(),
                    ))
                }
            }
        },
    }
}

struct Executor<'a> {
    schema: &'a CompiledSchema,
    /// Highest precedence first
    layers: Vec<&'a ResolverMap>,
    fragments: &'a std::collections::HashMap<async_graphql::Name, Positioned<FragmentDefinition>>,
}

impl<'a> Executor<'a> {
    /// Whole-type replacement: the first layer that knows `type_name` wins.
    fn type_template(&self, type_name: &str) -> Option<&'a Value> {
        self.layers.iter().find_map(|layer| layer.get(type_name))
    }

    fn fragment(&self, name: &str) -> Option<&'a Positioned<FragmentDefinition>> {
        self.fragments
            .iter()
            .find(|(candidate, _)| candidate.as_str() == name)
            .map(|(_, def)| def)
    }

    /// True when a fragment conditioned on `condition` applies to an object
    /// of `concrete` type.
    fn condition_applies(&self, condition: &str, concrete: &str) -> bool {
        if condition == concrete {
            return true;
        }
        match self.schema.type_shape(condition) {
            Some(TypeShape::Interface { implementers, .. }) => {
                implementers.iter().any(|i| i == concrete)
            }
            Some(TypeShape::Union { members }) => members.iter().any(|m| m == concrete),
            _ => false,
        }
    }

    /// Resolve a selection set against an object of `concrete` type.
    ///
    /// `declared` is the type the field was declared with (interface or union
    /// name when abstract); field lookups fall back to it so selections that
    /// only mention interface fields still resolve.
    fn resolve_object(
        &self,
        concrete: &str,
        declared: &str,
        selection_set: &SelectionSet,
        instance_template: Option<&Value>,
        active_fragments: &mut HashSet<String>,
    ) -> Result<Map<String, Value>> {
        let type_template = self.type_template(concrete);
        let mut output = Map::new();

        self.collect_fields(
            concrete,
            declared,
            selection_set,
            instance_template,
            type_template,
            active_fragments,
            &mut output,
        )?;

        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_fields(
        &self,
        concrete: &str,
        declared: &str,
        selection_set: &SelectionSet,
        instance_template: Option<&Value>,
        type_template: Option<&Value>,
        active_fragments: &mut HashSet<String>,
        output: &mut Map<String, Value>,
    ) -> Result<()> {
        for item in &selection_set.items {
            match &item.node {
                Selection::Field(field) => {
                    let name = field.node.name.node.as_str();
                    let key = field
                        .node
                        .alias
                        .as_ref()
                        .map(|a| a.node.to_string())
                        .unwrap_or_else(|| name.to_string());

                    if name == "__typename" {
                        output.insert(key, Value::String(concrete.to_string()));
                        continue;
                    }

                    let field_def = self
                        .schema
                        .field(concrete, name)
                        .or_else(|| self.schema.field(declared, name))
                        .ok_or_else(|| {
                            Error::GraphqlValidation(format!(
                                "field '{name}' does not exist on type '{concrete}'"
                            ))
                        })?;

                    let override_value = lookup_field(instance_template, name)
                        .or_else(|| lookup_field(type_template, name));

                    let value = self.resolve_value(
                        &field_def.ty,
                        override_value,
                        &field.node.selection_set.node,
                        active_fragments,
                    )?;
                    output.insert(key, value);
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    let fragment = self.fragment(name).ok_or_else(|| {
                        Error::GraphqlValidation(format!("unknown fragment '{name}'"))
                    })?;
                    if !active_fragments.insert(name.to_string()) {
                        return Err(Error::GraphqlValidation(format!(
                            "fragment cycle detected at '{name}'"
                        )));
                    }
                    let condition = fragment.node.type_condition.node.on.node.as_str();
                    if self.condition_applies(condition, concrete) {
                        self.collect_fields(
                            concrete,
                            declared,
                            &fragment.node.selection_set.node,
                            instance_template,
                            type_template,
                            active_fragments,
                            output,
                        )?;
                    }
                    active_fragments.remove(name);
                }
                Selection::InlineFragment(inline) => {
                    let applies = match &inline.node.type_condition {
                        Some(condition) => {
                            self.condition_applies(condition.node.on.node.as_str(), concrete)
                        }
                        None => true,
                    };
                    if applies {
                        self.collect_fields(
                            concrete,
                            declared,
                            &inline.node.selection_set.node,
                            instance_template,
                            type_template,
                            active_fragments,
                            output,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_value(
        &self,
        field_type: &FieldType,
        override_value: Option<&Value>,
        selection_set: &SelectionSet,
        active_fragments: &mut HashSet<String>,
    ) -> Result<Value> {
        if let Some(Value::Null) = override_value {
            return Ok(Value::Null);
        }

        match field_type {
            FieldType::List { inner, .. } => match override_value {
                Some(Value::Array(items)) => {
                    let mut resolved = Vec::with_capacity(items.len());
                    for item in items {
                        resolved.push(self.resolve_value(
                            inner,
                            Some(item),
                            selection_set,
                            active_fragments,
                        )?);
                    }
                    Ok(Value::Array(resolved))
                }
                other => {
                    // Default list length is two; a non-array template applies
                    // to every element.
                    let mut resolved = Vec::with_capacity(DEFAULT_LIST_LENGTH);
                    for _ in 0..DEFAULT_LIST_LENGTH {
                        resolved.push(self.resolve_value(
                            inner,
                            other,
                            selection_set,
                            active_fragments,
                        )?);
                    }
                    Ok(Value::Array(resolved))
                }
            },
            FieldType::Named { name, .. } => {
                let shape = self.schema.type_shape(name).ok_or_else(|| {
                    Error::Schema(format!("schema references undefined type '{name}'"))
                })?;

                match shape {
                    TypeShape::Scalar => Ok(match override_value {
                        Some(value) => value.clone(),
                        None => default_scalar(name),
                    }),
                    TypeShape::Enum { values } => match override_value {
                        Some(value) => Ok(value.clone()),
                        None => values
                            .first()
                            .map(|v| Value::String(v.clone()))
                            .ok_or_else(|| {
                                Error::Schema(format!("enum '{name}' has no values"))
                            }),
                    },
                    TypeShape::Object { .. } => {
                        self.resolve_composite(name, name, override_value, selection_set, active_fragments)
                    }
                    TypeShape::Interface { implementers, .. } => {
                        let concrete = implementers.first().cloned().ok_or_else(|| {
                            Error::Schema(format!("interface '{name}' has no implementing types"))
                        })?;
                        self.resolve_composite(
                            &concrete,
                            name,
                            override_value,
                            selection_set,
                            active_fragments,
                        )
                    }
                    TypeShape::Union { members } => {
                        let concrete = members.first().cloned().ok_or_else(|| {
                            Error::Schema(format!("union '{name}' has no members"))
                        })?;
                        self.resolve_composite(
                            &concrete,
                            name,
                            override_value,
                            selection_set,
                            active_fragments,
                        )
                    }
                    TypeShape::InputObject => Err(Error::Schema(format!(
                        "input type '{name}' cannot appear in an output position"
                    ))),
                }
            }
        }
    }

    fn resolve_composite(
        &self,
        concrete: &str,
        declared: &str,
        override_value: Option<&Value>,
        selection_set: &SelectionSet,
        active_fragments: &mut HashSet<String>,
    ) -> Result<Value> {
        if selection_set.items.is_empty() {
            return Err(Error::GraphqlValidation(format!(
                "field of composite type '{declared}' requires a selection set"
            )));
        }
        // Object templates override per-field; any other shape is ignored
        // here because the value must stay schema-conformant.
        let instance_template = override_value.filter(|v| v.is_object());
        let object = self.resolve_object(
            concrete,
            declared,
            selection_set,
            instance_template,
            active_fragments,
        )?;
        Ok(Value::Object(object))
    }
}

const DEFAULT_LIST_LENGTH: usize = 2;

fn lookup_field<'v>(template: Option<&'v Value>, field: &str) -> Option<&'v Value> {
    template.and_then(|t| t.as_object()).and_then(|o| o.get(field))
}

/// Built-in placeholder for a scalar type.
fn default_scalar(name: &str) -> Value {
    match name {
        "ID" => json!("mock-id"),
        "String" => json!("Hello World"),
        "Int" => json!(42),
        "Float" => json!(3.14),
        "Boolean" => json!(true),
        "DateTime" | "Timestamp" => json!("2024-01-01T00:00:00Z"),
        "Date" => json!("2024-01-01"),
        "Time" => json!("00:00:00Z"),
        "JSON" | "JSONObject" => json!({}),
        other => Value::String(format!("mock-{}", other.to_lowercase())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::StaticResolverSource;

    const SDL: &str = r#"
        type Product @key(fields: "id") {
            id: ID!
            name: String
            price: Float
            status: ProductStatus!
            tags: [String!]!
            related: [Product!]
        }

        enum ProductStatus {
            DRAFT
            ACTIVE
        }

        type Query {
            products: [Product!]!
            product(id: ID!): Product
        }

        type Mutation {
            archiveProduct(id: ID!): Product
        }
    "#;

    fn schema() -> CompiledSchema {
        CompiledSchema::parse(SDL).unwrap()
    }

    fn engine() -> MockEngine {
        MockEngine::new(StaticResolverSource::default().into_shared())
    }

    fn engine_with(mocks: serde_json::Value) -> MockEngine {
        MockEngine::new(StaticResolverSource::from_value(mocks).unwrap().into_shared())
    }

    fn request<'a>(query: &'a str) -> MockRequest<'a> {
        MockRequest {
            subgraph: "products",
            query,
            operation_name: None,
            overrides: None,
        }
    }

    #[tokio::test]
    async fn test_default_values_conform_to_schema() {
        let schema = schema();
        let result = engine()
            .execute(
                &schema,
                request("query Q { products { id name price status tags } }"),
            )
            .await
            .unwrap();

        let products = result.body["data"]["products"].as_array().unwrap();
        assert_eq!(products.len(), 2);
        let product = &products[0];
        assert_eq!(product["id"], "mock-id");
        assert_eq!(product["name"], "Hello World");
        assert_eq!(product["price"], 3.14);
        assert_eq!(product["status"], "DRAFT");
        assert_eq!(product["tags"], json!(["Hello World", "Hello World"]));
        assert!(!result.is_introspection);
    }

    #[tokio::test]
    async fn test_nested_objects_follow_query_shape() {
        let schema = schema();
        let result = engine()
            .execute(
                &schema,
                request("{ product(id: \"p1\") { id related { id name } } }"),
            )
            .await
            .unwrap();

        let related = result.body["data"]["product"]["related"].as_array().unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0]["name"], "Hello World");
        // Only the requested fields are present.
        assert!(related[0].get("price").is_none());
    }

    #[tokio::test]
    async fn test_aliases_and_typename() {
        let schema = schema();
        let result = engine()
            .execute(
                &schema,
                request("{ first: product(id: \"a\") { __typename pid: id } }"),
            )
            .await
            .unwrap();

        let first = &result.body["data"]["first"];
        assert_eq!(first["__typename"], "Product");
        assert_eq!(first["pid"], "mock-id");
    }

    #[tokio::test]
    async fn test_mutation_operations_mock_too() {
        let schema = schema();
        let result = engine()
            .execute(&schema, request("mutation { archiveProduct(id: \"p\") { id } }"))
            .await
            .unwrap();
        assert_eq!(result.body["data"]["archiveProduct"]["id"], "mock-id");
    }

    #[tokio::test]
    async fn test_operation_selected_by_name() {
        let schema = schema();
        let query = r#"
            query First { products { id } }
            query Second { products { name } }
        "#;
        let mut req = request(query);
        req.operation_name = Some("Second");

        let result = engine().execute(&schema, req).await.unwrap();
        let product = &result.body["data"]["products"][0];
        assert!(product.get("name").is_some());
        assert!(product.get("id").is_none());
    }

    #[tokio::test]
    async fn test_unknown_operation_name_is_validation_error() {
        let schema = schema();
        let query = r#"
            query First { products { id } }
            query Second { products { name } }
        "#;
        let mut req = request(query);
        req.operation_name = Some("Third");

        let err = engine().execute(&schema, req).await.unwrap_err();
        assert_eq!(err.code(), "GRAPHQL_VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_missing_query_rejected() {
        let schema = schema();
        let err = engine().execute(&schema, request("   ")).await.unwrap_err();
        assert_eq!(err.code(), "MISSING_QUERY");
    }

    #[tokio::test]
    async fn test_parse_error() {
        let schema = schema();
        let err = engine()
            .execute(&schema, request("{ products { id"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GRAPHQL_PARSE_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_field_is_validation_error() {
        let schema = schema();
        let err = engine()
            .execute(&schema, request("{ products { id nonexistent } }"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GRAPHQL_VALIDATION_ERROR");
        assert!(err.to_string().contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_composite_field_without_selection_rejected() {
        let schema = schema();
        let err = engine()
            .execute(&schema, request("{ products }"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GRAPHQL_VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_introspection_short_circuit() {
        let schema = schema();
        let result = engine()
            .execute(
                &schema,
                request("query SubgraphIntrospectQuery { _service { sdl } }"),
            )
            .await
            .unwrap();
        assert!(result.is_introspection);
        assert_eq!(result.body["data"]["_service"]["sdl"], SDL);
    }

    #[tokio::test]
    async fn test_globals_layer_overrides_defaults() {
        let schema = schema();
        let engine = engine_with(json!({
            "_globals": { "Product": { "name": "Global product" } }
        }));

        let result = engine
            .execute(&schema, request("{ products { id name } }"))
            .await
            .unwrap();
        let product = &result.body["data"]["products"][0];
        assert_eq!(product["name"], "Global product");
        // Fields absent from the template keep their defaults.
        assert_eq!(product["id"], "mock-id");
    }

    #[tokio::test]
    async fn test_subgraph_layer_replaces_global_type_wholesale() {
        let schema = schema();
        let engine = engine_with(json!({
            "_globals": { "Product": { "name": "Global", "price": 1.0 } },
            "products": { "Product": { "name": "Subgraph" } }
        }));

        let result = engine
            .execute(&schema, request("{ products { name price } }"))
            .await
            .unwrap();
        let product = &result.body["data"]["products"][0];
        assert_eq!(product["name"], "Subgraph");
        // Whole-type replacement: the global price template does not merge in.
        assert_eq!(product["price"], 3.14);
    }

    #[tokio::test]
    async fn test_per_call_overrides_win() {
        let schema = schema();
        let engine = engine_with(json!({
            "products": { "Product": { "name": "Subgraph" } }
        }));

        let mut overrides = ResolverMap::new();
        overrides.insert("Product".to_string(), json!({ "name": "Per call" }));

        let mut req = request("{ products { name } }");
        req.overrides = Some(&overrides);

        let result = engine.execute(&schema, req).await.unwrap();
        assert_eq!(result.body["data"]["products"][0]["name"], "Per call");
    }

    #[tokio::test]
    async fn test_array_template_controls_list_length() {
        let schema = schema();
        let engine = engine_with(json!({
            "products": {
                "Query": {
                    "products": [
                        { "id": "p1", "name": "First" },
                        { "id": "p2" },
                        { "id": "p3" }
                    ]
                }
            }
        }));

        let result = engine
            .execute(&schema, request("{ products { id name } }"))
            .await
            .unwrap();
        let products = result.body["data"]["products"].as_array().unwrap();
        assert_eq!(products.len(), 3);
        assert_eq!(products[0]["id"], "p1");
        assert_eq!(products[0]["name"], "First");
        // Element without an override for `name` falls back to the default.
        assert_eq!(products[1]["name"], "Hello World");
    }

    #[tokio::test]
    async fn test_null_template_forces_null() {
        let schema = schema();
        let engine = engine_with(json!({
            "products": { "Product": { "name": null } }
        }));

        let result = engine
            .execute(&schema, request("{ products { name } }"))
            .await
            .unwrap();
        assert_eq!(result.body["data"]["products"][0]["name"], Value::Null);
    }

    #[tokio::test]
    async fn test_interface_resolves_to_first_implementer() {
        let sdl = r#"
            interface Node { id: ID! }
            type User implements Node { id: ID! email: String }
            type Post implements Node { id: ID! title: String }
            type Query { node: Node }
        "#;
        let schema = CompiledSchema::parse(sdl).unwrap();

        let result = engine()
            .execute(
                &schema,
                request("{ node { __typename id ... on User { email } ... on Post { title } } }"),
            )
            .await
            .unwrap();

        let node = &result.body["data"]["node"];
        assert_eq!(node["__typename"], "User");
        assert_eq!(node["email"], "Hello World");
        // The Post fragment does not apply to a User value.
        assert!(node.get("title").is_none());
    }

    #[tokio::test]
    async fn test_union_resolves_to_first_member() {
        let sdl = r#"
            type Cat { meows: Boolean }
            type Dog { barks: Boolean }
            union Pet = Cat | Dog
            type Query { pet: Pet }
        "#;
        let schema = CompiledSchema::parse(sdl).unwrap();

        let result = engine()
            .execute(
                &schema,
                request("{ pet { __typename ... on Cat { meows } ... on Dog { barks } } }"),
            )
            .await
            .unwrap();

        let pet = &result.body["data"]["pet"];
        assert_eq!(pet["__typename"], "Cat");
        assert_eq!(pet["meows"], true);
        assert!(pet.get("barks").is_none());
    }

    #[tokio::test]
    async fn test_named_fragments() {
        let schema = schema();
        let query = r#"
            query Q { products { ...ProductBits } }
            fragment ProductBits on Product { id name }
        "#;
        let result = engine().execute(&schema, request(query)).await.unwrap();
        let product = &result.body["data"]["products"][0];
        assert_eq!(product["id"], "mock-id");
        assert_eq!(product["name"], "Hello World");
    }

    #[tokio::test]
    async fn test_fragment_cycle_detected() {
        let schema = schema();
        let query = r#"
            query Q { products { ...A } }
            fragment A on Product { ...B }
            fragment B on Product { ...A }
        "#;
        let err = engine().execute(&schema, request(query)).await.unwrap_err();
        assert_eq!(err.code(), "GRAPHQL_VALIDATION_ERROR");
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn test_custom_scalar_placeholder() {
        let sdl = r#"
            scalar DateTime
            scalar Money
            type Query { at: DateTime cost: Money }
        "#;
        let schema = CompiledSchema::parse(sdl).unwrap();
        let result = engine()
            .execute(&schema, request("{ at cost }"))
            .await
            .unwrap();
        assert_eq!(result.body["data"]["at"], "2024-01-01T00:00:00Z");
        assert_eq!(result.body["data"]["cost"], "mock-money");
    }

    #[tokio::test]
    async fn test_subscription_rejected() {
        let sdl = r#"
            type Query { ok: Boolean }
            type Subscription { ticks: Int }
        "#;
        let schema = CompiledSchema::parse(sdl).unwrap();
        let err = engine()
            .execute(&schema, request("subscription { ticks }"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GRAPHQL_VALIDATION_ERROR");
    }
}
