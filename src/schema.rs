//! Compiled schema representation.
//!
//! A [`CompiledSchema`] is built once from SDL text and then shared read-only
//! with the mock engine. Parsing goes through `async_graphql::parser`; the
//! resulting AST is flattened into a name-indexed type table so field lookups
//! during mock execution are cheap. Type extensions (`extend type Query`),
//! which federation subgraph SDL uses heavily, are merged into their base
//! types; an extension without a base acts as the definition.

use crate::error::{Error, Result};
use async_graphql::parser::parse_schema;
use async_graphql::parser::types::{BaseType, Type, TypeKind, TypeSystemDefinition};
use std::collections::HashMap;

/// The wire type of a field, with list/non-null structure preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Named { name: String, nullable: bool },
    List { inner: Box<FieldType>, nullable: bool },
}

impl FieldType {
    fn from_ast(ty: &Type) -> Self {
        match &ty.base {
            BaseType::Named(name) => FieldType::Named {
                name: name.to_string(),
                nullable: ty.nullable,
            },
            BaseType::List(inner) => FieldType::List {
                inner: Box::new(FieldType::from_ast(inner)),
                nullable: ty.nullable,
            },
        }
    }

    /// The innermost named type.
    pub fn unwrapped_name(&self) -> &str {
        match self {
            FieldType::Named { name, .. } => name,
            FieldType::List { inner, .. } => inner.unwrapped_name(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List { .. })
    }
}

/// A single field of an object or interface type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub ty: FieldType,
}

/// Shape of a named type after flattening the AST.
#[derive(Debug, Clone)]
pub enum TypeShape {
    Scalar,
    Object {
        fields: HashMap<String, FieldDef>,
    },
    Interface {
        fields: HashMap<String, FieldDef>,
        implementers: Vec<String>,
    },
    Union {
        members: Vec<String>,
    },
    Enum {
        values: Vec<String>,
    },
    InputObject,
}

/// A schema compiled from SDL, indexed by type name.
///
/// Read-only once built; the schema cache hands out `Arc<CompiledSchema>`.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    sdl: String,
    types: HashMap<String, TypeShape>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

const BUILTIN_SCALARS: &[&str] = &["ID", "String", "Int", "Float", "Boolean"];

impl CompiledSchema {
    /// Parse SDL text into a compiled schema.
    pub fn parse(sdl: &str) -> Result<Self> {
        let document =
            parse_schema(sdl).map_err(|err| Error::Schema(format!("cannot parse SDL: {err}")))?;

        let mut types: HashMap<String, TypeShape> = HashMap::new();
        let mut query_type = "Query".to_string();
        let mut mutation_type = None;
        let mut subscription_type = None;

        for definition in &document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema_def) => {
                    if let Some(name) = &schema_def.node.query {
                        query_type = name.node.to_string();
                    }
                    if let Some(name) = &schema_def.node.mutation {
                        mutation_type = Some(name.node.to_string());
                    }
                    if let Some(name) = &schema_def.node.subscription {
                        subscription_type = Some(name.node.to_string());
                    }
                }
                TypeSystemDefinition::Type(type_def) => {
                    let name = type_def.node.name.node.to_string();
                    let shape = match &type_def.node.kind {
                        TypeKind::Scalar => TypeShape::Scalar,
                        TypeKind::Object(object) => {
                            let fields = object
                                .fields
                                .iter()
                                .map(|f| {
                                    (
                                        f.node.name.node.to_string(),
                                        FieldDef {
                                            ty: FieldType::from_ast(&f.node.ty.node),
                                        },
                                    )
                                })
                                .collect();
                            TypeShape::Object { fields }
                        }
                        TypeKind::Interface(interface) => {
                            let fields = interface
                                .fields
                                .iter()
                                .map(|f| {
                                    (
                                        f.node.name.node.to_string(),
                                        FieldDef {
                                            ty: FieldType::from_ast(&f.node.ty.node),
                                        },
                                    )
                                })
                                .collect();
                            TypeShape::Interface {
                                fields,
                                implementers: Vec::new(),
                            }
                        }
                        TypeKind::Union(union) => TypeShape::Union {
                            members: union
                                .members
                                .iter()
                                .map(|m| m.node.to_string())
                                .collect(),
                        },
                        TypeKind::Enum(en) => TypeShape::Enum {
                            values: en
                                .values
                                .iter()
                                .map(|v| v.node.value.node.to_string())
                                .collect(),
                        },
                        TypeKind::InputObject(_) => TypeShape::InputObject,
                    };
                    merge_type(&mut types, name, shape);
                }
                TypeSystemDefinition::Directive(_) => {}
            }
        }

        // Second pass over the AST to record which objects implement which
        // interfaces; needed to pick a concrete type when mocking an
        // interface-typed field.
        let mut implementations: HashMap<String, Vec<String>> = HashMap::new();
        for definition in &document.definitions {
            if let TypeSystemDefinition::Type(type_def) = definition {
                if let TypeKind::Object(object) = &type_def.node.kind {
                    for interface in &object.implements {
                        implementations
                            .entry(interface.node.to_string())
                            .or_default()
                            .push(type_def.node.name.node.to_string());
                    }
                }
            }
        }
        for (interface_name, implementers) in implementations {
            if let Some(TypeShape::Interface {
                implementers: slot, ..
            }) = types.get_mut(&interface_name)
            {
                *slot = implementers;
            }
        }

        for builtin in BUILTIN_SCALARS {
            types
                .entry(builtin.to_string())
                .or_insert(TypeShape::Scalar);
        }

        Ok(Self {
            sdl: sdl.to_string(),
            types,
            query_type,
            mutation_type,
            subscription_type,
        })
    }

    /// The SDL text this schema was compiled from.
    ///
    /// This is what `_service { sdl }` introspection responses return.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    /// Look up a type by name.
    pub fn type_shape(&self, name: &str) -> Option<&TypeShape> {
        self.types.get(name)
    }

    /// Field definition on an object or interface type.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        match self.types.get(type_name)? {
            TypeShape::Object { fields } | TypeShape::Interface { fields, .. } => {
                fields.get(field_name)
            }
            _ => None,
        }
    }

    /// Name of the root type for the given operation kind.
    pub fn root_type(&self, operation: RootKind) -> Option<&str> {
        match operation {
            RootKind::Query => Some(self.query_type.as_str()),
            RootKind::Mutation => self.mutation_type.as_deref(),
            RootKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// True when the named type can carry a selection set.
    pub fn is_composite(&self, name: &str) -> bool {
        matches!(
            self.types.get(name),
            Some(TypeShape::Object { .. })
                | Some(TypeShape::Interface { .. })
                | Some(TypeShape::Union { .. })
        )
    }
}

/// Root operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Query,
    Mutation,
    Subscription,
}

/// Merge a freshly parsed shape into the table, combining field sets when the
/// type was already seen (base definition + `extend type`).
fn merge_type(types: &mut HashMap<String, TypeShape>, name: String, shape: TypeShape) {
    match types.get_mut(&name) {
        None => {
            types.insert(name, shape);
        }
        Some(existing) => match (existing, shape) {
            (
                TypeShape::Object { fields: base },
                TypeShape::Object { fields: extension },
            ) => {
                base.extend(extension);
            }
            (
                TypeShape::Interface { fields: base, .. },
                TypeShape::Interface {
                    fields: extension, ..
                },
            ) => {
                base.extend(extension);
            }
            (
                TypeShape::Union { members: base },
                TypeShape::Union { members: extension },
            ) => {
                base.extend(extension);
            }
            (
                TypeShape::Enum { values: base },
                TypeShape::Enum { values: extension },
            ) => {
                base.extend(extension);
            }
            (existing, replacement) => {
                // Conflicting redefinition; last one wins, mirroring how
                // lenient SDL processors treat duplicate definitions.
                *existing = replacement;
            }
        },
    }
}
