//! Entity schema registry.
//!
//! Maps an entity type name to the properties and internal fields a filter
//! may address. Lookups are case-insensitive. A key with a leading underscore
//! (`_Account`) addresses the internal field table; anything else addresses
//! the public property table. The registry is built once at startup and is
//! read-only afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use unirest_core::{FieldKind, ValueType};

use crate::error::SchemaError;

/// Resolved description of a filterable property or field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Canonical spelling, including the leading underscore for fields.
    pub name: String,
    pub kind: FieldKind,
    pub value_type: ValueType,
}

impl FieldDescriptor {
    /// Name of the public property this descriptor refers to.
    pub fn property_name(&self) -> &str {
        self.name.strip_prefix('_').unwrap_or(&self.name)
    }
}

/// Schema of one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    properties: HashMap<String, FieldDescriptor>,
    fields: HashMap<String, FieldDescriptor>,
}

impl EntitySchema {
    pub fn builder(name: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            name: name.into(),
            properties: HashMap::new(),
            fields: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a filter key to a property or field descriptor.
    pub fn resolve(&self, key: &str) -> Option<&FieldDescriptor> {
        let lookup = key.to_ascii_lowercase();
        if key.starts_with('_') {
            self.fields.get(&lookup)
        } else {
            self.properties.get(&lookup)
        }
    }

    /// Public properties sorted by name.
    pub fn properties(&self) -> Vec<&FieldDescriptor> {
        let mut props: Vec<_> = self.properties.values().collect();
        props.sort_by(|a, b| a.name.cmp(&b.name));
        props
    }
}

pub struct EntitySchemaBuilder {
    name: String,
    properties: HashMap<String, FieldDescriptor>,
    fields: HashMap<String, FieldDescriptor>,
}

impl EntitySchemaBuilder {
    /// Register a public property together with its `_Name` backing field.
    pub fn property(mut self, name: &str, value_type: ValueType) -> Self {
        self.properties.insert(
            name.to_ascii_lowercase(),
            FieldDescriptor {
                name: name.to_string(),
                kind: FieldKind::Property,
                value_type,
            },
        );
        let field = format!("_{name}");
        self.fields.insert(
            field.to_ascii_lowercase(),
            FieldDescriptor {
                name: field,
                kind: FieldKind::Field,
                value_type,
            },
        );
        self
    }

    /// Register an internal field that has no public property.
    pub fn field(mut self, name: &str, value_type: ValueType) -> Self {
        let name = if name.starts_with('_') {
            name.to_string()
        } else {
            format!("_{name}")
        };
        self.fields.insert(
            name.to_ascii_lowercase(),
            FieldDescriptor {
                name,
                kind: FieldKind::Field,
                value_type,
            },
        );
        self
    }

    pub fn build(self) -> EntitySchema {
        EntitySchema {
            name: self.name,
            properties: self.properties,
            fields: self.fields,
        }
    }
}

/// Registry of entity schemas, keyed by case-insensitive type name.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    entities: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, replacing any existing one with the same name.
    pub fn register(&mut self, schema: EntitySchema) {
        self.entities
            .insert(schema.name.to_ascii_lowercase(), Arc::new(schema));
    }

    /// Look up an entity type by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.entities.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Registered entity names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entities.values().map(|e| e.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Merge entities described in a TOML document.
    ///
    /// ```toml
    /// [[entity]]
    /// name = "Project"
    ///
    /// [entity.properties]
    /// Number = "string"
    /// Budget = "decimal"
    ///
    /// [entity.fields]
    /// _Internal = "integer"
    /// ```
    pub fn extend_from_toml(&mut self, document: &str) -> Result<usize, SchemaError> {
        let file: SchemaFile = toml::from_str(document)?;
        let count = file.entity.len();

        for entity in file.entity {
            if entity.properties.is_empty() && entity.fields.is_empty() {
                return Err(SchemaError::EmptyEntity(entity.name));
            }
            let mut builder = EntitySchema::builder(entity.name.clone());
            for (name, ty) in &entity.properties {
                builder = builder.property(name, parse_type(&entity.name, ty)?);
            }
            for (name, ty) in &entity.fields {
                builder = builder.field(name, parse_type(&entity.name, ty)?);
            }
            tracing::debug!(entity = %entity.name, "registered entity schema");
            self.register(builder.build());
        }

        Ok(count)
    }

    pub fn extend_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize, SchemaError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.extend_from_toml(&document)
    }
}

fn parse_type(entity: &str, ty: &str) -> Result<ValueType, SchemaError> {
    ValueType::parse(ty).ok_or_else(|| SchemaError::ValueType {
        entity: entity.to_string(),
        source: unirest_core::CoreError::UnknownValueType(ty.to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entity: Vec<EntityDefinition>,
}

#[derive(Debug, Deserialize)]
struct EntityDefinition {
    name: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}
