use thiserror::Error;
use unirest_core::CoreError;

/// Errors produced while compiling HTTP filter parameters.
///
/// Every variant means the filter is invalid and maps to a 400 response.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid filter: unknown property '{property}' on {entity}")]
    UnknownProperty { entity: String, property: String },

    #[error("Invalid filter: no value given for '{property}'")]
    EmptyValue { property: String },

    #[error("Invalid filter: {source} for '{property}'")]
    InvalidValue {
        property: String,
        #[source]
        source: CoreError,
    },

    #[error("Invalid filter: value '{value}' for '{property}' cannot be embedded in a server-side expression")]
    UnsafeValue { property: String, value: String },

    #[error("The maximum number of OR's in a filter is {limit}, '{property}' has {count}")]
    TooManyAlternatives {
        property: String,
        count: usize,
        limit: usize,
    },
}

impl FilterError {
    pub fn unknown_property(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity: entity.into(),
            property: property.into(),
        }
    }
}

/// Errors produced while loading entity schemas.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse schema: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Entity '{entity}': {source}")]
    ValueType {
        entity: String,
        #[source]
        source: CoreError,
    },

    #[error("Entity '{0}' has no properties")]
    EmptyEntity(String),
}
