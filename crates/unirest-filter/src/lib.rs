pub mod catalogue;
pub mod client;
pub mod compiler;
pub mod error;
pub mod parser;
pub mod schema;

pub use client::ClientPredicate;
pub use compiler::{
    CompiledQuery, CompilerSettings, FilterCompiler, MAX_OR_VALUES, OR_DELIMITER, OverflowStrategy,
};
pub use error::{FilterError, SchemaError};
pub use parser::FilterParams;
pub use schema::{EntitySchema, EntitySchemaBuilder, FieldDescriptor, SchemaRegistry};
