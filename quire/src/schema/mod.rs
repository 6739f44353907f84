mod parser;
mod registry;
mod types;

pub use parser::{parse_config, parse_config_str, ContentConfig};
pub use registry::SchemaRegistry;
pub use types::{
    is_absolute_url, CollectionDefinition, FieldSpec, FieldType, Locales, Predicate, RecordKind,
};
