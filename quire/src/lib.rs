pub mod document;
pub mod error;
pub mod index;
pub mod pattern;
pub mod query;
pub mod record;
pub mod report;
pub mod schema;
pub mod source;
pub mod store;
pub mod validation;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use document::{Heading, RenderedDocument, Renderer};
pub use error::{QuireError, Result};
pub use index::{CancelToken, ContentIndex, Snapshot};
pub use query::{meta_projection, Filter, Listing, Page, Projection, QueryEngine, Resolved};
pub use record::{FieldValue, LocalizedString, Record};
pub use report::{BuildReport, Strictness};
pub use schema::{CollectionDefinition, FieldSpec, FieldType, Predicate, RecordKind, SchemaRegistry};
pub use store::ContentStore;
