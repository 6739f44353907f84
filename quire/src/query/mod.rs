//! Read side: lookups, listings and projections over a snapshot.
//!
//! Every call grabs the current snapshot once, so a result never mixes two
//! rebuilds.

use crate::error::{QuireError, Result};
use crate::index::{ContentIndex, Snapshot};
use crate::record::Record;
use crate::schema::{CollectionDefinition, Locales, SchemaRegistry};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A record found by slug.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub record: Arc<Record>,
    /// The requested locale had no record; this one is the default locale's.
    pub fallback: bool,
}

/// Record predicate for listings. Field names may be dotted, and `slug`,
/// `locale`, `path` and `collection` address the record identity.
#[derive(Clone)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    /// Membership for string arrays, substring for strings.
    Contains(String, String),
    Exists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Custom(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains(field.into(), needle.into())
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Exists(field.into())
    }

    pub fn custom(check: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        Filter::Custom(Arc::new(check))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut any) => {
                any.push(other);
                Filter::Or(any)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(field, expected) => lookup(record, field).as_ref() == Some(expected),
            Filter::Ne(field, expected) => lookup(record, field).as_ref() != Some(expected),
            Filter::Contains(field, needle) => match lookup(record, field) {
                Some(Value::Array(items)) => items.iter().any(|i| i.as_str() == Some(needle)),
                Some(Value::String(s)) => s.contains(needle.as_str()),
                _ => false,
            },
            Filter::Exists(field) => lookup(record, field).is_some(),
            Filter::And(all) => all.iter().all(|f| f.matches(record)),
            Filter::Or(any) => any.iter().any(|f| f.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
            Filter::Custom(check) => check(record),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(k, v) => write!(f, "{k} == {v}"),
            Filter::Ne(k, v) => write!(f, "{k} != {v}"),
            Filter::Contains(k, v) => write!(f, "{k} contains {v:?}"),
            Filter::Exists(k) => write!(f, "exists {k}"),
            Filter::And(all) => f.debug_tuple("And").field(all).finish(),
            Filter::Or(any) => f.debug_tuple("Or").field(any).finish(),
            Filter::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Filter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn lookup(record: &Record, field: &str) -> Option<Value> {
    match field {
        "slug" => Some(Value::String(record.slug.clone())),
        "locale" => record.locale.clone().map(Value::String),
        "path" => Some(Value::String(record.path.to_string_lossy().into_owned())),
        "collection" => Some(Value::String(record.collection.clone())),
        _ => record.value(field),
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    /// 1-based.
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Page { number, size }
    }

    fn offset(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

/// Result of [`QueryEngine::list`]. Holds the snapshot it was built from, so
/// every [`Listing::iter`] call walks the same records from the start.
#[derive(Debug, Clone)]
pub struct Listing {
    snapshot: Arc<Snapshot>,
    collection: String,
    locale: Option<String>,
    filter: Option<Filter>,
    page: Option<Page>,
}

impl Listing {
    /// Matching records before pagination.
    fn matching(&self) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.snapshot
            .collection(&self.collection)
            .into_iter()
            .flat_map(move |c| c.ordered_in(self.locale.as_deref()))
            .filter(move |r| self.filter.as_ref().map_or(true, |f| f.matches(r)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> + '_ {
        let (skip, take) = match self.page {
            Some(page) => (page.offset(), page.size),
            None => (0, usize::MAX),
        };
        self.matching().skip(skip).take(take)
    }

    /// Number of matching records across all pages.
    pub fn total(&self) -> usize {
        self.matching().count()
    }

    pub fn page(&self) -> Option<Page> {
        self.page
    }

    pub fn page_count(&self) -> usize {
        match self.page {
            Some(page) if page.size > 0 => self.total().div_ceil(page.size),
            Some(_) => 0,
            None => 1,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn to_vec(&self) -> Vec<Arc<Record>> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a Arc<Record>;
    type IntoIter = Box<dyn Iterator<Item = &'a Arc<Record>> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Neighbours of a record in listing order
#[derive(Debug, Clone, Default)]
pub struct Surroundings {
    pub previous: Option<Arc<Record>>,
    pub next: Option<Arc<Record>>,
}

/// A record reduced to a few fields, for navigation and cards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub collection: String,
    pub locale: Option<String>,
    pub slug: String,
    pub values: Map<String, Value>,
}

impl Projection {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

/// Project a record onto the requested fields. `slug`, `locale` and `path`
/// may be requested as well; names the record doesn't carry are left out.
pub fn meta_projection(record: &Record, fields: &[&str]) -> Projection {
    let values = fields
        .iter()
        .filter_map(|&name| {
            let value = match name {
                "slug" | "locale" | "path" => lookup(record, name),
                _ => record.value(name),
            }?;
            Some((name.to_string(), value))
        })
        .collect();

    Projection {
        collection: record.collection.clone(),
        locale: record.locale.clone(),
        slug: record.slug.clone(),
        values,
    }
}

/// Query surface over the live index.
#[derive(Clone, Copy)]
pub struct QueryEngine<'a> {
    registry: &'a SchemaRegistry,
    index: &'a ContentIndex,
    locales: &'a Locales,
}

impl<'a> QueryEngine<'a> {
    pub fn new(registry: &'a SchemaRegistry, index: &'a ContentIndex, locales: &'a Locales) -> Self {
        QueryEngine {
            registry,
            index,
            locales,
        }
    }

    /// Look a record up by slug, falling back to the default locale when the
    /// requested one has no record. Non-localized collections ignore `locale`.
    pub fn get_by_slug(&self, collection: &str, locale: Option<&str>, slug: &str) -> Result<Resolved> {
        let definition = self.registry.get(collection)?;
        let snapshot = self.index.snapshot();
        let not_found = || QuireError::NotFound {
            collection: collection.to_string(),
            slug: slug.to_string(),
        };

        if !definition.localized {
            return snapshot
                .get(collection, None, slug)
                .map(|record| Resolved {
                    record: Arc::clone(record),
                    fallback: false,
                })
                .ok_or_else(not_found);
        }

        let default = self.locales.default_locale();
        let requested = locale.or(default);
        if let Some(record) = snapshot.get(collection, requested, slug) {
            return Ok(Resolved {
                record: Arc::clone(record),
                fallback: false,
            });
        }
        if requested != default {
            if let Some(record) = snapshot.get(collection, default, slug) {
                log::debug!(
                    "{collection}/{slug}: no '{}' record, using '{}'",
                    requested.unwrap_or_default(),
                    default.unwrap_or_default()
                );
                return Ok(Resolved {
                    record: Arc::clone(record),
                    fallback: true,
                });
            }
        }
        Err(not_found())
    }

    /// Ordered, filtered and paginated records of one collection and locale.
    /// `None` selects the default locale of a localized collection.
    pub fn list(
        &self,
        collection: &str,
        locale: Option<&str>,
        filter: Option<Filter>,
        page: Option<Page>,
    ) -> Result<Listing> {
        let definition = self.registry.get(collection)?;
        Ok(Listing {
            snapshot: self.index.snapshot(),
            collection: collection.to_string(),
            locale: self.listing_locale(definition, locale),
            filter,
            page,
        })
    }

    pub fn count(&self, collection: &str, locale: Option<&str>, filter: Option<Filter>) -> Result<usize> {
        Ok(self.list(collection, locale, filter, None)?.total())
    }

    /// Previous and next records around `slug` in listing order.
    pub fn surroundings(&self, collection: &str, locale: Option<&str>, slug: &str) -> Result<Surroundings> {
        let listing = self.list(collection, locale, None, None)?;
        let records = listing.to_vec();
        let position = records
            .iter()
            .position(|r| r.slug == slug)
            .ok_or_else(|| QuireError::NotFound {
                collection: collection.to_string(),
                slug: slug.to_string(),
            })?;

        Ok(Surroundings {
            previous: position
                .checked_sub(1)
                .and_then(|i| records.get(i))
                .cloned(),
            next: records.get(position + 1).cloned(),
        })
    }

    pub fn meta_projection(&self, record: &Record, fields: &[&str]) -> Projection {
        meta_projection(record, fields)
    }

    fn listing_locale(&self, definition: &CollectionDefinition, locale: Option<&str>) -> Option<String> {
        if !definition.localized {
            return None;
        }
        locale
            .or(self.locales.default_locale())
            .map(str::to_string)
    }
}
