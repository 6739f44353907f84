use crate::error::{QuireError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// What a collection's records carry besides their fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Markdown documents: fields plus a rendered body.
    Page,
    /// Structured records only.
    Data,
}

/// Semantic type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    String,
    Boolean,
    Number,
    StringArray,
    Url,
    LocalizedString,
    #[serde(alias = "nested-object")]
    Object,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Number => "number",
            FieldType::StringArray => "string-array",
            FieldType::Url => "url",
            FieldType::LocalizedString => "localized-string",
            FieldType::Object => "object",
            FieldType::Date => "date",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check applied to a field value after its type has been accepted.
#[derive(Clone)]
pub enum Predicate {
    /// Absolute URL with scheme and host.
    Url,
    /// Strings (or every string of a string array) must match.
    Pattern(Regex),
    /// Strings (or every string of a string array) must be one of the values.
    OneOf(Vec<String>),
    /// Strings, arrays and objects must not be empty.
    NonEmpty,
    /// A named check supplied by the embedding program.
    Custom {
        name: &'static str,
        check: fn(&serde_json::Value) -> bool,
    },
}

impl Predicate {
    pub fn name(&self) -> &str {
        match self {
            Predicate::Url => "url",
            Predicate::Pattern(_) => "pattern",
            Predicate::OneOf(_) => "one-of",
            Predicate::NonEmpty => "non-empty",
            Predicate::Custom { name, .. } => name,
        }
    }

    pub fn check(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;

        match self {
            Predicate::Url => value.as_str().is_some_and(is_absolute_url),
            Predicate::Pattern(re) => match value {
                Value::String(s) => re.is_match(s),
                Value::Array(items) => items
                    .iter()
                    .all(|item| item.as_str().is_some_and(|s| re.is_match(s))),
                _ => false,
            },
            Predicate::OneOf(allowed) => {
                let allowed = |s: &str| allowed.iter().any(|a| a == s);
                match value {
                    Value::String(s) => allowed(s),
                    Value::Array(items) => {
                        items.iter().all(|item| item.as_str().is_some_and(allowed))
                    }
                    _ => false,
                }
            }
            Predicate::NonEmpty => match value {
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
                _ => true,
            },
            Predicate::Custom { check, .. } => check(value),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Url => f.write_str("Url"),
            Predicate::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Predicate::OneOf(values) => f.debug_tuple("OneOf").field(values).finish(),
            Predicate::NonEmpty => f.write_str("NonEmpty"),
            Predicate::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Predicate::Url, Predicate::Url) => true,
            (Predicate::Pattern(a), Predicate::Pattern(b)) => a.as_str() == b.as_str(),
            (Predicate::OneOf(a), Predicate::OneOf(b)) => a == b,
            (Predicate::NonEmpty, Predicate::NonEmpty) => true,
            (Predicate::Custom { name: a, .. }, Predicate::Custom { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Definition of a single field in a collection schema
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub predicates: Vec<Predicate>,
    /// Child specs of an `object` field, validated recursively.
    pub fields: Vec<FieldSpec>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSpec {
            name: name.into(),
            field_type,
            required: false,
            default: None,
            predicates: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields = fields;
        self
    }
}

/// Definition of a single collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDefinition {
    pub name: String,
    pub kind: RecordKind,
    /// Glob patterns relative to the content root.
    pub sources: Vec<String>,
    pub localized: bool,
    pub fields: Vec<FieldSpec>,
    pub additional_properties: bool,
    pub allow_empty: bool,
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>, kind: RecordKind, source: impl Into<String>) -> Self {
        CollectionDefinition {
            name: name.into(),
            kind,
            sources: vec![source.into()],
            localized: false,
            fields: Vec::new(),
            additional_properties: true,
            allow_empty: true,
        }
    }

    pub fn source(mut self, pattern: impl Into<String>) -> Self {
        self.sources.push(pattern.into());
        self
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = allowed;
        self
    }

    pub fn allow_empty(mut self, allowed: bool) -> Self {
        self.allow_empty = allowed;
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Structural checks run before a definition is registered.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(QuireError::Schema("Collection name must not be empty".into()));
        }
        if self.sources.is_empty() {
            return Err(QuireError::Schema(format!(
                "Collection '{}' declares no source pattern",
                self.name
            )));
        }
        check_unique_fields(&self.name, "", &self.fields)
    }
}

fn check_unique_fields(collection: &str, prefix: &str, fields: &[FieldSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(QuireError::Schema(format!(
                "Collection '{collection}' declares field '{prefix}{}' more than once",
                field.name
            )));
        }
        if !field.fields.is_empty() {
            if field.field_type != FieldType::Object {
                return Err(QuireError::Schema(format!(
                    "Field '{prefix}{}' in '{collection}' has nested fields but is not an object",
                    field.name
                )));
            }
            check_unique_fields(collection, &format!("{prefix}{}.", field.name), &field.fields)?;
        }
    }
    Ok(())
}

/// Locale codes known to the site and the one used when a path names none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locales {
    default: Option<String>,
    known: Vec<String>,
}

impl Locales {
    pub fn new<I, S>(default: impl Into<String>, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let default = default.into();
        let mut known: Vec<String> = known.into_iter().map(Into::into).collect();
        if !known.contains(&default) {
            known.insert(0, default.clone());
        }
        Locales {
            default: Some(default),
            known,
        }
    }

    /// No locales configured; localized collections cannot be used.
    pub fn none() -> Self {
        Locales::default()
    }

    pub fn default_locale(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn known(&self) -> &[String] {
        &self.known
    }

    pub fn is_known(&self, code: &str) -> bool {
        self.known.iter().any(|k| k == code)
    }
}

/// Absolute URL check: a scheme, `://`, and a non-empty host.
pub fn is_absolute_url(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((scheme, rest)) = s.split_once("://") else {
        return false;
    };

    let mut scheme_chars = scheme.chars();
    if !scheme_chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    if !scheme_chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return false;
    }

    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((ip, tail)) if !ip.is_empty() => (ip, tail.strip_prefix(':')),
            _ => return false,
        }
    } else {
        match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }

    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '%' | ':'))
}
