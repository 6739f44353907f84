use crate::document::Body;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A value that is either one string for every locale or one per locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocalizedString {
    Plain(String),
    Localized(BTreeMap<String, String>),
}

impl LocalizedString {
    /// The text for `locale`, falling back to `default`. Plain values resolve
    /// the same everywhere.
    pub fn resolve(&self, locale: Option<&str>, default: Option<&str>) -> Option<&str> {
        match self {
            LocalizedString::Plain(s) => Some(s),
            LocalizedString::Localized(map) => locale
                .and_then(|l| map.get(l))
                .or_else(|| default.and_then(|d| map.get(d)))
                .map(String::as_str),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            LocalizedString::Plain(s) => Value::String(s.clone()),
            LocalizedString::Localized(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        }
    }
}

/// A validated field value, tagged by its declared type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Bool(bool),
    Number(Number),
    StringArray(Vec<String>),
    Url(String),
    Localized(LocalizedString),
    Object(Map<String, Value>),
    /// Kept as written in the source, `YYYY-MM-DD` or RFC 3339.
    Date(String),
}

impl FieldValue {
    /// Convert back to the JSON value it was validated from.
    pub fn to_value(&self) -> Value {
        match self {
            FieldValue::String(s) | FieldValue::Url(s) | FieldValue::Date(s) => {
                Value::String(s.clone())
            }
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::StringArray(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            FieldValue::Localized(l) => l.to_value(),
            FieldValue::Object(map) => Value::Object(map.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Url(s) | FieldValue::Date(s) => Some(s),
            FieldValue::Localized(LocalizedString::Plain(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A validated, typed content item. Shared immutably once indexed; a changed
/// source file produces a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub collection: String,
    pub locale: Option<String>,
    pub slug: String,
    /// Source path relative to the content root.
    pub path: PathBuf,
    /// Declared fields that have a value, in declaration order.
    pub fields: Vec<(String, FieldValue)>,
    /// Undeclared keys, kept when the collection allows them.
    pub extra: Map<String, Value>,
    pub body: Option<Body>,
    pub modified_at: DateTime<Utc>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// JSON value of a declared or extra field. Dotted names reach into objects.
    pub fn value(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.get(name) {
            return Some(value.to_value());
        }
        if let Some(value) = self.extra.get(name) {
            return Some(value.clone());
        }

        let (head, rest) = name.split_once('.')?;
        let mut current = self.value(head)?;
        for part in rest.split('.') {
            current = match current {
                Value::Object(mut map) => map.remove(part)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Ordering weight, when the record carries a numeric `weight`.
    pub fn weight(&self) -> Option<f64> {
        self.get("weight").and_then(FieldValue::as_f64)
    }

    /// Text of a string-like field resolved for `locale`.
    pub fn text(&self, name: &str, locale: Option<&str>, default: Option<&str>) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Localized(l) => l.resolve(locale, default),
            other => other.as_str(),
        }
    }

    /// All field values as one JSON object: declared fields then extras.
    pub fn fields_json(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_value());
        }
        map
    }

    /// Serializable form for the command line and other consumers.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("collection".into(), Value::String(self.collection.clone()));
        out.insert(
            "locale".into(),
            self.locale.clone().map_or(Value::Null, Value::String),
        );
        out.insert("slug".into(), Value::String(self.slug.clone()));
        out.insert(
            "path".into(),
            Value::String(self.path.to_string_lossy().into_owned()),
        );
        out.insert("fields".into(), Value::Object(self.fields_json()));
        if let Some(body) = &self.body {
            out.insert(
                "headings".into(),
                serde_json::to_value(&body.headings).unwrap_or(Value::Null),
            );
            out.insert("html".into(), Value::String(body.document.html().to_string()));
        }
        out.insert(
            "modified_at".into(),
            Value::String(self.modified_at.to_rfc3339()),
        );
        Value::Object(out)
    }
}
