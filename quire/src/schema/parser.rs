use super::types::{CollectionDefinition, FieldSpec, FieldType, Locales, Predicate, RecordKind};
use crate::error::{QuireError, Result};
use crate::report::Strictness;
use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Everything loaded from `content.yaml`
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Content root. Relative to the config file when loaded with `parse_config`.
    pub root: PathBuf,
    pub locales: Locales,
    pub strictness: Strictness,
    pub collections: Vec<CollectionDefinition>,
}

/// Parse a content.yaml file into a ContentConfig
pub fn parse_config(path: &Path) -> Result<ContentConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config_str(&content)?;
    if config.root.is_relative() {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.root = base.join(&config.root);
    }
    Ok(config)
}

/// Parse a content.yaml string into a ContentConfig
pub fn parse_config_str(content: &str) -> Result<ContentConfig> {
    let raw: RawConfig = serde_yaml::from_str(content)?;
    raw.into_config()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_root")]
    root: PathBuf,
    #[serde(default)]
    default_locale: Option<String>,
    #[serde(default)]
    locales: Vec<String>,
    #[serde(default)]
    strictness: Strictness,
    #[serde(default)]
    collections: OrderedMap<RawCollection>,
}

fn default_root() -> PathBuf {
    PathBuf::from("content")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCollection {
    kind: RecordKind,
    source: OneOrMany,
    #[serde(default)]
    localized: bool,
    #[serde(default)]
    fields: OrderedMap<RawField>,
    #[serde(default = "default_true")]
    additional_properties: bool,
    #[serde(default = "default_true")]
    allow_empty: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<serde_json::Value>,
    #[serde(rename = "enum", default)]
    enum_values: Option<Vec<String>>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    non_empty: bool,
    #[serde(default)]
    fields: OrderedMap<RawField>,
}

impl RawConfig {
    fn into_config(self) -> Result<ContentConfig> {
        let locales = match self.default_locale {
            Some(default) => {
                if !self.locales.is_empty() && !self.locales.contains(&default) {
                    return Err(QuireError::Config(format!(
                        "default_locale '{default}' is not listed in locales {:?}",
                        self.locales
                    )));
                }
                Locales::new(default, self.locales)
            }
            None if !self.locales.is_empty() => {
                return Err(QuireError::Config(
                    "locales are configured but default_locale is missing".into(),
                ));
            }
            None => Locales::none(),
        };

        let mut collections = Vec::with_capacity(self.collections.0.len());
        for (name, raw) in self.collections.0 {
            if raw.localized && locales.default_locale().is_none() {
                return Err(QuireError::Config(format!(
                    "Collection '{name}' is localized but no default_locale is configured"
                )));
            }
            collections.push(raw.into_definition(name)?);
        }

        Ok(ContentConfig {
            root: self.root,
            locales,
            strictness: self.strictness,
            collections,
        })
    }
}

impl RawCollection {
    fn into_definition(self, name: String) -> Result<CollectionDefinition> {
        let sources = match self.source {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        };
        let fields = self
            .fields
            .0
            .into_iter()
            .map(|(field_name, raw)| raw.into_spec(field_name))
            .collect::<Result<Vec<_>>>()?;

        Ok(CollectionDefinition {
            name,
            kind: self.kind,
            sources,
            localized: self.localized,
            fields,
            additional_properties: self.additional_properties,
            allow_empty: self.allow_empty,
        })
    }
}

impl RawField {
    fn into_spec(self, name: String) -> Result<FieldSpec> {
        let mut predicates = Vec::new();
        if self.field_type == FieldType::Url {
            predicates.push(Predicate::Url);
        }
        if let Some(values) = self.enum_values {
            predicates.push(Predicate::OneOf(values));
        }
        if let Some(pattern) = self.pattern {
            let re = Regex::new(&pattern).map_err(|e| {
                QuireError::Schema(format!("Field '{name}' has an invalid pattern: {e}"))
            })?;
            predicates.push(Predicate::Pattern(re));
        }
        if self.non_empty {
            predicates.push(Predicate::NonEmpty);
        }

        let fields = self
            .fields
            .0
            .into_iter()
            .map(|(child, raw)| raw.into_spec(child))
            .collect::<Result<Vec<_>>>()?;

        Ok(FieldSpec {
            name,
            field_type: self.field_type,
            required: self.required,
            default: self.default,
            predicates,
            fields,
        })
    }
}

/// A YAML mapping deserialized with its key order intact.
#[derive(Debug)]
struct OrderedMap<T>(Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, T)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}
