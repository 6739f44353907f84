use crate::document::{json_type_name, ParsedRecord};
use crate::record::{FieldValue, LocalizedString, Record};
use crate::schema::{CollectionDefinition, FieldSpec, FieldType, Locales, Predicate};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// `url` fields are checked for absolute URLs even when built without the predicate.
static URL_PREDICATE: Predicate = Predicate::Url;

/// Why a field was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum Reason {
    Missing,
    WrongType { expected: String, found: String },
    PredicateFailed { predicate: String },
    /// Undeclared key in a collection that forbids additional properties.
    Unexpected,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Missing => f.write_str("missing"),
            Reason::WrongType { expected, found } => {
                write!(f, "wrong type: expected {expected}, found {found}")
            }
            Reason::PredicateFailed { predicate } => write!(f, "failed predicate '{predicate}'"),
            Reason::Unexpected => f.write_str("unexpected field"),
        }
    }
}

/// A schema violation in one record. Any violation excludes the whole record.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{}: field '{field}' {reason}", path.display())]
pub struct ValidationError {
    pub collection: String,
    pub path: PathBuf,
    pub slug: Option<String>,
    pub field: String,
    #[serde(flatten)]
    pub reason: Reason,
}

/// Checks parsed records against their collection schema.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    locales: Locales,
}

impl Validator {
    pub fn new(locales: Locales) -> Self {
        Validator { locales }
    }

    /// Validate and type a parsed record. Returns every violation found when
    /// the record is rejected.
    pub fn validate(
        &self,
        definition: &CollectionDefinition,
        parsed: ParsedRecord,
    ) -> Result<Record, Vec<ValidationError>> {
        let ParsedRecord {
            collection,
            relative_path,
            locale,
            slug_hint,
            mut fields,
            body,
            modified_at,
        } = parsed;

        let mut issues: Vec<(String, Reason)> = Vec::new();
        let mut typed = Vec::with_capacity(definition.fields.len());

        for spec in &definition.fields {
            if let Some(value) = self.check_field(spec, "", fields.remove(&spec.name), &mut issues) {
                typed.push((spec.name.clone(), value));
            }
        }

        let extra = if definition.additional_properties {
            fields
        } else {
            for key in fields.keys() {
                issues.push((key.clone(), Reason::Unexpected));
            }
            Map::new()
        };

        let slug = match typed.iter().find(|(name, _)| name == "slug") {
            Some((_, FieldValue::String(s))) => s.trim().to_string(),
            _ => slug_hint,
        };
        if slug.is_empty() && !issues.iter().any(|(field, _)| field == "slug") {
            issues.push(("slug".into(), Reason::Missing));
        }

        if !issues.is_empty() {
            let slug = (!slug.is_empty()).then_some(slug);
            return Err(issues
                .into_iter()
                .map(|(field, reason)| ValidationError {
                    collection: collection.clone(),
                    path: relative_path.clone(),
                    slug: slug.clone(),
                    field,
                    reason,
                })
                .collect());
        }

        Ok(Record {
            collection,
            locale,
            slug,
            path: relative_path,
            fields: typed,
            extra,
            body,
            modified_at,
        })
    }

    fn check_field(
        &self,
        spec: &FieldSpec,
        prefix: &str,
        value: Option<Value>,
        issues: &mut Vec<(String, Reason)>,
    ) -> Option<FieldValue> {
        let name = format!("{prefix}{}", spec.name);

        let value = match value {
            Some(Value::Null) | None => spec.default.clone(),
            present => present,
        };
        let value = match value {
            Some(Value::Null) | None => {
                if spec.required {
                    issues.push((name, Reason::Missing));
                }
                return None;
            }
            Some(value) => value,
        };

        let before = issues.len();
        let typed = self.convert(spec, &name, value, issues)?;
        if issues.len() > before {
            return None;
        }

        let raw = typed.to_value();
        let implicit = (spec.field_type == FieldType::Url
            && !spec.predicates.contains(&Predicate::Url))
        .then_some(&URL_PREDICATE);
        for predicate in spec.predicates.iter().chain(implicit) {
            if !predicate.check(&raw) {
                issues.push((
                    name.clone(),
                    Reason::PredicateFailed {
                        predicate: predicate.name().to_string(),
                    },
                ));
            }
        }
        (issues.len() == before).then_some(typed)
    }

    fn convert(
        &self,
        spec: &FieldSpec,
        name: &str,
        value: Value,
        issues: &mut Vec<(String, Reason)>,
    ) -> Option<FieldValue> {
        let wrong_type = |issues: &mut Vec<(String, Reason)>, value: &Value| {
            issues.push((
                name.to_string(),
                Reason::WrongType {
                    expected: spec.field_type.to_string(),
                    found: json_type_name(value).to_string(),
                },
            ));
            None
        };

        match (spec.field_type, value) {
            (FieldType::String, Value::String(s)) => Some(FieldValue::String(s)),
            (FieldType::Boolean, Value::Bool(b)) => Some(FieldValue::Bool(b)),
            (FieldType::Number, Value::Number(n)) => Some(FieldValue::Number(n)),
            (FieldType::Url, Value::String(s)) => Some(FieldValue::Url(s)),
            (FieldType::StringArray, Value::Array(items)) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => strings.push(s),
                        other => {
                            issues.push((
                                name.to_string(),
                                Reason::WrongType {
                                    expected: "string-array".into(),
                                    found: format!("array containing {}", json_type_name(&other)),
                                },
                            ));
                            return None;
                        }
                    }
                }
                Some(FieldValue::StringArray(strings))
            }
            (FieldType::LocalizedString, value) => self.localized(name, value, issues),
            (FieldType::Date, Value::String(s)) => {
                if is_date(&s) {
                    Some(FieldValue::Date(s))
                } else {
                    issues.push((
                        name.to_string(),
                        Reason::WrongType {
                            expected: "date".into(),
                            found: "string".into(),
                        },
                    ));
                    None
                }
            }
            (FieldType::Object, Value::Object(mut map)) => {
                if spec.fields.is_empty() {
                    return Some(FieldValue::Object(map));
                }
                let nested_prefix = format!("{name}.");
                let mut out = Map::new();
                for child in &spec.fields {
                    let child_value = map.remove(&child.name);
                    if let Some(v) = self.check_field(child, &nested_prefix, child_value, issues) {
                        out.insert(child.name.clone(), v.to_value());
                    }
                }
                // Undeclared nested keys pass through untouched.
                out.extend(map);
                Some(FieldValue::Object(out))
            }
            (_, other) => wrong_type(issues, &other),
        }
    }

    fn localized(
        &self,
        name: &str,
        value: Value,
        issues: &mut Vec<(String, Reason)>,
    ) -> Option<FieldValue> {
        let wrong = |found: String| {
            (
                name.to_string(),
                Reason::WrongType {
                    expected: FieldType::LocalizedString.to_string(),
                    found,
                },
            )
        };

        match value {
            Value::String(s) => Some(FieldValue::Localized(LocalizedString::Plain(s))),
            Value::Object(map) if !map.is_empty() => {
                let mut out = BTreeMap::new();
                for (code, text) in map {
                    let Value::String(text) = text else {
                        issues.push(wrong(format!(
                            "mapping with {} value for '{code}'",
                            json_type_name(&text)
                        )));
                        return None;
                    };
                    if !self.locales.known().is_empty() && !self.locales.is_known(&code) {
                        issues.push(wrong(format!("mapping with unknown locale '{code}'")));
                        return None;
                    }
                    out.insert(code, text);
                }
                Some(FieldValue::Localized(LocalizedString::Localized(out)))
            }
            Value::Object(_) => {
                issues.push(wrong("empty mapping".into()));
                None
            }
            other => {
                issues.push(wrong(json_type_name(&other).to_string()));
                None
            }
        }
    }
}

fn is_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordKind;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parsed(fields: Value) -> ParsedRecord {
        ParsedRecord {
            collection: "project".into(),
            relative_path: PathBuf::from("projects/site.json"),
            locale: None,
            slug_hint: "site".into(),
            fields: fields.as_object().cloned().unwrap(),
            body: None,
            modified_at: Utc::now(),
        }
    }

    fn project() -> CollectionDefinition {
        CollectionDefinition::new("project", RecordKind::Data, "projects/*.json")
            .field(FieldSpec::new("title", FieldType::LocalizedString).required())
            .field(FieldSpec::new("weight", FieldType::Number))
            .field(FieldSpec::new("tech", FieldType::StringArray).with_default(json!([])))
            .field(FieldSpec::new("url", FieldType::Url))
    }

    fn validator() -> Validator {
        Validator::new(Locales::new("pt", ["pt", "en"]))
    }

    fn reasons(errors: &[ValidationError]) -> Vec<(&str, &Reason)> {
        errors.iter().map(|e| (e.field.as_str(), &e.reason)).collect()
    }

    #[test]
    fn test_valid_record_types_fields() {
        let record = validator()
            .validate(
                &project(),
                parsed(json!({"title": {"en": "Site", "pt": "Sítio"}, "weight": 2, "url": "https://x.dev"})),
            )
            .unwrap();

        assert_eq!(record.slug, "site");
        assert_eq!(record.weight(), Some(2.0));
        assert_eq!(record.get("tech"), Some(&FieldValue::StringArray(vec![])));
        assert_eq!(record.get("url"), Some(&FieldValue::Url("https://x.dev".into())));
        let names: Vec<_> = record.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["title", "weight", "tech", "url"]);
    }

    #[test]
    fn test_localized_string_accepts_both_shapes() {
        let v = validator();
        let plain = v.validate(&project(), parsed(json!({"title": "Site"}))).unwrap();
        assert_eq!(
            plain.get("title"),
            Some(&FieldValue::Localized(LocalizedString::Plain("Site".into())))
        );

        let mapped = v
            .validate(&project(), parsed(json!({"title": {"pt": "Sítio"}})))
            .unwrap();
        assert!(matches!(
            mapped.get("title"),
            Some(FieldValue::Localized(LocalizedString::Localized(_)))
        ));
    }

    #[test]
    fn test_localized_string_rejects_other_shapes() {
        let v = validator();
        for bad in [json!(42), json!({}), json!({"pt": 1}), json!({"fr": "Site"}), json!(["a"])] {
            let errors = v.validate(&project(), parsed(json!({ "title": bad }))).unwrap_err();
            assert_eq!(errors.len(), 1, "{bad}");
            assert!(matches!(errors[0].reason, Reason::WrongType { .. }), "{bad}");
        }
    }

    #[test]
    fn test_missing_required_and_null() {
        let v = validator();
        let errors = v.validate(&project(), parsed(json!({}))).unwrap_err();
        assert_eq!(reasons(&errors), vec![("title", &Reason::Missing)]);

        let errors = v.validate(&project(), parsed(json!({"title": null}))).unwrap_err();
        assert_eq!(reasons(&errors), vec![("title", &Reason::Missing)]);
    }

    #[test]
    fn test_wrong_type_and_url_predicate() {
        let errors = validator()
            .validate(
                &project(),
                parsed(json!({"title": "Site", "weight": "first", "url": "github.com/x"})),
            )
            .unwrap_err();
        assert_eq!(
            reasons(&errors),
            vec![
                (
                    "weight",
                    &Reason::WrongType {
                        expected: "number".into(),
                        found: "string".into()
                    }
                ),
                (
                    "url",
                    &Reason::PredicateFailed {
                        predicate: "url".into()
                    }
                ),
            ]
        );
        assert!(errors.iter().all(|e| e.slug.as_deref() == Some("site")));
        assert!(errors.iter().all(|e| e.path == PathBuf::from("projects/site.json")));
    }

    #[test]
    fn test_url_must_be_string() {
        let errors = validator()
            .validate(&project(), parsed(json!({"title": "Site", "url": 3})))
            .unwrap_err();
        assert!(matches!(errors[0].reason, Reason::WrongType { .. }));
    }

    #[test]
    fn test_string_array_items() {
        let errors = validator()
            .validate(&project(), parsed(json!({"title": "Site", "tech": ["vue", 3]})))
            .unwrap_err();
        assert_eq!(errors[0].field, "tech");
    }

    #[test]
    fn test_slug_field_overrides_hint() {
        let def = project().field(FieldSpec::new("slug", FieldType::String));
        let record = validator()
            .validate(&def, parsed(json!({"title": "Site", "slug": "my-site"})))
            .unwrap();
        assert_eq!(record.slug, "my-site");

        let mut empty = parsed(json!({"title": "Site"}));
        empty.slug_hint = String::new();
        let errors = validator().validate(&def, empty).unwrap_err();
        assert_eq!(reasons(&errors), vec![("slug", &Reason::Missing)]);
        assert_eq!(errors[0].slug, None);
    }

    #[test]
    fn test_additional_properties() {
        let record = validator()
            .validate(&project(), parsed(json!({"title": "Site", "draft": true})))
            .unwrap();
        assert_eq!(record.extra.get("draft"), Some(&json!(true)));

        let closed = project().additional_properties(false);
        let errors = validator()
            .validate(&closed, parsed(json!({"title": "Site", "draft": true})))
            .unwrap_err();
        assert_eq!(reasons(&errors), vec![("draft", &Reason::Unexpected)]);
    }

    #[test]
    fn test_nested_object_dotted_names() {
        let def = CollectionDefinition::new("people", RecordKind::Data, "people/*.yaml").field(
            FieldSpec::new("address", FieldType::Object).with_fields(vec![
                FieldSpec::new("city", FieldType::String).required(),
                FieldSpec::new("zip", FieldType::String),
            ]),
        );
        let errors = validator()
            .validate(&def, parsed(json!({"address": {"zip": 5}})))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "address.city");
        assert_eq!(errors[0].reason, Reason::Missing);
        assert_eq!(errors[1].field, "address.zip");

        let ok = validator()
            .validate(&def, parsed(json!({"address": {"city": "Recife", "country": "BR"}})))
            .unwrap();
        assert_eq!(ok.value("address.country"), Some(json!("BR")));
    }

    #[test]
    fn test_dates() {
        let def = CollectionDefinition::new("blog", RecordKind::Data, "blog/*.json")
            .field(FieldSpec::new("date", FieldType::Date).required());
        let v = validator();
        assert!(v.validate(&def, parsed(json!({"date": "2024-03-01"}))).is_ok());
        assert!(v
            .validate(&def, parsed(json!({"date": "2024-03-01T10:00:00Z"})))
            .is_ok());
        assert!(v.validate(&def, parsed(json!({"date": "March 1st"}))).is_err());
    }

    #[test]
    fn test_round_trip_preserves_source_values() {
        let source = json!({
            "title": {"en": "Site", "pt": "Sítio"},
            "weight": 2.5,
            "tech": ["vue", "nuxt"],
            "url": "https://x.dev",
            "extra": {"nested": [1, 2]}
        });
        let record = validator().validate(&project(), parsed(source.clone())).unwrap();
        assert_eq!(Value::Object(record.fields_json()), source);
    }

    #[test]
    fn test_predicates_from_config() {
        let def = CollectionDefinition::new("blog", RecordKind::Data, "blog/*.json").field(
            FieldSpec::new("tags", FieldType::StringArray)
                .with_predicate(Predicate::OneOf(vec!["vue".into(), "nuxt".into()]))
                .with_predicate(Predicate::NonEmpty),
        );
        let errors = validator()
            .validate(&def, parsed(json!({"tags": []})))
            .unwrap_err();
        assert_eq!(
            reasons(&errors),
            vec![(
                "tags",
                &Reason::PredicateFailed {
                    predicate: "non-empty".into()
                }
            )]
        );
    }

    #[test]
    fn test_custom_predicate() {
        let def = project().field(FieldSpec::new("stars", FieldType::Number).with_predicate(
            Predicate::Custom {
                name: "non-negative",
                check: |v| v.as_f64().is_some_and(|n| n >= 0.0),
            },
        ));

        let record = validator()
            .validate(&def, parsed(json!({"title": "Site", "stars": 4})))
            .unwrap();
        assert_eq!(record.value("stars"), Some(json!(4)));

        let errors = validator()
            .validate(&def, parsed(json!({"title": "Site", "stars": -1})))
            .unwrap_err();
        assert_eq!(
            reasons(&errors),
            vec![(
                "stars",
                &Reason::PredicateFailed {
                    predicate: "non-negative".into()
                }
            )]
        );
    }
}
