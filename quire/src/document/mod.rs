// Parser adapters - markdown with YAML front matter, JSON and YAML data files

mod frontmatter;
mod render;

pub use frontmatter::{split_front_matter, Split};
pub use render::{CommonMarkRenderer, Heading, RenderError, Rendered, RenderedDocument, Renderer};

use crate::schema::{CollectionDefinition, RecordKind};
use crate::source::{Format, SourceFile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Rendered body of a page record
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub document: RenderedDocument,
    pub headings: Vec<Heading>,
}

/// A source file turned into candidate field values, not yet validated
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub collection: String,
    pub relative_path: PathBuf,
    pub locale: Option<String>,
    pub slug_hint: String,
    pub fields: Map<String, Value>,
    pub body: Option<Body>,
    pub modified_at: DateTime<Utc>,
}

/// Malformed source syntax. The file is left out of this pass only.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{}: {cause}", path.display())]
pub struct ParseError {
    pub collection: String,
    pub path: PathBuf,
    pub cause: String,
}

impl ParseError {
    fn new(file: &SourceFile, cause: impl fmt::Display) -> Self {
        ParseError {
            collection: file.collection.clone(),
            path: file.relative_path.clone(),
            cause: cause.to_string(),
        }
    }
}

/// Dispatches source files to the adapter for their format.
#[derive(Clone)]
pub struct Parsers {
    renderer: Arc<dyn Renderer>,
}

impl Default for Parsers {
    fn default() -> Self {
        Parsers::new(Arc::new(CommonMarkRenderer::default()))
    }
}

impl fmt::Debug for Parsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parsers").finish_non_exhaustive()
    }
}

impl Parsers {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Parsers { renderer }
    }

    pub fn parse(
        &self,
        definition: &CollectionDefinition,
        file: SourceFile,
    ) -> Result<ParsedRecord, ParseError> {
        match file.format {
            Format::Markdown => parse_markdown(definition, file, self.renderer.as_ref()),
            Format::Json | Format::Yaml => parse_data(file),
        }
    }
}

/// Markdown adapter: front matter becomes candidate fields; for page collections
/// the body goes through the renderer.
pub fn parse_markdown(
    definition: &CollectionDefinition,
    file: SourceFile,
    renderer: &dyn Renderer,
) -> Result<ParsedRecord, ParseError> {
    let text = std::str::from_utf8(&file.bytes).map_err(|e| ParseError::new(&file, e))?;

    let (fields, body_text) = match split_front_matter(text) {
        Split::Body(body) => (Map::new(), body),
        Split::Block(front, body) => (parse_front_matter(&file, front)?, body),
        Split::Unterminated => {
            return Err(ParseError::new(&file, "front matter block is not closed"));
        }
    };

    let body = match definition.kind {
        RecordKind::Page => {
            let rendered = renderer
                .render(body_text)
                .map_err(|e| ParseError::new(&file, format!("render failed: {e}")))?;
            Some(Body {
                document: rendered.document,
                headings: rendered.headings,
            })
        }
        RecordKind::Data => None,
    };

    Ok(into_parsed(file, fields, body))
}

/// Data adapter: the whole file is one object whose keys are candidate fields.
pub fn parse_data(file: SourceFile) -> Result<ParsedRecord, ParseError> {
    let value: Value = match file.format {
        Format::Json => serde_json::from_slice(&file.bytes).map_err(|e| ParseError::new(&file, e))?,
        _ => serde_yaml::from_slice(&file.bytes).map_err(|e| ParseError::new(&file, e))?,
    };

    match value {
        Value::Object(fields) => Ok(into_parsed(file, fields, None)),
        other => Err(ParseError::new(
            &file,
            format!("expected an object at the top level, found {}", json_type_name(&other)),
        )),
    }
}

fn parse_front_matter(file: &SourceFile, front: &str) -> Result<Map<String, Value>, ParseError> {
    if front.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_yaml::from_str::<Value>(front).map_err(|e| ParseError::new(file, e))? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ParseError::new(
            file,
            format!("front matter must be a mapping, found {}", json_type_name(&other)),
        )),
    }
}

fn into_parsed(file: SourceFile, fields: Map<String, Value>, body: Option<Body>) -> ParsedRecord {
    ParsedRecord {
        collection: file.collection,
        relative_path: file.relative_path,
        locale: file.locale,
        slug_hint: file.slug_hint,
        fields,
        body,
        modified_at: file.modified_at,
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn source(rel: &str, format: Format, body: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/content").join(rel),
            relative_path: PathBuf::from(rel),
            collection: "test".into(),
            format,
            locale: Some("pt".into()),
            slug_hint: "hello".into(),
            bytes: body.as_bytes().to_vec(),
            modified_at: Utc::now(),
        }
    }

    fn page() -> CollectionDefinition {
        CollectionDefinition::new("test", RecordKind::Page, "blog/*/*.md")
    }

    #[test]
    fn test_markdown_front_matter_and_body() {
        let file = source(
            "blog/pt/hello.md",
            Format::Markdown,
            "---\ntitle: Olá\ntags: [vue, nuxt]\ndraft: false\n---\n# Olá\n\n## Detalhes\n",
        );
        let parsed = Parsers::default().parse(&page(), file).unwrap();

        assert_eq!(parsed.fields["title"], json!("Olá"));
        assert_eq!(parsed.fields["tags"], json!(["vue", "nuxt"]));
        assert_eq!(parsed.fields["draft"], json!(false));
        assert_eq!(parsed.locale.as_deref(), Some("pt"));

        let body = parsed.body.unwrap();
        assert_eq!(body.headings.len(), 2);
        assert_eq!(body.headings[1].slug, "detalhes");
        assert!(body.document.html().contains("<h2>Detalhes</h2>"));
    }

    #[test]
    fn test_markdown_without_front_matter() {
        let file = source("pages/pt/about.md", Format::Markdown, "# About\n");
        let parsed = Parsers::default().parse(&page(), file).unwrap();
        assert!(parsed.fields.is_empty());
        assert!(parsed.body.is_some());
    }

    #[test]
    fn test_data_collection_drops_markdown_body() {
        let def = CollectionDefinition::new("test", RecordKind::Data, "notes/*.md");
        let file = source("notes/a.md", Format::Markdown, "---\ntitle: A\n---\nignored");
        let parsed = Parsers::default().parse(&def, file).unwrap();
        assert_eq!(parsed.fields["title"], json!("A"));
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_malformed_front_matter() {
        let file = source("blog/pt/bad.md", Format::Markdown, "---\ntitle: [unclosed\n---\n");
        let err = Parsers::default().parse(&page(), file).unwrap_err();
        assert_eq!(err.path, PathBuf::from("blog/pt/bad.md"));
        assert_eq!(err.collection, "test");
    }

    #[test]
    fn test_front_matter_must_be_mapping() {
        let file = source("blog/pt/list.md", Format::Markdown, "---\n- a\n- b\n---\n");
        let err = Parsers::default().parse(&page(), file).unwrap_err();
        assert!(err.cause.contains("mapping"), "{}", err.cause);
    }

    #[test]
    fn test_unterminated_front_matter() {
        let file = source("blog/pt/open.md", Format::Markdown, "---\ntitle: x\n");
        assert!(Parsers::default().parse(&page(), file).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut file = source("blog/pt/bin.md", Format::Markdown, "");
        file.bytes = vec![0xff, 0xfe, 0x00];
        assert!(Parsers::default().parse(&page(), file).is_err());
    }

    #[test]
    fn test_json_data_keys_become_fields() {
        let file = source(
            "projects/site.json",
            Format::Json,
            r#"{"title": {"en": "Site", "pt": "Sítio"}, "weight": 2, "tech": ["nuxt"]}"#,
        );
        let parsed = parse_data(file).unwrap();
        assert_eq!(parsed.fields.len(), 3);
        assert_eq!(parsed.fields["weight"], json!(2));
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_yaml_data() {
        let file = source("authors/ana.yaml", Format::Yaml, "name: Ana\nlinks:\n  - https://a.dev\n");
        let parsed = parse_data(file).unwrap();
        assert_eq!(parsed.fields["links"], json!(["https://a.dev"]));
    }

    #[test]
    fn test_malformed_json() {
        let file = source("projects/broken.json", Format::Json, r#"{"title": "#);
        let err = parse_data(file).unwrap_err();
        assert_eq!(err.path, PathBuf::from("projects/broken.json"));
    }

    #[test]
    fn test_json_top_level_must_be_object() {
        let file = source("projects/list.json", Format::Json, "[1, 2]");
        let err = parse_data(file).unwrap_err();
        assert!(err.cause.contains("array"), "{}", err.cause);
    }
}
