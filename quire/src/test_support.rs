//! A small bilingual site used across the crate's tests.

use crate::document::Parsers;
use crate::error::Result;
use crate::index::{CancelToken, ContentIndex, Indexer};
use crate::report::{BuildReport, Strictness};
use crate::schema::{parse_config_str, SchemaRegistry};
use crate::source::Scanner;
use crate::validation::Validator;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub(crate) const CONFIG: &str = r#"
root: content
default_locale: pt
locales: [pt, en]

collections:
  blog:
    kind: page
    source: "blog/*/*.md"
    localized: true
    fields:
      title: { type: string, required: true }
      date: { type: date, required: true }
      tags: { type: string-array, default: [] }
      draft: { type: boolean, default: false }
      description: { type: string }

  project:
    kind: data
    source: "projects/*.json"
    fields:
      title: { type: localized-string, required: true }
      slug: { type: string }
      weight: { type: number }
      link: { type: url }
      tech: { type: string-array, default: [] }

  project_page:
    kind: page
    source: "projects/*/*.md"
    localized: true
    fields:
      title: { type: string, required: true }
      description: { type: string }
"#;

const FILES: &[(&str, &str)] = &[
    (
        "blog/pt/ola-mundo.md",
        "---\ntitle: Olá mundo\ndate: 2024-01-10\ntags: [rust, nuxt]\n---\n# Olá\n\n## Primeiro passo\n",
    ),
    (
        "blog/en/ola-mundo.md",
        "---\ntitle: Hello world\ndate: 2024-01-10\ntags: [rust]\n---\n# Hello\n",
    ),
    (
        "blog/pt/segundo.md",
        "---\ntitle: Segundo post\ndate: 2024-02-01\ndraft: true\n---\nSó em português.\n",
    ),
    (
        "projects/portfolio.json",
        r#"{"title": {"pt": "Portfólio", "en": "Portfolio"}, "slug": "portfolio", "weight": 1, "link": "https://example.dev", "tech": ["nuxt", "vue"]}"#,
    ),
    (
        "projects/cli.json",
        r#"{"title": "quire", "weight": 2, "tech": ["rust"]}"#,
    ),
    (
        "projects/site.json",
        r#"{"title": {"pt": "Sítio", "en": "Site"}, "weight": 3}"#,
    ),
    (
        "projects/pt/portfolio.md",
        "---\ntitle: Portfólio\ndescription: Meu site\n---\nFeito com Nuxt.\n",
    ),
    (
        "projects/en/portfolio.md",
        "---\ntitle: Portfolio\n---\nBuilt with Nuxt.\n",
    ),
];

pub(crate) fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// The fixture site on disk plus every component wired by hand.
pub(crate) struct Site {
    pub dir: TempDir,
    pub registry: SchemaRegistry,
    pub scanner: Scanner,
    pub parsers: Parsers,
    pub validator: Validator,
    pub strictness: Strictness,
    pub index: ContentIndex,
}

impl Site {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("content.yaml"), CONFIG).unwrap();
        for (rel, body) in FILES {
            write(&dir.path().join("content"), rel, body);
        }

        let config = parse_config_str(CONFIG).unwrap();
        let registry = SchemaRegistry::from_definitions(config.collections).unwrap();
        Site {
            scanner: Scanner::new(dir.path().join("content"), config.locales.clone()),
            validator: Validator::new(config.locales),
            parsers: Parsers::default(),
            strictness: config.strictness,
            registry,
            index: ContentIndex::new(),
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("content.yaml")
    }

    pub fn indexer(&self) -> Indexer<'_> {
        Indexer::new(
            &self.registry,
            &self.scanner,
            &self.parsers,
            &self.validator,
            self.strictness,
        )
    }

    pub fn rebuild(&self) -> Result<BuildReport> {
        self.indexer().rebuild_all(&self.index, &CancelToken::new())
    }
}
