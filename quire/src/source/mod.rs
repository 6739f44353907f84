//! Source scanning: resolves collection patterns against the content root.

use crate::pattern::{relative_to, SourcePattern};
use crate::schema::{CollectionDefinition, Locales};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File format, detected from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Markdown,
    Json,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Format> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("md") | Some("markdown") => Some(Format::Markdown),
            Some("json") => Some(Format::Json),
            Some("yaml") | Some("yml") => Some(Format::Yaml),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Markdown => "markdown",
            Format::Json => "json",
            Format::Yaml => "yaml",
        })
    }
}

/// A file that failed to be read during a scan. Never aborts sibling files.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{}: {message}", path.display())]
pub struct IoFailure {
    pub collection: String,
    pub path: PathBuf,
    pub message: String,
}

impl IoFailure {
    pub fn new(collection: &str, path: &Path, cause: impl fmt::Display) -> Self {
        IoFailure {
            collection: collection.to_string(),
            path: path.to_path_buf(),
            message: cause.to_string(),
        }
    }
}

/// A matched path with its detected hints, not yet read.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub collection: String,
    pub format: Format,
    pub locale: Option<String>,
    pub slug_hint: String,
}

impl Candidate {
    /// Read the file's bytes and modification time.
    pub fn load(self) -> Result<SourceFile, IoFailure> {
        let failure = |e: std::io::Error| IoFailure::new(&self.collection, &self.relative_path, e);

        let bytes = std::fs::read(&self.path).map_err(failure)?;
        let modified_at = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .map_err(failure)?;

        Ok(SourceFile {
            path: self.path,
            relative_path: self.relative_path,
            collection: self.collection,
            format: self.format,
            locale: self.locale,
            slug_hint: self.slug_hint,
            bytes,
            modified_at,
        })
    }
}

/// A file read during a scan pass
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the content root.
    pub relative_path: PathBuf,
    pub collection: String,
    pub format: Format,
    pub locale: Option<String>,
    pub slug_hint: String,
    pub bytes: Vec<u8>,
    pub modified_at: DateTime<Utc>,
}

/// Walks the content root for the files of a collection.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    locales: Locales,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, locales: Locales) -> Self {
        Scanner {
            root: root.into(),
            locales,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locales(&self) -> &Locales {
        &self.locales
    }

    /// Lazily scan a collection, reading each matched file. Every call walks the
    /// filesystem afresh.
    pub fn scan<'a>(
        &'a self,
        definition: &'a CollectionDefinition,
    ) -> impl Iterator<Item = Result<SourceFile, IoFailure>> + 'a {
        self.candidates(definition)
            .map(|candidate| candidate.and_then(Candidate::load))
    }

    /// Lazily list the matched paths of a collection without reading them.
    pub fn candidates<'a>(&'a self, definition: &'a CollectionDefinition) -> Candidates<'a> {
        Candidates {
            scanner: self,
            definition,
            next_source: 0,
            current: None,
            seen: HashSet::new(),
        }
    }

    /// Resolve a single path (absolute or root-relative) against a collection.
    /// Returns None when no pattern of the collection matches it.
    pub fn candidate_for(&self, definition: &CollectionDefinition, path: &Path) -> Option<Candidate> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let relative = relative_to(&self.root, &absolute);

        definition
            .sources
            .iter()
            .filter_map(|raw| SourcePattern::parse(raw).ok())
            .find(|pattern| pattern.matches(&relative))
            .and_then(|pattern| self.candidate(definition, &pattern, absolute))
    }

    fn candidate(
        &self,
        definition: &CollectionDefinition,
        pattern: &SourcePattern,
        path: PathBuf,
    ) -> Option<Candidate> {
        let Some(format) = Format::from_path(&path) else {
            log::debug!(
                "Skipping {} in '{}': unsupported extension",
                path.display(),
                definition.name
            );
            return None;
        };

        let relative_path = relative_to(&self.root, &path);
        let locale = self.detect_locale(definition, pattern, &relative_path);
        let slug_hint = pattern.slug_for(&relative_path, locale.as_deref());

        Some(Candidate {
            path,
            relative_path,
            collection: definition.name.clone(),
            format,
            locale,
            slug_hint,
        })
    }

    /// First path segment below the pattern base that names a known locale,
    /// file stem included, else the default locale. Non-localized collections
    /// have no locale.
    fn detect_locale(
        &self,
        definition: &CollectionDefinition,
        pattern: &SourcePattern,
        relative: &Path,
    ) -> Option<String> {
        if !definition.localized {
            return None;
        }

        pattern
            .segments(relative)
            .into_iter()
            .find(|part| self.locales.is_known(part))
            .or_else(|| self.locales.default_locale().map(str::to_string))
    }
}

/// Iterator over the matched paths of one collection; see [`Scanner::candidates`].
pub struct Candidates<'a> {
    scanner: &'a Scanner,
    definition: &'a CollectionDefinition,
    next_source: usize,
    current: Option<(SourcePattern, glob::Paths)>,
    seen: HashSet<PathBuf>,
}

impl Iterator for Candidates<'_> {
    type Item = Result<Candidate, IoFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some((pattern, paths)) = self.current.as_mut() else {
                let raw = self.definition.sources.get(self.next_source)?;
                self.next_source += 1;
                match open_pattern(&self.scanner.root, raw) {
                    Ok(opened) => self.current = Some(opened),
                    Err(message) => {
                        return Some(Err(IoFailure::new(
                            &self.definition.name,
                            Path::new(raw),
                            message,
                        )))
                    }
                }
                continue;
            };

            match paths.next() {
                Some(Ok(path)) => {
                    if path.is_dir() || !self.seen.insert(path.clone()) {
                        continue;
                    }
                    if let Some(candidate) = self.scanner.candidate(self.definition, pattern, path) {
                        return Some(Ok(candidate));
                    }
                }
                Some(Err(e)) => {
                    return Some(Err(IoFailure::new(
                        &self.definition.name,
                        e.path(),
                        e.error(),
                    )))
                }
                None => self.current = None,
            }
        }
    }
}

fn open_pattern(root: &Path, raw: &str) -> Result<(SourcePattern, glob::Paths), String> {
    let pattern = SourcePattern::parse(raw).map_err(|e| e.to_string())?;
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let paths = glob::glob_with(&pattern.absolute(root), options).map_err(|e| e.to_string())?;
    Ok((pattern, paths))
}
