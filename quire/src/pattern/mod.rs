// Source patterns - glob matching, base directories, path-derived slugs

use crate::error::{QuireError, Result};
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path, PathBuf};

const GLOB_META: &[char] = &['*', '?', '['];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A collection source pattern, relative to the content root.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    raw: String,
    pattern: Pattern,
    base: PathBuf,
}

impl SourcePattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |message: String| QuireError::Pattern {
            pattern: raw.to_string(),
            message,
        };

        let as_path = Path::new(raw);
        if as_path.is_absolute() || raw.starts_with('/') {
            return Err(invalid("pattern must be relative to the content root".into()));
        }
        if as_path.components().any(|c| c == Component::ParentDir) {
            return Err(invalid("pattern must not leave the content root".into()));
        }

        let pattern = Pattern::new(raw).map_err(|e| invalid(e.to_string()))?;

        // Literal directories ahead of the first wildcard; the file segment never counts.
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        let dirs = segments.len().saturating_sub(1);
        let base: PathBuf = segments[..dirs]
            .iter()
            .take_while(|s| !s.contains(GLOB_META))
            .collect();

        Ok(SourcePattern {
            raw: raw.to_string(),
            pattern,
            base,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Directory (relative to the root) that every match lives under.
    pub fn base_directory(&self) -> &Path {
        &self.base
    }

    /// Whether a root-relative path matches this pattern.
    pub fn matches(&self, relative: &Path) -> bool {
        self.pattern.matches_path_with(relative, MATCH_OPTIONS)
    }

    /// Absolute glob expression for walking the filesystem under `root`.
    pub fn absolute(&self, root: &Path) -> String {
        let root = root.to_string_lossy();
        let root = root.trim_end_matches(&['/', '\\'][..]);
        format!("{}/{}", Pattern::escape(root), self.raw)
    }

    /// Path segments of a match below the base directory, extension stripped
    /// from the last one. Locale detection and slugs both read these.
    pub fn segments(&self, relative: &Path) -> Vec<String> {
        let inner = relative.strip_prefix(&self.base).unwrap_or(relative);
        inner
            .with_extension("")
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Derive the slug for a matched path: the segments below the base
    /// directory with the locale segment dropped, each one slugified.
    pub fn slug_for(&self, relative: &Path, locale: Option<&str>) -> String {
        let mut locale = locale;
        let mut segments: Vec<String> = Vec::new();
        for part in self.segments(relative) {
            if locale == Some(part.as_str()) {
                locale = None;
                continue;
            }
            segments.push(slugify(&part));
        }

        if segments.len() > 1 && segments.last().map(String::as_str) == Some("index") {
            segments.pop();
        }
        segments.retain(|s| !s.is_empty());
        segments.join("/")
    }
}

/// Slugify a string for use in URLs and heading anchors
pub fn slugify(input: &str) -> String {
    slug::slugify(input)
}

/// Root-relative form of `path`, with `/` separators.
pub fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
