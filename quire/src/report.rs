//! Build report: everything a rebuild left out, grouped by collection.

use crate::document::ParseError;
use crate::source::IoFailure;
use crate::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Whether any issue aborts a rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Any excluded file fails the rebuild; the previous snapshot keeps serving.
    Strict,
    /// Offending files are excluded and reported; the rest is indexed.
    #[default]
    Lenient,
}

/// One excluded file or record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    Io(IoFailure),
    Parse(ParseError),
    Validation(ValidationError),
}

impl Issue {
    pub fn collection(&self) -> &str {
        match self {
            Issue::Io(e) => &e.collection,
            Issue::Parse(e) => &e.collection,
            Issue::Validation(e) => &e.collection,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Issue::Io(e) => &e.path,
            Issue::Parse(e) => &e.path,
            Issue::Validation(e) => &e.path,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::Io(e) => write!(f, "[io] {e}"),
            Issue::Parse(e) => write!(f, "[parse] {e}"),
            Issue::Validation(e) => write!(f, "[validation] {e}"),
        }
    }
}

impl From<IoFailure> for Issue {
    fn from(e: IoFailure) -> Self {
        Issue::Io(e)
    }
}

impl From<ParseError> for Issue {
    fn from(e: ParseError) -> Self {
        Issue::Parse(e)
    }
}

impl From<ValidationError> for Issue {
    fn from(e: ValidationError) -> Self {
        Issue::Validation(e)
    }
}

/// Per-collection section of a report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionReport {
    pub indexed: usize,
    pub issues: Vec<Issue>,
}

/// Outcome of a rebuild pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub collections: BTreeMap<String, CollectionReport>,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a collection shows up even when it produced nothing.
    pub fn touch(&mut self, collection: &str) -> &mut CollectionReport {
        self.collections.entry(collection.to_string()).or_default()
    }

    pub fn push(&mut self, issue: impl Into<Issue>) {
        let issue = issue.into();
        self.touch(issue.collection()).issues.push(issue);
    }

    pub fn set_indexed(&mut self, collection: &str, count: usize) {
        self.touch(collection).indexed = count;
    }

    pub fn indexed(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.indexed)
    }

    pub fn total_indexed(&self) -> usize {
        self.collections.values().map(|c| c.indexed).sum()
    }

    pub fn issue_count(&self) -> usize {
        self.collections.values().map(|c| c.issues.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.issue_count() == 0
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.collections.values().flat_map(|c| c.issues.iter())
    }

    pub fn issues_for(&self, collection: &str) -> &[Issue] {
        self.collections
            .get(collection)
            .map(|c| c.issues.as_slice())
            .unwrap_or_default()
    }

    /// Fold in a later pass that re-read `paths` (root-relative). Earlier
    /// issues for those paths are dropped and the later counts win.
    pub fn merge(&mut self, later: BuildReport, paths: &[PathBuf]) {
        for section in self.collections.values_mut() {
            section.issues.retain(|issue| !paths.iter().any(|p| p == issue.path()));
        }
        for (name, section) in later.collections {
            let target = self.touch(&name);
            target.indexed = section.indexed;
            target.issues.extend(section.issues);
        }
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, section) in &self.collections {
            write!(f, "{name}: {} indexed", section.indexed)?;
            if !section.issues.is_empty() {
                write!(f, ", {} excluded", section.issues.len())?;
            }
            writeln!(f)?;
            for issue in &section.issues {
                writeln!(f, "  {issue}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Reason;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};

    fn report() -> BuildReport {
        let mut report = BuildReport::new();
        report.set_indexed("blog", 3);
        report.set_indexed("project", 2);
        report.push(ParseError {
            collection: "blog".into(),
            path: PathBuf::from("blog/pt/bad.md"),
            cause: "front matter block is not closed".into(),
        });
        report.push(ValidationError {
            collection: "project".into(),
            path: PathBuf::from("projects/x.json"),
            slug: Some("x".into()),
            field: "link".into(),
            reason: Reason::PredicateFailed {
                predicate: "url".into(),
            },
        });
        report
    }

    #[test]
    fn test_counts() {
        let report = report();
        assert_eq!(report.issue_count(), 2);
        assert_eq!(report.total_indexed(), 5);
        assert_eq!(report.indexed("blog"), 3);
        assert_eq!(report.issues_for("blog").len(), 1);
        assert!(report.issues_for("pages").is_empty());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_display_lists_paths_and_reasons() {
        let text = report().to_string();
        assert_eq!(
            text,
            "blog: 3 indexed, 1 excluded\n  [parse] blog/pt/bad.md: front matter block is not closed\n\
             project: 2 indexed, 1 excluded\n  [validation] projects/x.json: field 'link' failed predicate 'url'\n"
        );
    }

    #[test]
    fn test_serializes_for_cli_output() {
        let value = serde_json::to_value(report()).unwrap();
        let issue = &value["collections"]["project"]["issues"][0];
        assert_eq!(issue["kind"], "validation");
        assert_eq!(issue["reason"], "predicate-failed");
        assert_eq!(issue["predicate"], "url");
        assert_eq!(issue["path"], "projects/x.json");
    }

    #[test]
    fn test_merge_replaces_issues_of_reread_paths() {
        let mut report = report();
        let mut later = BuildReport::new();
        later.set_indexed("blog", 4);
        later.push(IoFailure::new("blog", Path::new("blog/en/gone.md"), "not found"));

        report.merge(later, &[PathBuf::from("blog/pt/bad.md")]);
        assert_eq!(report.indexed("blog"), 4);
        assert_eq!(report.indexed("project"), 2);
        let paths: Vec<_> = report.issues().map(Issue::path).collect();
        assert_eq!(
            paths,
            vec![Path::new("blog/en/gone.md"), Path::new("projects/x.json")]
        );
    }

    #[test]
    fn test_strictness_from_config() {
        let s: Strictness = serde_yaml::from_str("strict").unwrap();
        assert_eq!(s, Strictness::Strict);
        assert_eq!(Strictness::default(), Strictness::Lenient);
    }
}
