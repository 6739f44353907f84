use super::{CollectionRecords, ContentIndex, Snapshot};
use crate::document::Parsers;
use crate::error::{QuireError, Result};
use crate::pattern::relative_to;
use crate::record::Record;
use crate::report::{BuildReport, Issue, Strictness};
use crate::schema::{CollectionDefinition, SchemaRegistry};
use crate::source::{Candidate, Scanner};
use crate::validation::Validator;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for a rebuild. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Outcome = std::result::Result<Record, Vec<Issue>>;

/// Runs scanner → parsers → validator and commits the result into an index.
pub struct Indexer<'a> {
    registry: &'a SchemaRegistry,
    scanner: &'a Scanner,
    parsers: &'a Parsers,
    validator: &'a Validator,
    strictness: Strictness,
}

impl<'a> Indexer<'a> {
    pub fn new(
        registry: &'a SchemaRegistry,
        scanner: &'a Scanner,
        parsers: &'a Parsers,
        validator: &'a Validator,
        strictness: Strictness,
    ) -> Self {
        Indexer {
            registry,
            scanner,
            parsers,
            validator,
            strictness,
        }
    }

    /// Rebuild every registered collection from disk and swap the result in.
    ///
    /// The previous snapshot keeps serving unless the whole pass succeeds. A
    /// newer rebuild or a cancelled token turns the result into `Cancelled`.
    pub fn rebuild_all(&self, index: &ContentIndex, cancel: &CancelToken) -> Result<BuildReport> {
        let ticket = index.begin();
        let built = self.build(index, ticket, cancel);
        self.finish(index, ticket, cancel, built)
    }

    /// Scan, parse and validate every collection into a detached snapshot.
    pub(crate) fn build(
        &self,
        index: &ContentIndex,
        ticket: u64,
        cancel: &CancelToken,
    ) -> Result<(Snapshot, BuildReport)> {
        let live = || !cancel.is_cancelled() && index.is_current(ticket);

        let mut snapshot = Snapshot::default();
        let mut report = BuildReport::new();

        for definition in self.registry.iter() {
            if !live() {
                return Err(QuireError::Cancelled);
            }
            report.touch(&definition.name);

            let mut candidates = Vec::new();
            for candidate in self.scanner.candidates(definition) {
                match candidate {
                    Ok(candidate) => candidates.push(candidate),
                    Err(failure) => {
                        log::warn!("Excluded {failure}");
                        report.push(failure);
                    }
                }
            }

            let outcomes: Vec<Option<Outcome>> = candidates
                .into_par_iter()
                .map(|candidate| live().then(|| self.process(definition, candidate)))
                .collect();
            if !live() {
                return Err(QuireError::Cancelled);
            }

            let mut records = CollectionRecords::default();
            for outcome in outcomes.into_iter().flatten() {
                match outcome {
                    Ok(record) => place(&mut records, record),
                    Err(issues) => exclude(&mut report, issues),
                }
            }
            report.set_indexed(&definition.name, records.len());
            snapshot.insert_collection(&definition.name, records);
        }

        if let Some(empty) = self
            .registry
            .iter()
            .find(|d| !d.allow_empty && snapshot.count(&d.name) == 0)
        {
            log::warn!("Rebuild failed: collection '{}' has no valid records", empty.name);
            return Err(QuireError::RebuildFailed {
                collection: empty.name.clone(),
                report: Box::new(report),
            });
        }
        if self.strictness == Strictness::Strict && !report.is_clean() {
            return Err(QuireError::StrictBuildFailed(Box::new(report)));
        }
        Ok((snapshot, report))
    }

    /// Commit a finished build, then replay the incremental changes that
    /// landed while it was running.
    pub(crate) fn finish(
        &self,
        index: &ContentIndex,
        ticket: u64,
        cancel: &CancelToken,
        built: Result<(Snapshot, BuildReport)>,
    ) -> Result<BuildReport> {
        let (snapshot, mut report) = match built {
            Ok(built) => built,
            Err(e) => {
                index.abandon(ticket);
                return Err(e);
            }
        };

        let deferred = index.commit(ticket, cancel, snapshot)?;
        log::info!(
            "Indexed {} record(s) across {} collection(s), {} excluded",
            report.total_indexed(),
            self.registry.len(),
            report.issue_count()
        );

        if !deferred.is_empty() {
            log::debug!("Replaying {} change(s) made during the rebuild", deferred.len());
            let replayed = self.apply_changes(index, &deferred, &CancelToken::new())?;
            let root = self.scanner.root();
            let relative: Vec<PathBuf> = deferred.iter().map(|p| relative_to(root, p)).collect();
            report.merge(replayed, &relative);
        }
        Ok(report)
    }

    /// Incremental rebuild for a set of changed paths (absolute or relative to
    /// the content root). Records sourced from those paths are dropped; paths
    /// that still exist are re-read and placed. Issues are reported, never
    /// fatal. A full rebuild running meanwhile is not superseded; it replays
    /// these paths once it commits.
    pub fn apply_changes(
        &self,
        index: &ContentIndex,
        paths: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<BuildReport> {
        let base = index.snapshot();
        let root = self.scanner.root();

        let relative: Vec<PathBuf> = paths.iter().map(|p| relative_to(root, p)).collect();
        let mut report = BuildReport::new();
        let mut removals: Vec<(&str, &Path)> = Vec::new();
        let mut work: Vec<(&CollectionDefinition, Candidate)> = Vec::new();

        for definition in self.registry.iter() {
            for path in &relative {
                let indexed = base
                    .collection(&definition.name)
                    .is_some_and(|c| c.contains_path(path));
                if indexed {
                    removals.push((definition.name.as_str(), path.as_path()));
                }
                if !root.join(path).is_file() {
                    continue;
                }
                if let Some(candidate) = self.scanner.candidate_for(definition, path) {
                    work.push((definition.as_ref(), candidate));
                }
            }
        }
        drop(base);

        let mut touched: Vec<&str> = removals.iter().map(|&(name, _)| name).collect();
        touched.extend(work.iter().map(|&(definition, _)| definition.name.as_str()));
        touched.sort_unstable();
        touched.dedup();

        let outcomes: Vec<Option<Outcome>> = work
            .into_par_iter()
            .map(|(definition, candidate)| {
                (!cancel.is_cancelled()).then(|| self.process(definition, candidate))
            })
            .collect();

        let mut placements = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(record) => placements.push(record),
                Err(issues) => exclude(&mut report, issues),
            }
        }

        let (removed, updated) = (removals.len(), placements.len());
        index.apply(cancel, paths, &touched, |snapshot| {
            for (collection, path) in removals {
                snapshot.collection_mut(collection).remove_path(path);
            }
            for record in placements {
                let records = snapshot.collection_mut(&record.collection.clone());
                place(records, record);
            }
        })?;

        let current = index.snapshot();
        for definition in self.registry.iter() {
            report.set_indexed(&definition.name, current.count(&definition.name));
        }
        log::info!(
            "Applied {} change(s): {removed} record(s) dropped, {updated} re-indexed, {} excluded",
            paths.len(),
            report.issue_count()
        );
        Ok(report)
    }

    fn process(&self, definition: &CollectionDefinition, candidate: Candidate) -> Outcome {
        let file = candidate.load().map_err(|e| vec![Issue::from(e)])?;
        log::debug!("Parsing {}", file.relative_path.display());
        let parsed = self
            .parsers
            .parse(definition, file)
            .map_err(|e| vec![Issue::from(e)])?;
        self.validator
            .validate(definition, parsed)
            .map_err(|errors| errors.into_iter().map(Issue::from).collect())
    }
}

/// The greater path wins a key collision; within one pattern that is the
/// later file in scan order.
fn place(records: &mut CollectionRecords, record: Record) {
    let Some(dropped) = records.place(Arc::new(record)) else {
        return;
    };
    if let Some(kept) = records.get(dropped.locale.as_deref(), &dropped.slug) {
        log::warn!(
            "Duplicate key {}/{} ({}): {} replaces {}",
            kept.collection,
            kept.slug,
            kept.locale.as_deref().unwrap_or("-"),
            kept.path.display(),
            dropped.path.display()
        );
    }
}

fn exclude(report: &mut BuildReport, issues: Vec<Issue>) {
    for issue in issues {
        log::warn!("Excluded {issue}");
        report.push(issue);
    }
}
