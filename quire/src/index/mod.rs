//! In-memory collection index.
//!
//! Readers take an `Arc<Snapshot>` and keep it for as long as they like; writers
//! build or copy-on-write a new snapshot and swap the pointer.

mod rebuild;

pub use rebuild::{CancelToken, Indexer};

use crate::error::{QuireError, Result};
use crate::record::Record;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// (locale, slug): unique within a collection.
pub type RecordKey = (Option<String>, String);

/// Listing order: weight ascending with unweighted records last, then slug,
/// then locale.
#[derive(Debug, Clone)]
pub struct SortKey {
    weight: Option<f64>,
    slug: String,
    locale: Option<String>,
}

impl SortKey {
    pub fn of(record: &Record) -> Self {
        SortKey {
            weight: record.weight(),
            slug: record.slug.clone(),
            locale: record.locale.clone(),
        }
    }

    fn key(&self) -> RecordKey {
        (self.locale.clone(), self.slug.clone())
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_weight = match (self.weight, other.weight) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_weight
            .then_with(|| self.slug.cmp(&other.slug))
            .then_with(|| self.locale.cmp(&other.locale))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

/// The records of one collection with their ordering and source-path maps.
///
/// When two files produce the same key, the one with the greater root-relative
/// path is listed and the other is kept aside as a shadow, ready to take the
/// key back if the winner goes away.
#[derive(Debug, Clone, Default)]
pub struct CollectionRecords {
    records: HashMap<RecordKey, Arc<Record>>,
    order: BTreeSet<SortKey>,
    by_path: HashMap<PathBuf, RecordKey>,
    shadowed: HashMap<RecordKey, BTreeMap<PathBuf, Arc<Record>>>,
    shadow_paths: HashMap<PathBuf, RecordKey>,
}

impl CollectionRecords {
    /// Insert or replace by key. Returns the records that were displaced: the
    /// previous holder of the key and, when the source file used to produce a
    /// different key, that stale record.
    pub fn upsert(&mut self, record: Arc<Record>) -> Vec<Arc<Record>> {
        let key: RecordKey = (record.locale.clone(), record.slug.clone());
        let mut displaced = Vec::new();

        if self.by_path.get(&record.path).is_some_and(|stale| *stale != key) {
            displaced.extend(self.remove_path(&record.path));
        }
        self.unshadow(&record.path);
        if let Some(previous) = self.take(&key) {
            displaced.push(previous);
        }

        self.insert(record);
        displaced
    }

    /// Insert a record read from its source file, settling key collisions
    /// between files: the greater path wins. Returns the record that lost, if
    /// any.
    pub fn place(&mut self, record: Arc<Record>) -> Option<Arc<Record>> {
        self.remove_path(&record.path);
        let key: RecordKey = (record.locale.clone(), record.slug.clone());

        match self.records.get(&key) {
            Some(holder) if holder.path > record.path => {
                self.shadow(key, Arc::clone(&record));
                Some(record)
            }
            Some(_) => {
                let previous = self.take(&key)?;
                self.shadow(key, Arc::clone(&previous));
                self.insert(record);
                Some(previous)
            }
            None => {
                self.insert(record);
                None
            }
        }
    }

    /// Remove a key along with any shadowed records for it.
    pub fn remove(&mut self, key: &RecordKey) -> Option<Arc<Record>> {
        if let Some(shadows) = self.shadowed.remove(key) {
            for path in shadows.keys() {
                self.shadow_paths.remove(path);
            }
        }
        self.take(key)
    }

    /// Drop whatever `path` contributed. A shadowed record takes the key back
    /// when the listed one goes.
    pub fn remove_path(&mut self, path: &Path) -> Option<Arc<Record>> {
        let Some(key) = self.by_path.get(path).cloned() else {
            return self.unshadow(path);
        };
        let removed = self.take(&key);
        self.promote(&key);
        removed
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(path) || self.shadow_paths.contains_key(path)
    }

    pub fn get(&self, locale: Option<&str>, slug: &str) -> Option<&Arc<Record>> {
        self.records
            .get(&(locale.map(str::to_string), slug.to_string()))
    }

    pub fn by_path(&self, path: &Path) -> Option<&Arc<Record>> {
        self.by_path.get(path).and_then(|key| self.records.get(key))
    }

    /// Every record in listing order, all locales interleaved.
    pub fn ordered(&self) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.order
            .iter()
            .filter_map(|sort| self.records.get(&sort.key()))
    }

    /// Records of exactly `locale` in listing order.
    pub fn ordered_in<'a>(
        &'a self,
        locale: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Arc<Record>> + 'a {
        self.ordered()
            .filter(move |r| r.locale.as_deref() == locale)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: Arc<Record>) {
        let key: RecordKey = (record.locale.clone(), record.slug.clone());
        self.order.insert(SortKey::of(&record));
        self.by_path.insert(record.path.clone(), key.clone());
        self.records.insert(key, record);
    }

    fn take(&mut self, key: &RecordKey) -> Option<Arc<Record>> {
        let record = self.records.remove(key)?;
        self.order.remove(&SortKey::of(&record));
        if self.by_path.get(&record.path) == Some(key) {
            self.by_path.remove(&record.path);
        }
        Some(record)
    }

    fn shadow(&mut self, key: RecordKey, record: Arc<Record>) {
        self.shadow_paths.insert(record.path.clone(), key.clone());
        self.shadowed
            .entry(key)
            .or_default()
            .insert(record.path.clone(), record);
    }

    fn unshadow(&mut self, path: &Path) -> Option<Arc<Record>> {
        let key = self.shadow_paths.remove(path)?;
        let shadows = self.shadowed.get_mut(&key)?;
        let record = shadows.remove(path);
        if shadows.is_empty() {
            self.shadowed.remove(&key);
        }
        record
    }

    fn promote(&mut self, key: &RecordKey) {
        let Some(shadows) = self.shadowed.get_mut(key) else {
            return;
        };
        let next = shadows.pop_last();
        if shadows.is_empty() {
            self.shadowed.remove(key);
        }
        if let Some((path, record)) = next {
            self.shadow_paths.remove(&path);
            self.insert(record);
        }
    }
}

/// An immutable view of every indexed collection.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    collections: HashMap<String, Arc<CollectionRecords>>,
    built_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn collection(&self, name: &str) -> Option<&CollectionRecords> {
        self.collections.get(name).map(Arc::as_ref)
    }

    pub fn get(&self, collection: &str, locale: Option<&str>, slug: &str) -> Option<&Arc<Record>> {
        self.collection(collection)?.get(locale, slug)
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collection(collection).map_or(0, CollectionRecords::len)
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// When this snapshot was last committed, if ever.
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub(crate) fn insert_collection(&mut self, name: &str, records: CollectionRecords) {
        self.collections.insert(name.to_string(), Arc::new(records));
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> &mut CollectionRecords {
        Arc::make_mut(self.collections.entry(name.to_string()).or_default())
    }

    pub fn upsert(&mut self, record: Arc<Record>) -> Vec<Arc<Record>> {
        self.collection_mut(&record.collection.clone()).upsert(record)
    }

    pub fn remove(&mut self, collection: &str, locale: Option<&str>, slug: &str) -> Option<Arc<Record>> {
        let records = self.collections.get_mut(collection)?;
        let key = (locale.map(str::to_string), slug.to_string());
        if !records.records.contains_key(&key) {
            return None;
        }
        Arc::make_mut(records).remove(&key)
    }

    /// True when no other snapshot shares the collection's records, so it can
    /// change without a copy.
    fn owns(&mut self, collection: &str) -> bool {
        self.collections
            .get_mut(collection)
            .map_or(true, |records| Arc::get_mut(records).is_some())
    }
}

/// Writer-side state: which full rebuild is running and the paths changed
/// incrementally since it started.
#[derive(Debug, Default)]
struct Writer {
    building: Option<u64>,
    deferred: Vec<PathBuf>,
}

/// The live index: a single swappable snapshot plus the rebuild generation.
///
/// The `RwLock` is only held to hand out or replace the snapshot pointer, or
/// to change records no reader can see. Copies of shared records are made
/// with the lock released.
#[derive(Debug, Default)]
pub struct ContentIndex {
    current: RwLock<Arc<Snapshot>>,
    generation: AtomicU64,
    writer: Mutex<Writer>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot currently being served. Never blocks on a rebuild.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Insert or replace a record. Returns the records it displaced.
    pub fn upsert(&self, record: Record) -> Vec<Arc<Record>> {
        let _writer = self.lock_writer();
        let collection = record.collection.clone();
        self.modify(&[collection.as_str()], |snapshot| {
            snapshot.upsert(Arc::new(record))
        })
    }

    /// Remove a record by key. No-op when absent.
    pub fn remove(&self, collection: &str, locale: Option<&str>, slug: &str) -> Option<Arc<Record>> {
        let _writer = self.lock_writer();
        self.snapshot().get(collection, locale, slug)?;
        self.modify(&[collection], |snapshot| {
            snapshot.remove(collection, locale, slug)
        })
    }

    /// Records of `collection` whose locale is exactly `locale`, in listing order.
    pub fn list_by_collection(&self, collection: &str, locale: Option<&str>) -> Vec<Arc<Record>> {
        let snapshot = self.snapshot();
        snapshot
            .collection(collection)
            .map(|c| c.ordered_in(locale).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Issue a new full-rebuild ticket; every older ticket is superseded.
    pub(crate) fn begin(&self) -> u64 {
        let mut writer = self.lock_writer();
        let ticket = self.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        writer.building = Some(ticket);
        ticket
    }

    pub(crate) fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(AtomicOrdering::SeqCst) == ticket
    }

    /// Swap in a freshly built snapshot if the ticket is still live. Returns
    /// the paths changed incrementally while it was being built; the caller
    /// re-applies them on top.
    pub(crate) fn commit(
        &self,
        ticket: u64,
        cancel: &CancelToken,
        mut snapshot: Snapshot,
    ) -> Result<Vec<PathBuf>> {
        let mut writer = self.lock_writer();
        if cancel.is_cancelled() || !self.is_current(ticket) {
            Self::release(&mut writer, ticket);
            return Err(QuireError::Cancelled);
        }
        snapshot.built_at = Some(Utc::now());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        writer.building = None;
        Ok(std::mem::take(&mut writer.deferred))
    }

    /// Give up on a full rebuild that will not commit.
    pub(crate) fn abandon(&self, ticket: u64) {
        Self::release(&mut self.lock_writer(), ticket);
    }

    /// Apply an incremental change set to the current snapshot. Never
    /// supersedes a full rebuild: while one is running, `paths` are recorded
    /// so it can replay them after it commits.
    pub(crate) fn apply<F>(
        &self,
        cancel: &CancelToken,
        paths: &[PathBuf],
        touched: &[&str],
        apply: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut writer = self.lock_writer();
        if cancel.is_cancelled() {
            return Err(QuireError::Cancelled);
        }
        if writer.building.is_some() {
            writer.deferred.extend(paths.iter().cloned());
        }
        self.modify(touched, |snapshot| {
            apply(snapshot);
            snapshot.built_at = Some(Utc::now());
        });
        Ok(())
    }

    /// Run `change` against the live snapshot. Callers hold the writer lock.
    ///
    /// When no reader shares the snapshot or the touched collections, the
    /// change is made in place. Otherwise it runs on a copy made with the
    /// `RwLock` released, and only the pointer swap takes the write lock.
    fn modify<R>(&self, touched: &[&str], change: impl FnOnce(&mut Snapshot) -> R) -> R {
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = Arc::get_mut(&mut current) {
                if touched.iter().all(|name| snapshot.owns(name)) {
                    return change(snapshot);
                }
            }
        }

        let mut next = Snapshot::clone(&self.snapshot());
        let out = change(&mut next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        out
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(writer: &mut Writer, ticket: u64) {
        if writer.building == Some(ticket) {
            writer.building = None;
            writer.deferred.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::{json, Map, Number};

    fn record(collection: &str, locale: Option<&str>, slug: &str) -> Record {
        Record {
            collection: collection.into(),
            locale: locale.map(str::to_string),
            slug: slug.into(),
            path: PathBuf::from(format!(
                "{collection}/{}{slug}.md",
                locale.map(|l| format!("{l}/")).unwrap_or_default()
            )),
            fields: Vec::new(),
            extra: Map::new(),
            body: None,
            modified_at: Utc::now(),
        }
    }

    fn weighted(slug: &str, weight: Option<f64>) -> Record {
        let mut r = record("project", None, slug);
        if let Some(w) = weight {
            let n = Number::from_f64(w).unwrap();
            r.fields.push(("weight".into(), FieldValue::Number(n)));
        }
        r
    }

    fn slugs(records: &[Arc<Record>]) -> Vec<&str> {
        records.iter().map(|r| r.slug.as_str()).collect()
    }

    #[test]
    fn test_upsert_replaces_without_duplicates() {
        let index = ContentIndex::new();
        index.upsert(record("blog", Some("pt"), "ola"));
        let mut changed = record("blog", Some("pt"), "ola");
        changed.extra.insert("rev".into(), json!(2));
        let displaced = index.upsert(changed);

        assert_eq!(displaced.len(), 1);
        assert_eq!(index.len(), 1);
        let listed = index.list_by_collection("blog", Some("pt"));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].extra.get("rev"), Some(&json!(2)));
    }

    #[test]
    fn test_same_slug_in_two_locales() {
        let index = ContentIndex::new();
        index.upsert(record("blog", Some("pt"), "intro"));
        index.upsert(record("blog", Some("en"), "intro"));
        assert_eq!(index.len(), 2);
        assert_eq!(index.list_by_collection("blog", Some("en")).len(), 1);
    }

    #[test]
    fn test_upsert_from_same_path_with_new_slug_drops_stale_key() {
        let index = ContentIndex::new();
        index.upsert(record("blog", Some("pt"), "old"));
        let mut renamed = record("blog", Some("pt"), "new");
        renamed.path = PathBuf::from("blog/pt/old.md");
        let displaced = index.upsert(renamed);

        assert_eq!(slugs(&displaced), vec!["old"]);
        assert_eq!(slugs(&index.list_by_collection("blog", Some("pt"))), vec!["new"]);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let index = ContentIndex::new();
        index.upsert(record("blog", Some("pt"), "a"));
        let before = index.snapshot();
        assert!(index.remove("blog", Some("pt"), "missing").is_none());
        assert!(index.remove("nope", None, "a").is_none());
        assert!(Arc::ptr_eq(&before, &index.snapshot()));

        assert!(index.remove("blog", Some("pt"), "a").is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let index = ContentIndex::new();
        index.upsert(record("blog", Some("pt"), "a"));
        let held = index.snapshot();
        index.upsert(record("blog", Some("pt"), "b"));

        assert_eq!(held.count("blog"), 1);
        assert_eq!(index.snapshot().count("blog"), 2);
    }

    #[test]
    fn test_held_snapshot_is_copied_outside_the_lock() {
        let index = ContentIndex::new();
        for slug in ["a", "b", "c"] {
            index.upsert(record("blog", Some("pt"), slug));
        }
        let held = index.snapshot();

        index
            .apply(&CancelToken::new(), &[], &["blog"], |snapshot| {
                assert!(index.current.try_read().is_ok(), "lock held during copy");
                snapshot
                    .collection_mut("blog")
                    .remove_path(Path::new("blog/pt/a.md"));
            })
            .unwrap();

        assert_eq!(held.count("blog"), 3);
        assert_eq!(index.snapshot().count("blog"), 2);
        assert!(!Arc::ptr_eq(&held, &index.snapshot()));
    }

    #[test]
    fn test_unshared_snapshot_changes_in_place() {
        let index = ContentIndex::new();
        index.upsert(record("blog", Some("pt"), "a"));
        let before = Arc::as_ptr(&index.snapshot());

        index.upsert(record("blog", Some("pt"), "b"));
        assert_eq!(Arc::as_ptr(&index.snapshot()), before);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_place_keeps_greater_path_and_promotes_shadow() {
        let mut records = CollectionRecords::default();
        let mut early = record("project", None, "site");
        early.path = PathBuf::from("projects/a.json");
        let mut late = record("project", None, "site");
        late.path = PathBuf::from("projects/b.json");

        assert!(records.place(Arc::new(late)).is_none());
        let dropped = records.place(Arc::new(early)).unwrap();
        assert_eq!(dropped.path, PathBuf::from("projects/a.json"));
        assert_eq!(records.len(), 1);
        assert!(records.contains_path(Path::new("projects/a.json")));

        let removed = records.remove_path(Path::new("projects/b.json")).unwrap();
        assert_eq!(removed.path, PathBuf::from("projects/b.json"));
        let current = records.get(None, "site").unwrap();
        assert_eq!(current.path, PathBuf::from("projects/a.json"));

        assert!(records.remove(&(None, "site".into())).is_some());
        assert!(records.is_empty());
        assert!(!records.contains_path(Path::new("projects/a.json")));
    }

    #[test]
    fn test_changes_during_full_rebuild_are_handed_back() {
        let index = ContentIndex::new();
        let cancel = CancelToken::new();
        let changed = vec![PathBuf::from("blog/pt/a.md")];

        index.apply(&cancel, &changed, &[], |_| {}).unwrap();
        let ticket = index.begin();
        index.apply(&cancel, &changed, &[], |_| {}).unwrap();
        assert!(index.is_current(ticket));

        assert_eq!(index.commit(ticket, &cancel, Snapshot::default()).unwrap(), changed);
        index.apply(&cancel, &changed, &[], |_| {}).unwrap();
        let next = index.begin();
        assert!(index.commit(next, &cancel, Snapshot::default()).unwrap().is_empty());
    }

    #[test]
    fn test_weight_order_with_unweighted_last() {
        let index = ContentIndex::new();
        for (slug, weight) in [("c", Some(3.0)), ("a", Some(1.0)), ("b", Some(2.0)), ("d", None)] {
            index.upsert(weighted(slug, weight));
        }
        assert_eq!(
            slugs(&index.list_by_collection("project", None)),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_unweighted_collections_list_by_slug() {
        let index = ContentIndex::new();
        for slug in ["zeta", "alpha", "mid"] {
            index.upsert(record("pages", Some("pt"), slug));
        }
        assert_eq!(
            slugs(&index.list_by_collection("pages", Some("pt"))),
            vec!["alpha", "mid", "zeta"]
        );
    }

    #[test]
    fn test_superseded_ticket_cannot_commit() {
        let index = ContentIndex::new();
        let cancel = CancelToken::new();
        let first = index.begin();
        let second = index.begin();

        let err = index.commit(first, &cancel, Snapshot::default()).unwrap_err();
        assert!(matches!(err, QuireError::Cancelled));
        assert!(index.commit(second, &cancel, Snapshot::default()).is_ok());
        assert!(index.snapshot().built_at().is_some());
    }

    proptest! {
        #[test]
        fn prop_listing_is_sorted_and_unique(
            entries in proptest::collection::vec(
                ("[a-e]{1,2}", proptest::option::of(-5i32..5)),
                0..40,
            )
        ) {
            let index = ContentIndex::new();
            for (slug, weight) in &entries {
                index.upsert(weighted(slug, weight.map(f64::from)));
            }
            let listed = index.list_by_collection("project", None);

            let mut expected: Vec<&str> = entries.iter().map(|(s, _)| s.as_str()).collect();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(listed.len(), expected.len());

            for pair in listed.windows(2) {
                prop_assert!(SortKey::of(&pair[0]) < SortKey::of(&pair[1]));
                if let (None, Some(_)) = (pair[0].weight(), pair[1].weight()) {
                    prop_assert!(false, "unweighted record listed before a weighted one");
                }
            }
        }
    }
}
