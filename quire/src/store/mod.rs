use crate::document::{Parsers, Renderer};
use crate::error::Result;
use crate::index::{CancelToken, ContentIndex, Indexer};
use crate::pattern::SourcePattern;
use crate::query::QueryEngine;
use crate::report::{BuildReport, Strictness};
use crate::schema::{parse_config, ContentConfig, Locales, SchemaRegistry};
use crate::source::Scanner;
use crate::validation::Validator;
use crate::watcher::{ContentWatcher, WatcherEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Per-collection line of [`StoreStatus`]
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub kind: String,
    pub localized: bool,
    pub sources: Vec<String>,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub root: PathBuf,
    pub default_locale: Option<String>,
    pub locales: Vec<String>,
    pub strictness: Strictness,
    pub built_at: Option<DateTime<Utc>>,
    pub records: usize,
    pub collections: Vec<CollectionStatus>,
}

/// The main entry point: loads `content.yaml`, owns every component and keeps
/// the live index fresh.
pub struct ContentStore {
    registry: SchemaRegistry,
    scanner: Scanner,
    parsers: Parsers,
    validator: Validator,
    strictness: Strictness,
    index: ContentIndex,
    /// Token of the rebuild currently running, cancelled when a new one starts.
    in_flight: Mutex<CancelToken>,
}

impl ContentStore {
    /// Load the configuration at `config_path` and build the initial index.
    pub fn open(config_path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::load(config_path)?;
        store.rebuild()?;
        Ok(store)
    }

    /// Load the configuration without indexing anything yet.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config = parse_config(config_path.as_ref())?;
        Self::from_config(config)
    }

    pub fn from_config(config: ContentConfig) -> Result<Self> {
        let ContentConfig {
            root,
            locales,
            strictness,
            collections,
        } = config;
        let registry = SchemaRegistry::from_definitions(collections)?;
        log::debug!(
            "Loaded {} collection(s) rooted at {}",
            registry.len(),
            root.display()
        );

        Ok(ContentStore {
            registry,
            scanner: Scanner::new(root, locales.clone()),
            parsers: Parsers::default(),
            validator: Validator::new(locales),
            strictness,
            index: ContentIndex::new(),
            in_flight: Mutex::new(CancelToken::new()),
        })
    }

    /// Swap the markdown renderer used for page bodies.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.parsers = Parsers::new(renderer);
        self
    }

    pub fn set_strictness(&mut self, strictness: Strictness) {
        self.strictness = strictness;
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    pub fn locales(&self) -> &Locales {
        self.scanner.locales()
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
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

    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(&self.registry, &self.index, self.locales())
    }

    /// Full rebuild. Cancels any rebuild still running on this store.
    pub fn rebuild(&self) -> Result<BuildReport> {
        let token = self.start_build();
        self.indexer().rebuild_all(&self.index, &token)
    }

    /// Cancel the rebuild currently running, if any.
    pub fn cancel_rebuild(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Incremental rebuild of the given paths. A full rebuild already running
    /// keeps going and picks these paths up when it commits.
    pub fn apply_changes(&self, paths: &[PathBuf]) -> Result<BuildReport> {
        self.indexer()
            .apply_changes(&self.index, paths, &CancelToken::new())
    }

    /// Run a lenient pass into a scratch index and report what it found. The
    /// live index is left alone.
    pub fn check(&self) -> Result<BuildReport> {
        let scratch = ContentIndex::new();
        Indexer::new(
            &self.registry,
            &self.scanner,
            &self.parsers,
            &self.validator,
            Strictness::Lenient,
        )
        .rebuild_all(&scratch, &CancelToken::new())
    }

    pub fn status(&self) -> StoreStatus {
        let snapshot = self.index.snapshot();
        let collections = self
            .registry
            .iter()
            .map(|def| CollectionStatus {
                name: def.name.clone(),
                kind: format!("{:?}", def.kind).to_lowercase(),
                localized: def.localized,
                sources: def.sources.clone(),
                records: snapshot.count(&def.name),
            })
            .collect();

        StoreStatus {
            root: self.root().to_path_buf(),
            default_locale: self.locales().default_locale().map(str::to_string),
            locales: self.locales().known().to_vec(),
            strictness: self.strictness,
            built_at: snapshot.built_at(),
            records: snapshot.len(),
            collections,
        }
    }

    /// Directories below the content root that hold collection sources.
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for def in self.registry.iter() {
            for raw in &def.sources {
                let Ok(pattern) = SourcePattern::parse(raw) else {
                    continue;
                };
                let base = pattern.base_directory().to_path_buf();
                if base.as_os_str().is_empty() {
                    return vec![PathBuf::new()];
                }
                if !dirs.iter().any(|d| base.starts_with(d)) {
                    dirs.retain(|d| !d.starts_with(&base));
                    dirs.push(base);
                }
            }
        }
        dirs
    }

    /// Start a watcher over every collection directory. Feed its batches to
    /// [`ContentStore::apply_events`].
    pub fn watch(&self) -> Result<ContentWatcher> {
        Ok(ContentWatcher::start(self.root(), &self.watch_dirs())?)
    }

    pub fn apply_events(&self, events: &[WatcherEvent]) -> Result<BuildReport> {
        let paths: Vec<PathBuf> = events.iter().map(|e| e.path.clone()).collect();
        self.apply_changes(&paths)
    }

    fn start_build(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.cancel();
        *in_flight = token.clone();
        token
    }
}
