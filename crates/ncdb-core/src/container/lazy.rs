//! Lazily-loading container handle.
//!
//! `open` reads only the manifest. The full database is parsed on first
//! access to [`LazyContainer::db`]; concurrent first accesses wait on the
//! thread doing the parse instead of parsing again.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::container::manifest::Manifest;
use crate::container::reader::{history_of, manifest_of, open_archive, read_container};
use crate::errors::NcdbResult;
use crate::models::{CoverageDb, HistoryNode, ScopeId};

enum LoadState {
    Unloaded,
    Loading,
    Loaded(Arc<CoverageDb>),
}

pub struct LazyContainer {
    path: PathBuf,
    manifest: Manifest,
    history: Mutex<Option<Arc<Vec<HistoryNode>>>>,
    state: Mutex<LoadState>,
    loaded: Condvar,
    parses: AtomicUsize,
}

impl LazyContainer {
    pub fn open(path: impl AsRef<Path>) -> NcdbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut zip = open_archive(&path)?;
        let manifest = manifest_of(&mut zip)?;
        debug!(path = %path.display(), schema = %manifest.schema_hash, "opened container lazily");
        Ok(Self {
            path,
            manifest,
            history: Mutex::new(None),
            state: Mutex::new(LoadState::Unloaded),
            loaded: Condvar::new(),
            parses: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Loaded(_))
    }

    /// History records; parses only `history.json` unless the full
    /// database is already loaded.
    pub fn history(&self) -> NcdbResult<Arc<Vec<HistoryNode>>> {
        if let LoadState::Loaded(db) = &*self.state.lock() {
            return Ok(Arc::new(db.history.clone()));
        }
        let mut cached = self.history.lock();
        if let Some(history) = cached.as_ref() {
            return Ok(Arc::clone(history));
        }
        let history = Arc::new(history_of(&mut open_archive(&self.path)?)?);
        *cached = Some(Arc::clone(&history));
        Ok(history)
    }

    /// The fully decoded database, parsed at most once.
    pub fn db(&self) -> NcdbResult<Arc<CoverageDb>> {
        let mut state = self.state.lock();
        loop {
            if let LoadState::Loaded(db) = &*state {
                return Ok(Arc::clone(db));
            }
            if matches!(*state, LoadState::Unloaded) {
                break;
            }
            self.loaded.wait(&mut state);
        }
        *state = LoadState::Loading;
        drop(state);

        self.parses.fetch_add(1, Ordering::SeqCst);
        let result = read_container(&self.path);

        let mut state = self.state.lock();
        let outcome = match result {
            Ok(db) => {
                let db = Arc::new(db);
                *state = LoadState::Loaded(Arc::clone(&db));
                Ok(db)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "lazy container load failed");
                *state = LoadState::Unloaded;
                Err(e)
            }
        };
        self.loaded.notify_all();
        outcome
    }

    pub fn preload(&self) -> NcdbResult<()> {
        self.db().map(|_| ())
    }

    pub fn design_unit(&self, name: &str) -> NcdbResult<Option<ScopeId>> {
        Ok(self.db()?.design_unit(name))
    }

    #[cfg(test)]
    fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}
