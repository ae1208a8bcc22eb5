//! Loaded-shared-library cache: `libloading::Library::new`/`dlclose`
//! bookkeeping without a process-wide `static` (spec §9 design note).
//!
//! `LibraryTable` is a `parking_lot::Mutex`-guarded map owned by whatever
//! holds it (a `Compiler`, or `tgc-cli` constructing one per run).
//! `open` hands back an RAII `SharedLibraryHandle` instead of a raw
//! `Arc<Library>` so refcounting and `dlclose` happen on `Drop` --
//! ownership does the bookkeeping the original's manual
//! increment/decrement dict did by hand.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::LoadError;

struct LoadedEntry {
    lib: Arc<libloading::Library>,
    refcount: usize,
}

#[derive(Default)]
pub struct LibraryTable {
    entries: Mutex<HashMap<PathBuf, LoadedEntry>>,
}

impl LibraryTable {
    pub fn new() -> Self {
        LibraryTable { entries: Mutex::new(HashMap::new()) }
    }

    /// Opens `path`, reusing and incrementing the refcount of an
    /// already-loaded library at the same path. On a load failure the
    /// offending file is deleted so a subsequent build attempt starts
    /// clean (§7 Load-failure policy).
    pub fn open(self: &Arc<Self>, path: &Path) -> Result<SharedLibraryHandle, LoadError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(path) {
            entry.refcount += 1;
            return Ok(SharedLibraryHandle { table: self.clone(), path: path.to_path_buf(), lib: entry.lib.clone() });
        }

        let lib = match unsafe { libloading::Library::new(path) } {
            Ok(lib) => Arc::new(lib),
            Err(source) => {
                let _ = fs::remove_file(path);
                return Err(LoadError::OpenFailed { path: path.to_path_buf(), source });
            }
        };
        entries.insert(path.to_path_buf(), LoadedEntry { lib: lib.clone(), refcount: 1 });
        Ok(SharedLibraryHandle { table: self.clone(), path: path.to_path_buf(), lib })
    }

    fn release(&self, path: &Path) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(path) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                entries.remove(path);
            }
        }
    }
}

/// An RAII handle to a loaded library. Dropping the last handle for a
/// given path removes it from the table and drops the underlying
/// `Arc<Library>`, which runs `dlclose` via `libloading`'s own `Drop`.
pub struct SharedLibraryHandle {
    table: Arc<LibraryTable>,
    path: PathBuf,
    lib: Arc<libloading::Library>,
}

impl SharedLibraryHandle {
    pub fn library(&self) -> &libloading::Library {
        &self.lib
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedLibraryHandle {
    fn drop(&mut self) {
        self.table.release(&self.path);
    }
}
