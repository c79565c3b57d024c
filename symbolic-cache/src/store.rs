//! Content storage for symbol files on the local disk.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use symbolic_common::{symbol_file_name, ModuleRef};
use walkdir::WalkDir;

use crate::error::CacheError;

/// Name of the directory receiving files while they are written.
///
/// It starts with a dot, which is never a valid module name, so it cannot collide with an entry
/// and is skipped when listing entries.
const TEMP_DIR: &str = ".tmp";

/// How often `put` recreates a parent directory removed by a concurrent cleanup.
const PERSIST_ATTEMPTS: usize = 3;

/// Metadata of a symbol file in the [`CacheStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheEntry {
    module: ModuleRef,
    path: PathBuf,
    size: u64,
    last_access: SystemTime,
}

impl CacheEntry {
    /// The module this entry holds symbols for.
    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// The absolute path of the cached file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The size of the cached file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The time this entry was last written or read.
    pub fn last_access(&self) -> SystemTime {
        self.last_access
    }
}

/// A cache hit returned by [`CacheStore::get`].
#[derive(Clone, Debug)]
pub struct CachedFile {
    /// Metadata of the entry, with the refreshed access time.
    pub entry: CacheEntry,
    /// The contents of the cached file.
    pub data: Vec<u8>,
}

/// An on-disk cache of symbol files keyed by [`ModuleRef`].
///
/// Files are stored in the symbol server layout `<root>/<debug_file>/<debug_id>/<symbol_file>`.
/// The store can be shared by any number of processes without locking:
///
///  - Writes go to a temporary file under `<root>/.tmp` and are renamed into place, so readers
///    and the eviction scan never observe partially written files. When two writers race for the
///    same module, the last rename wins and the file is always one of the complete contents.
///  - The modification time of a file records its last access. It is refreshed on every hit,
///    which works independently of `noatime` mounts.
///
/// All methods perform blocking file system I/O.
#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Opens the cache rooted at the given directory, creating it if necessary.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self, CacheError> {
        let store = CacheStore { root: root.into() };
        let temp_dir = store.temp_dir();
        fs::create_dir_all(&temp_dir).map_err(|e| CacheError::io("create", temp_dir, e))?;
        Ok(store)
    }

    /// The root directory of this cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    fn entry_path(&self, module: &ModuleRef) -> PathBuf {
        let mut path = self.root.join(module.debug_file());
        path.push(module.debug_id());
        path.push(module.symbol_file());
        path
    }

    /// Returns the cached file for a module and refreshes its access time.
    ///
    /// Returns `Ok(None)` if the module is not cached.
    pub fn get(&self, module: &ModuleRef) -> Result<Option<CachedFile>, CacheError> {
        let path = self.entry_path(module);

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io("open", path, e)),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| CacheError::io("read", &path, e))?;

        let now = SystemTime::now();
        if let Err(error) = touch(&path, now) {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                path = %path.display(),
                "failed to refresh access time of cache entry"
            );
        }

        let entry = CacheEntry {
            module: module.clone(),
            path,
            size: data.len() as u64,
            last_access: now,
        };

        Ok(Some(CachedFile { entry, data }))
    }

    /// Stores the contents of a symbol file, replacing any previous entry.
    pub fn put(&self, module: &ModuleRef, data: &[u8]) -> Result<CacheEntry, CacheError> {
        let path = self.entry_path(module);
        let temp_dir = self.temp_dir();

        fs::create_dir_all(&temp_dir).map_err(|e| CacheError::io("create", &temp_dir, e))?;
        let mut temp = tempfile::Builder::new()
            .prefix("put-")
            .tempfile_in(&temp_dir)
            .map_err(|e| CacheError::io("create temporary file in", &temp_dir, e))?;

        temp.write_all(data)
            .and_then(|_| temp.flush())
            .map_err(|e| CacheError::io("write", temp.path().to_owned(), e))?;

        let parent = path.parent().unwrap_or(&self.root).to_owned();
        let mut attempt = 1;
        loop {
            fs::create_dir_all(&parent).map_err(|e| CacheError::io("create", &parent, e))?;

            match temp.persist(&path) {
                Ok(_) => break,
                Err(e)
                    if e.error.kind() == io::ErrorKind::NotFound && attempt < PERSIST_ATTEMPTS =>
                {
                    // The directory was pruned between creating and renaming into it.
                    temp = e.file;
                    attempt += 1;
                }
                Err(e) => return Err(CacheError::io("persist", path, e.error)),
            }
        }

        tracing::trace!(module = %module, size = data.len(), "stored cache entry");

        Ok(CacheEntry {
            module: module.clone(),
            path,
            size: data.len() as u64,
            last_access: SystemTime::now(),
        })
    }

    /// Removes the cached file of a module.
    ///
    /// Returns `false` if the module was not cached.
    pub fn remove(&self, module: &ModuleRef) -> Result<bool, CacheError> {
        let path = self.entry_path(module);
        let removed = remove_file(&path)?;
        self.prune_parents(&path);
        Ok(removed)
    }

    /// Removes a listed entry.
    ///
    /// Returns `false` if the entry was removed concurrently.
    pub fn remove_entry(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let removed = remove_file(&entry.path)?;
        self.prune_parents(&entry.path);
        Ok(removed)
    }

    /// Removes the `<debug_id>` and `<debug_file>` directories above an entry once they are empty.
    ///
    /// Stops at the first directory that is not empty or already gone. A concurrent `put` that
    /// loses its directory this way recreates it before renaming.
    fn prune_parents(&self, path: &Path) {
        for dir in path.ancestors().skip(1).take(2) {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }

            if let Err(error) = fs::remove_dir(dir) {
                if error.kind() != io::ErrorKind::NotFound {
                    tracing::trace!(path = %dir.display(), %error, "keeping cache directory");
                }
                break;
            }
        }
    }

    /// Lists all entries currently in the cache.
    ///
    /// Files that are written concurrently only appear once they have been renamed into place.
    /// Entries removed while scanning are skipped.
    pub fn list_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(3)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(error) if error.depth() == 0 => return Err(error.into()),
                Err(error) => {
                    if error.io_error().map(io::Error::kind) != Some(io::ErrorKind::NotFound) {
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            "skipping unreadable cache path"
                        );
                    }
                    continue;
                }
            };

            if item.depth() != 3 || !item.file_type().is_file() {
                continue;
            }

            let Some(module) = module_from_path(item.path()) else {
                tracing::trace!(path = %item.path().display(), "skipping foreign file in cache");
                continue;
            };

            let metadata = match item.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };

            entries.push(CacheEntry {
                module,
                path: item.into_path(),
                size: metadata.len(),
                last_access: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(entries)
    }

    /// The total size of all entries in bytes.
    pub fn size_bytes(&self) -> Result<u64, CacheError> {
        Ok(self.list_entries()?.iter().map(CacheEntry::size).sum())
    }

    /// Removes temporary files older than `max_age`.
    ///
    /// Temporary files are left behind when a writer crashes before renaming its file into place.
    /// Returns the number of removed files.
    pub fn clear_temp(&self, max_age: Duration) -> Result<usize, CacheError> {
        let temp_dir = self.temp_dir();
        let read_dir = match fs::read_dir(&temp_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io("read", temp_dir, e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for dir_entry in read_dir.flatten() {
            let stale = dir_entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default() > max_age)
                .unwrap_or(false);

            if stale && remove_file(&dir_entry.path())? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Records an access by updating the modification time of a file.
fn touch(path: &Path, time: SystemTime) -> io::Result<()> {
    File::options().write(true).open(path)?.set_modified(time)
}

fn remove_file(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io("remove", path, e)),
    }
}

/// Recovers the module reference from an entry path `<debug_file>/<debug_id>/<symbol_file>`.
fn module_from_path(path: &Path) -> Option<ModuleRef> {
    let file_name = path.file_name()?.to_str()?;
    let id_dir = path.parent()?;
    let debug_id = id_dir.file_name()?.to_str()?;
    let debug_file = id_dir.parent()?.file_name()?.to_str()?;

    if file_name != symbol_file_name(debug_file) {
        return None;
    }

    ModuleRef::new(debug_file, debug_id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_module_from_path() {
        let module = module_from_path(Path::new("/cache/xul.pdb/ABCDEF/xul.sym")).unwrap();
        assert_eq!(module, ModuleRef::new("xul.pdb", "ABCDEF").unwrap());

        assert_eq!(module_from_path(Path::new("/cache/xul.pdb/ABCDEF/other.sym")), None);
        assert_eq!(module_from_path(Path::new("xul.sym")), None);
    }
}
