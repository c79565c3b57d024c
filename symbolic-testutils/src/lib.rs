//! Test helpers for the symbolication crates.
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

/// Returns the full path to the specified fixture.
///
/// Fixtures are stored in the `symbolic-testutils/fixtures` directory and paths should be given
/// relative to that location.
///
/// # Example
///
/// ```
/// use symbolic_testutils::fixture;
///
/// let path = fixture("windows/xul.sym");
/// assert!(path.ends_with("windows/xul.sym"));
/// ```
pub fn fixture<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.push("fixtures");

    let path = path.as_ref();
    full_path.push(path);

    assert!(
        full_path.exists(),
        "Fixture does not exist: {}",
        full_path.display()
    );

    full_path
}

/// Reads the contents of the specified fixture.
///
/// See [`fixture`] for how paths are resolved.
pub fn read_fixture<P: AsRef<Path>>(path: P) -> Vec<u8> {
    let path = fixture(path);
    match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) => panic!("Failed to read fixture {}: {}", path.display(), e),
    }
}

/// Returns the root of the fixture symbol store.
///
/// The store uses the symbol server layout `<debug_file>/<debug_id>/<symbol_file>` and contains
/// symbols for `xul.pdb` and `libc.so.6`.
pub fn symbol_store() -> PathBuf {
    fixture("symbols")
}
