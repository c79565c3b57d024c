/// File extension of Breakpad symbol files.
pub const SYMBOL_FILE_EXTENSION: &str = "sym";

fn is_path_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Checks whether `name` can be used as a single component of a file system path.
///
/// Module names and debug identifiers arrive from untrusted requests and are used verbatim as
/// directory names in caches and symbol stores. This rejects everything that could escape the
/// parent directory or create hidden entries: empty strings, `.` prefixes (including `..`), path
/// separators of any platform, NUL bytes and control characters.
///
/// # Examples
///
/// ```
/// use symbolic_common::is_safe_path_component;
///
/// assert!(is_safe_path_component("xul.pdb"));
/// assert!(!is_safe_path_component("../etc"));
/// assert!(!is_safe_path_component("C:\\Windows"));
/// ```
pub fn is_safe_path_component(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.chars().any(|c| is_path_separator(c) || c.is_control())
}

/// Returns the name of the Breakpad symbol file for a debug file.
///
/// Symbol servers store the symbols of `xul.pdb` as `xul.sym`. All other debug files, such as
/// `libxul.so` or `XUL`, get the `.sym` extension appended.
///
/// # Examples
///
/// ```
/// use symbolic_common::symbol_file_name;
///
/// assert_eq!(symbol_file_name("xul.pdb"), "xul.sym");
/// assert_eq!(symbol_file_name("libxul.so"), "libxul.so.sym");
/// ```
pub fn symbol_file_name(debug_file: &str) -> String {
    let stem = match debug_file.len().checked_sub(4) {
        Some(split)
            if debug_file.is_char_boundary(split)
                && debug_file[split..].eq_ignore_ascii_case(".pdb") =>
        {
            &debug_file[..split]
        }
        _ => debug_file,
    };

    format!("{}.{}", stem, SYMBOL_FILE_EXTENSION)
}
