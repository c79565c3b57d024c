//! Common types and errors used in the symbolication service.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use debugid::DebugId;
use thiserror::Error;

use crate::path::{is_safe_path_component, symbol_file_name};

/// Describes which component of a [`ModuleRef`] was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleRefField {
    /// The debug file name, such as `xul.pdb`.
    DebugFile,
    /// The debug identifier.
    DebugId,
}

impl fmt::Display for ModuleRefField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleRefField::DebugFile => write!(f, "debug file"),
            ModuleRefField::DebugId => write!(f, "debug id"),
        }
    }
}

/// An error returned for module references that cannot be mapped onto a storage path.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid {field}: {value:?}")]
pub struct InvalidModuleRef {
    field: ModuleRefField,
    value: String,
}

impl InvalidModuleRef {
    /// Returns the component that was rejected.
    pub fn field(&self) -> ModuleRefField {
        self.field
    }
}

/// Identity of a specific build of a module.
///
/// A module reference is the pair of a debug file name and an opaque debug identifier, for
/// instance `("xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2")`. It selects the symbol file used to
/// resolve stack frames and is the key of both the on-disk and the in-process caches. Two frames
/// with equal references always resolve against the same symbol table.
///
/// Both components are used as path components and are therefore validated on construction, see
/// [`is_safe_path_component`].
///
/// # Examples
///
/// ```
/// use symbolic_common::ModuleRef;
///
/// let module = ModuleRef::new("xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2").unwrap();
/// assert_eq!(module.symbol_path(), "xul.pdb/44E4EC8C2F41492B9369D6B9A059577C2/xul.sym");
/// assert_eq!(module.to_string(), "xul.pdb/44E4EC8C2F41492B9369D6B9A059577C2");
/// ```
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "(String, String)", into = "(String, String)"))]
pub struct ModuleRef {
    debug_file: String,
    debug_id: String,
}

impl ModuleRef {
    /// Creates a validated module reference.
    pub fn new<F, I>(debug_file: F, debug_id: I) -> Result<Self, InvalidModuleRef>
    where
        F: Into<String>,
        I: Into<String>,
    {
        let debug_file = debug_file.into();
        let debug_id = debug_id.into();

        if !is_safe_path_component(&debug_file) {
            return Err(InvalidModuleRef {
                field: ModuleRefField::DebugFile,
                value: debug_file,
            });
        }

        if !is_safe_path_component(&debug_id) {
            return Err(InvalidModuleRef {
                field: ModuleRefField::DebugId,
                value: debug_id,
            });
        }

        Ok(ModuleRef {
            debug_file,
            debug_id,
        })
    }

    /// The name of the debug file, such as `xul.pdb` or `libxul.so`.
    pub fn debug_file(&self) -> &str {
        &self.debug_file
    }

    /// The debug identifier as given by the client.
    pub fn debug_id(&self) -> &str {
        &self.debug_id
    }

    /// Parses the debug identifier from its Breakpad representation.
    ///
    /// Returns `None` if the identifier is not in Breakpad format. Such modules can still be
    /// looked up, since the identifier is treated as opaque everywhere else.
    pub fn parsed_debug_id(&self) -> Option<DebugId> {
        DebugId::from_breakpad(&self.debug_id).ok()
    }

    /// The file name of the Breakpad symbol file, such as `xul.sym`.
    pub fn symbol_file(&self) -> String {
        symbol_file_name(&self.debug_file)
    }

    /// The relative path of the symbol file on a symbol server.
    ///
    /// The layout is `<debug_file>/<debug_id>/<symbol_file>`.
    pub fn symbol_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.debug_file,
            self.debug_id,
            self.symbol_file()
        )
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.debug_file, self.debug_id)
    }
}

impl TryFrom<(String, String)> for ModuleRef {
    type Error = InvalidModuleRef;

    fn try_from((debug_file, debug_id): (String, String)) -> Result<Self, Self::Error> {
        ModuleRef::new(debug_file, debug_id)
    }
}

impl From<ModuleRef> for (String, String) {
    fn from(module: ModuleRef) -> Self {
        (module.debug_file, module.debug_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_module_ref_paths() {
        let module = ModuleRef::new("libxul.so", "0C9B6E7B8D1F3E2A0000000000000000").unwrap();
        assert_eq!(module.symbol_file(), "libxul.so.sym");
        assert_eq!(
            module.symbol_path(),
            "libxul.so/0C9B6E7B8D1F3E2A0000000000000000/libxul.so.sym"
        );
    }

    #[test]
    fn test_module_ref_rejects_traversal() {
        let err = ModuleRef::new("..", "ABC").unwrap_err();
        assert_eq!(err.field(), ModuleRefField::DebugFile);

        let err = ModuleRef::new("xul.pdb", "../../etc").unwrap_err();
        assert_eq!(err.field(), ModuleRefField::DebugId);
        assert_eq!(err.to_string(), "invalid debug id: \"../../etc\"");
    }

    #[test]
    fn test_parsed_debug_id() {
        let module = ModuleRef::new("xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2").unwrap();
        let id = module.parsed_debug_id().unwrap();
        assert_eq!(id.to_string(), "44e4ec8c-2f41-492b-9369-d6b9a059577c-2");

        let opaque = ModuleRef::new("xul.pdb", "not-a-breakpad-id").unwrap();
        assert_eq!(opaque.parsed_debug_id(), None);
    }
}
