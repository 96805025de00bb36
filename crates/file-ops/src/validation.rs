use std::path::{Component, Path};

use crate::ExpandError;

/// Validates that an archive member name cannot escape the extraction
/// directory.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_member_path(name: &str) -> Result<(), ExpandError> {
    if name.is_empty() {
        return Err(ExpandError::UnsafePath("empty name".into()));
    }

    // Archives written on Windows may use backslashes.
    let normalized = name.replace('\\', "/");
    let path = Path::new(&normalized);

    if path.is_absolute() {
        return Err(ExpandError::UnsafePath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ExpandError::UnsafePath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(ExpandError::UnsafePath(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
