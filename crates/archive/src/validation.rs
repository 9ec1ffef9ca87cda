use std::path::{Component, Path};

use crate::ArchiveError;

/// Validates a logical entry name (relative path, forward slashes).
///
/// Rejects empty names, absolute paths, parent traversal and Windows
/// drive or UNC prefixes.
pub fn validate_entry_name(name: &str) -> Result<(), ArchiveError> {
    if name.is_empty() {
        return Err(ArchiveError::InvalidEntry("empty name".into()));
    }

    if Path::new(name).is_absolute() || name.starts_with('/') {
        return Err(ArchiveError::InvalidEntry(format!(
            "absolute path not allowed: {name}"
        )));
    }

    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(ArchiveError::InvalidEntry(format!(
            "Windows drive prefix not allowed: {name}"
        )));
    }
    if name.starts_with("\\\\") {
        return Err(ArchiveError::InvalidEntry(format!(
            "UNC path not allowed: {name}"
        )));
    }

    for component in Path::new(name).components() {
        if matches!(component, Component::ParentDir) {
            return Err(ArchiveError::InvalidEntry(format!(
                "parent traversal not allowed: {name}"
            )));
        }
    }
    if name.split(['/', '\\']).any(|part| part == "..") {
        return Err(ArchiveError::InvalidEntry(format!(
            "parent traversal not allowed: {name}"
        )));
    }

    Ok(())
}

/// Validates an archive file name: a single, plain path component.
pub fn validate_archive_name(name: &str) -> Result<(), ArchiveError> {
    validate_entry_name(name)?;

    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) {
        return Err(ArchiveError::InvalidEntry(format!(
            "archive name must be a single file name: {name}"
        )));
    }

    Ok(())
}
