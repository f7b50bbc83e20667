// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevant path information for the external files and directories
//! dokkup interacts with: the secrets directory, the backup artifact
//! directory, and the sync cache.

use std::path::{Path, PathBuf};

/// Determine default absolute path to the sync cache directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/dokkup` as the default
/// location for imported remote-state snapshots. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_sync_cache_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("dokkup"))
        .ok_or(PathError::NoWayHome)
}

/// Expand `~` and environment variables in a user-supplied path.
///
/// # Errors
///
/// - Return [`PathError::Expansion`] if a referenced variable is undefined.
pub fn expand_path(path: impl AsRef<str>) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.as_ref())
            .map_err(PathError::Expansion)?
            .into_owned(),
    ))
}

/// Resolve a possibly-relative path against a base directory.
///
/// Absolute paths are passed through untouched.
pub fn resolve_against(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.as_ref().join(path)
    }
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Shell expansion on user-supplied path failed.
    #[error(transparent)]
    Expansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias.
pub type Result<T, E = PathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolve_against_keeps_absolute_paths() {
        let resolved = resolve_against("/base", "/somewhere/else");
        assert_eq!(resolved, PathBuf::from("/somewhere/else"));
    }

    #[test]
    fn resolve_against_joins_relative_paths() {
        let resolved = resolve_against("/base", "api");
        assert_eq!(resolved, PathBuf::from("/base/api"));
    }
}
