// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Layered secrets resolution.
//!
//! Secrets live in a two-level directory: a shared file named after the
//! source directory with a leading underscore (`<env_root>/_<source_dir>`)
//! and a domain-specific file (`<env_root>/<domain>`). Both are optional;
//! a missing file contributes zero entries.
//!
//! Files are line-oriented `KEY=VALUE`. Blank lines and `#` comments are
//! skipped. When both files declare the same key, both entries stay in the
//! resolved list in application order (shared first, specific second); the
//! remote configuration store applies them last-write-wins, so the specific
//! entry ends up winning there. That precedence belongs to the consumer, not
//! to this resolver.

use std::{io, path::Path};
use tracing::{debug, warn};

/// A resolved secret entry. Order of entries is significant.
pub type SecretPair = (String, String);

/// Load and layer the secret files for one deployment.
///
/// # Errors
///
/// - Return [`SecretsError::Io`] if a secrets file exists but cannot be read.
pub fn resolve_secrets(
    env_root: &Path,
    source_dir: &str,
    domain: &str,
) -> Result<Vec<SecretPair>> {
    let mut secrets = Vec::new();

    // Shared first, specific second. Order is fixed and significant.
    let shared = env_root.join(format!("_{source_dir}"));
    let specific = env_root.join(domain);
    for file in [&shared, &specific] {
        match std::fs::read_to_string(file) {
            Ok(contents) => {
                debug!("loading secrets from {}", file.display());
                parse_env_lines(&contents, file, &mut secrets);
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => {
                return Err(SecretsError::Io {
                    source: error,
                    path: file.display().to_string(),
                })
            }
        }
    }

    Ok(secrets)
}

fn parse_env_lines(contents: &str, path: &Path, secrets: &mut Vec<SecretPair>) {
    for (number, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            warn!(
                "{}:{}: not a KEY=VALUE line, skipping",
                path.display(),
                number + 1
            );
            continue;
        };

        if !is_valid_key(key) {
            warn!(
                "{}:{}: invalid key {key:?}, skipping",
                path.display(),
                number + 1
            );
            continue;
        }

        secrets.push((key.to_string(), unquote(value).to_string()));
    }
}

/// Keys match `[A-Za-z_][A-Za-z0-9_]*`.
fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Strip one matching pair of wrapping quotes. No escape processing inside.
fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Secrets resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    /// A secrets file exists but could not be read.
    #[error("cannot read secrets file {path}")]
    Io {
        source: std::io::Error,
        path: String,
    },
}

/// Friendly result alias.
pub type Result<T, E = SecretsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn shared_entries_precede_domain_entries() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "_api", "KEY=shared\n");
        write(root.path(), "api.example.com", "KEY=specific\n");

        let secrets = resolve_secrets(root.path(), "api", "api.example.com").unwrap();
        assert_eq!(
            secrets,
            vec![
                ("KEY".to_string(), "shared".to_string()),
                ("KEY".to_string(), "specific".to_string()),
            ]
        );
    }

    #[test]
    fn missing_files_resolve_to_zero_entries() {
        let root = tempfile::tempdir().unwrap();
        let secrets = resolve_secrets(root.path(), "api", "api.example.com").unwrap();
        assert!(secrets.is_empty());
    }

    #[test]
    fn comments_blanks_and_bad_keys_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        write(
            root.path(),
            "api.example.com",
            indoc! {"
                # database settings
                DB_HOST=db.internal

                  # indented comment
                9BAD=nope
                not a line
                _OK=yes
            "},
        );

        let secrets = resolve_secrets(root.path(), "api", "api.example.com").unwrap();
        assert_eq!(
            secrets,
            vec![
                ("DB_HOST".to_string(), "db.internal".to_string()),
                ("_OK".to_string(), "yes".to_string()),
            ]
        );
    }

    #[test]
    fn wrapping_quotes_are_stripped_without_escape_processing() {
        let root = tempfile::tempdir().unwrap();
        write(
            root.path(),
            "api.example.com",
            indoc! {r#"
                DOUBLE="hello world"
                SINGLE='it''s'
                MISMATCHED="half'
                INNER=a"b"c
            "#},
        );

        let secrets = resolve_secrets(root.path(), "api", "api.example.com").unwrap();
        assert_eq!(
            secrets,
            vec![
                ("DOUBLE".to_string(), "hello world".to_string()),
                ("SINGLE".to_string(), "it''s".to_string()),
                ("MISMATCHED".to_string(), "\"half'".to_string()),
                ("INNER".to_string(), "a\"b\"c".to_string()),
            ]
        );
    }

    #[test]
    fn value_keeps_everything_after_first_equals() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "api.example.com", "URL=postgres://u:p@h/db?a=1\n");
        let secrets = resolve_secrets(root.path(), "api", "api.example.com").unwrap();
        assert_eq!(secrets[0].1, "postgres://u:p@h/db?a=1");
    }
}
