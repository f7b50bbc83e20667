// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Per-run execution context.
//!
//! Every component receives an explicit, immutable [`RunContext`] instead of
//! consulting ambient global state. The context is built once from the parsed
//! document plus command-line flags and never mutated afterwards.

use crate::{
    config::ConfigDocument,
    path::{self, PathError},
};

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Immutable context threaded through every component of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Host name or address of the Dokku server.
    pub ssh_host: String,

    /// SSH alias used to reach the server.
    pub ssh_alias: String,

    /// Log every would-be mutation instead of performing it.
    pub dry_run: bool,

    /// Deploy even when local and remote commits match.
    pub force: bool,

    /// Refresh remote configuration without pushing code.
    pub config_only: bool,

    /// Skip interactive confirmation.
    pub assume_yes: bool,

    /// Directory the config document lives in. Source dirs resolve against it.
    pub base_dir: PathBuf,

    /// Two-level secrets directory.
    pub env_root: PathBuf,

    /// Local certificate pairs, one `<app>.crt`/`<app>.key` per app.
    pub certs_dir: PathBuf,

    /// Backup artifact directory.
    pub backup_dir: PathBuf,

    /// Sync cache directory holding imported remote-state snapshots.
    pub cache_dir: PathBuf,

    /// Health check attempt budget.
    pub health_attempts: u32,

    /// Delay between health check attempts.
    pub health_delay: Duration,
}

impl RunContext {
    /// Build a context from a parsed document and the path it was loaded from.
    ///
    /// Conventional sibling directories of the document are used for secrets
    /// (`env/`), certificates (`certs/`), and backups (`backups/`); the sync
    /// cache lives under the XDG data directory.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::NoWayHome`] if the XDG data directory cannot be
    ///   determined.
    pub fn new(document: &ConfigDocument, config_path: &Path) -> Result<Self, PathError> {
        let base_dir = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            ssh_host: document.ssh_host.clone(),
            ssh_alias: document.ssh_alias.clone(),
            dry_run: false,
            force: false,
            config_only: false,
            assume_yes: false,
            env_root: base_dir.join("env"),
            certs_dir: base_dir.join("certs"),
            backup_dir: base_dir.join("backups"),
            cache_dir: path::default_sync_cache_dir()?,
            base_dir,
            health_attempts: 30,
            health_delay: Duration::from_secs(2),
        })
    }

    /// Resolve a deployment's source directory against the document location.
    pub fn source_path(&self, source_dir: &str) -> PathBuf {
        path::resolve_against(&self.base_dir, source_dir)
    }
}
