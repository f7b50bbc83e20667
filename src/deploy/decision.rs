// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Deployment decision engine.
//!
//! Decides, per deployment, whether a code push is actually needed. Commit
//! comparison is the sole unchanged-detection heuristic: it deliberately
//! ignores configuration-only changes, which the `--config-only` and
//! `--force` modes exist to cover and which the drift comparator detects
//! independently.

use crate::vcs::{Vcs, VcsError};

use std::path::{Path, PathBuf};
use tracing::debug;

/// Branches accepted as-is when currently checked out.
const KNOWN_BRANCHES: [&str; 4] = ["main", "master", "dev", "develop"];

/// Outcome of the skip/proceed check for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Local and remote commits match; bypass the entire pipeline.
    NoOpSkip,

    /// The remote app has never received a push.
    NewApp,

    /// Local and remote commits differ; deploy.
    CommitMismatch,
}

/// Decide whether to skip or proceed.
///
/// Skip requires all three: no force flag, a remote commit on record, and
/// commit equality. Anything else proceeds.
pub fn decide(local_commit: &str, remote_commit: Option<&str>, force: bool) -> Decision {
    match remote_commit {
        Some(remote) if !force && remote == local_commit => Decision::NoOpSkip,
        Some(_) => Decision::CommitMismatch,
        None => Decision::NewApp,
    }
}

/// Resolve the branch to deploy from a source directory.
///
/// Preference chain: explicit configuration, the currently checked-out
/// branch when it is one of the well-known names, the origin remote's
/// default branch, an `origin/main` / `origin/master` probe, and finally the
/// current branch whatever it is called.
///
/// # Errors
///
/// - Return [`DecisionError::BranchUndetermined`] when the chain is
///   exhausted. This aborts only the deployment at hand.
pub fn resolve_branch(
    vcs: &dyn Vcs,
    dir: &Path,
    configured: Option<&str>,
) -> Result<String> {
    if let Some(branch) = configured.filter(|branch| !branch.is_empty()) {
        return Ok(branch.to_string());
    }

    let current = vcs.current_branch(dir).ok();
    if let Some(branch) = current
        .as_deref()
        .filter(|branch| KNOWN_BRANCHES.contains(branch))
    {
        return Ok(branch.to_string());
    }

    if let Ok(Some(branch)) = vcs.origin_default_branch(dir) {
        debug!("using origin default branch {branch}");
        return Ok(branch);
    }

    for candidate in ["main", "master"] {
        if vcs.has_ref(dir, &format!("origin/{candidate}")) {
            debug!("probed origin/{candidate}");
            return Ok(candidate.to_string());
        }
    }

    current.ok_or_else(|| DecisionError::BranchUndetermined {
        dir: dir.to_path_buf(),
    })
}

/// Compute the commit to compare and push for a deployment.
///
/// In subtree mode the commit is the synthetic linear commit produced by
/// splitting the history that touches the sub-path, not the branch tip.
pub fn local_commit(
    vcs: &dyn Vcs,
    dir: &Path,
    branch: &str,
    subtree: Option<&SubtreeTarget>,
) -> Result<String> {
    if let Some(target) = subtree {
        return Ok(vcs.subtree_split(&target.repo_root, &target.prefix, branch)?);
    }

    vcs.rev_parse(dir, branch)
        .or_else(|_| vcs.rev_parse(dir, &format!("origin/{branch}")))
        .map_err(DecisionError::from)
}

/// A monorepo sub-path selected for subtree deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeTarget {
    /// Working-tree root of the enclosing repository.
    pub repo_root: PathBuf,

    /// Sub-path relative to the repository root.
    pub prefix: String,
}

/// Detect whether a source directory is a sub-path of a larger repository.
///
/// Returns `None` when the directory is itself the repository root, in which
/// case the branch tip is deployed directly.
pub fn subtree_target(vcs: &dyn Vcs, source_dir: &Path) -> Result<Option<SubtreeTarget>> {
    let repo_root = vcs.repo_root(source_dir)?;

    let canonical_root = canonicalize(&repo_root)?;
    let canonical_source = canonicalize(source_dir)?;
    if canonical_source == canonical_root {
        return Ok(None);
    }

    let prefix = canonical_source
        .strip_prefix(&canonical_root)
        .map_err(|_| DecisionError::SubtreePrefix {
            dir: source_dir.to_path_buf(),
        })?
        .to_string_lossy()
        .into_owned();

    Ok(Some(SubtreeTarget { repo_root, prefix }))
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|source| DecisionError::SourceDir {
        source,
        dir: path.to_path_buf(),
    })
}

/// Decision engine error types. All abort only the current deployment.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// Version-control collaborator failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// The branch resolution chain was exhausted.
    #[error("cannot determine deploy branch for {dir:?}")]
    BranchUndetermined { dir: PathBuf },

    /// Source directory exists but cannot be resolved.
    #[error("cannot access source directory {dir:?}")]
    SourceDir {
        source: std::io::Error,
        dir: PathBuf,
    },

    /// Source directory escapes the repository it was discovered in.
    #[error("source directory {dir:?} is not inside its repository")]
    SubtreePrefix { dir: PathBuf },
}

/// Friendly result alias.
pub type Result<T, E = DecisionError> = std::result::Result<T, E>;
