// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Version-control collaborator.
//!
//! The deployment decision engine and the plan executor only talk to the
//! local repository through the [`Vcs`] trait. The [`GitLocal`] adapter
//! implements it with libgit2 for introspection (branch, rev-parse, remote
//! bookkeeping) and the git binary for the operations libgit2 is awkward at
//! (subtree split, push over the user's ssh agent).

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

/// Layer of indirection for local repository access.
pub trait Vcs {
    /// Top-level working directory of the repository containing `dir`.
    fn repo_root(&self, dir: &Path) -> Result<PathBuf>;

    /// Name of the currently checked-out branch.
    fn current_branch(&self, dir: &Path) -> Result<String>;

    /// Full commit hash of a ref.
    fn rev_parse(&self, dir: &Path, refname: &str) -> Result<String>;

    /// Branch the origin remote's HEAD points at, when known locally.
    fn origin_default_branch(&self, dir: &Path) -> Result<Option<String>>;

    /// Whether a ref resolves in this repository.
    fn has_ref(&self, dir: &Path, refname: &str) -> bool;

    /// Update remote-tracking refs from a remote.
    fn fetch(&self, dir: &Path, remote: &str) -> Result<()>;

    /// Split the history touching `prefix` into a synthetic linear commit.
    fn subtree_split(&self, dir: &Path, prefix: &str, branch: &str) -> Result<String>;

    /// Add a named remote, or repoint it when the URL changed.
    fn ensure_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()>;

    /// Push a commit to a remote branch.
    fn push(
        &self,
        dir: &Path,
        remote: &str,
        commit: &str,
        dest_branch: &str,
        force: bool,
    ) -> Result<()>;
}

/// Local git repository access through libgit2 and the git binary.
#[derive(Debug, Default)]
pub struct GitLocal;

impl GitLocal {
    fn open(&self, dir: &Path) -> Result<git2::Repository> {
        Ok(git2::Repository::discover(dir)?)
    }
}

impl Vcs for GitLocal {
    fn repo_root(&self, dir: &Path) -> Result<PathBuf> {
        let repository = self.open(dir)?;
        repository
            .workdir()
            .map(Path::to_path_buf)
            .ok_or(VcsError::BareRepository)
    }

    fn current_branch(&self, dir: &Path) -> Result<String> {
        let repository = self.open(dir)?;
        let head = repository.head()?;
        head.shorthand()
            .map(str::to_string)
            .ok_or(VcsError::DetachedHead)
    }

    fn rev_parse(&self, dir: &Path, refname: &str) -> Result<String> {
        let repository = self.open(dir)?;
        let object = repository.revparse_single(refname)?;
        let commit = object.peel_to_commit()?.id().to_string();
        Ok(commit)
    }

    fn origin_default_branch(&self, dir: &Path) -> Result<Option<String>> {
        let repository = self.open(dir)?;
        let Ok(reference) = repository.find_reference("refs/remotes/origin/HEAD") else {
            return Ok(None);
        };
        Ok(reference
            .symbolic_target()
            .and_then(|target| target.strip_prefix("refs/remotes/origin/"))
            .map(str::to_string))
    }

    fn has_ref(&self, dir: &Path, refname: &str) -> bool {
        self.open(dir)
            .map(|repository| repository.revparse_single(refname).is_ok())
            .unwrap_or(false)
    }

    #[instrument(skip(self, dir), level = "debug")]
    fn fetch(&self, dir: &Path, remote: &str) -> Result<()> {
        gitcall(dir, ["fetch", remote]).map(|_| ())
    }

    #[instrument(skip(self, dir), level = "debug")]
    fn subtree_split(&self, dir: &Path, prefix: &str, branch: &str) -> Result<String> {
        let commit = gitcall(
            dir,
            ["subtree", "split", "--prefix", prefix, branch],
        )?;

        // `git subtree split` prints the synthetic commit hash as its last line.
        commit
            .lines()
            .last()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
            .map(str::to_string)
            .ok_or_else(|| VcsError::SubtreeSplit {
                prefix: prefix.to_string(),
            })
    }

    fn ensure_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()> {
        let repository = self.open(dir)?;
        match repository.find_remote(name) {
            Ok(remote) => {
                if remote.url() != Some(url) {
                    debug!("repointing remote {name} to {url}");
                    repository.remote_set_url(name, url)?;
                }
            }
            Err(_) => {
                debug!("adding remote {name} -> {url}");
                repository.remote(name, url)?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, dir, commit), level = "debug")]
    fn push(
        &self,
        dir: &Path,
        remote: &str,
        commit: &str,
        dest_branch: &str,
        force: bool,
    ) -> Result<()> {
        let refspec = format!("{commit}:refs/heads/{dest_branch}");
        if force {
            gitcall(dir, ["push", "--force", remote, refspec.as_str()])?;
        } else {
            gitcall(dir, ["push", remote, refspec.as_str()])?;
        }
        Ok(())
    }
}

/// Run the git binary inside a repository, capturing combined output.
fn gitcall(
    dir: &Path,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(VcsError::Syscall)?;

    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        return Err(VcsError::GitCall {
            output: format!("{stdout}{stderr}").trim_end().to_string(),
        });
    }

    Ok(stdout.trim_end().to_string())
}

/// Version-control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// The git binary could not be spawned.
    #[error("cannot run git binary")]
    Syscall(#[source] std::io::Error),

    /// The git binary ran but reported failure.
    #[error("git command failed:\n{output}")]
    GitCall { output: String },

    /// HEAD does not point at a branch.
    #[error("repository HEAD is detached")]
    DetachedHead,

    /// A bare repository has no working directory to deploy from.
    #[error("repository has no working directory")]
    BareRepository,

    /// Subtree split produced no commit.
    #[error("subtree split produced no commit for prefix {prefix:?}")]
    SubtreeSplit { prefix: String },
}

/// Friendly result alias.
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
