// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Backup planning, capture, and restore.
//!
//! Artifacts are xz-compressed on the server before transfer and land as
//! flat files in the backup directory:
//!
//! - `<app>-db.dump.xz` for the app's linked Postgres service.
//! - `<app>-storage-<index>.tar.xz` per eligible storage mount, where the
//!   index is the mount's position in the resolved mount list. Indices stay
//!   stable across runs as long as the configuration order does.
//! - `<service>.sql.xz` for every MySQL service on the host, captured
//!   globally rather than per app.
//!
//! Restore is the mirror image and tolerates partial archives: a mount with
//! no matching artifact is reported and skipped, never treated as fatal.

use crate::{
    deploy::ResolvedDeployment,
    remote::{DbService, DokkuHost, RemoteError},
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Mounts whose host path uses more than this are skipped by default.
pub const DEFAULT_SIZE_CEILING_MB: u64 = 100;

/// Conventional storage root for apps restored before any mount exists.
const STORAGE_ROOT: &str = "/var/lib/dokku/data/storage";

/// One storage mount's backup verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    /// Position in the resolved mount list. Stable artifact suffix.
    pub index: usize,

    /// Host side of the bind mount.
    pub host_path: String,

    pub eligible: bool,

    /// Why an ineligible mount was skipped.
    pub reason: Option<String>,
}

/// What a restore run actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Artifact file names applied to the server.
    pub restored: Vec<String>,

    /// Mount host paths with no matching restore artifact.
    pub missing: Vec<String>,
}

/// Decide which of a deployment's mounts get archived.
///
/// A mount is skipped when its configuration opts out of backups or when its
/// host path exceeds the size ceiling. Planning never mutates the server.
pub fn plan_mounts(
    deployment: &ResolvedDeployment,
    remote: &dyn DokkuHost,
    ceiling_mb: u64,
) -> Result<Vec<MountPlan>> {
    let mut plans = Vec::new();

    for (index, mount) in deployment.storage_mounts.iter().enumerate() {
        let host_path = mount.host_path().to_string();

        if !mount.backup() {
            plans.push(MountPlan {
                index,
                host_path,
                eligible: false,
                reason: Some("opted out of backups".to_string()),
            });
            continue;
        }

        let usage = remote.disk_usage_mb(&host_path)?;
        if usage > ceiling_mb {
            plans.push(MountPlan {
                index,
                host_path,
                eligible: false,
                reason: Some(format!("uses {usage} MB, over the {ceiling_mb} MB ceiling")),
            });
            continue;
        }

        plans.push(MountPlan {
            index,
            host_path,
            eligible: true,
            reason: None,
        });
    }

    Ok(plans)
}

/// Capture one deployment's database dump and eligible storage mounts.
///
/// Returns the artifact paths written. Skipped mounts are logged with their
/// reason so a quiet run still explains what it left behind.
#[instrument(skip(deployment, remote, backup_dir), fields(app = %deployment.app_name), level = "debug")]
pub fn backup_deployment(
    deployment: &ResolvedDeployment,
    remote: &dyn DokkuHost,
    backup_dir: &Path,
    ceiling_mb: u64,
) -> Result<Vec<PathBuf>> {
    mkdirp::mkdirp(backup_dir).map_err(|source| BackupError::Io {
        source,
        path: backup_dir.display().to_string(),
    })?;

    let mut artifacts = Vec::new();
    let app = &deployment.app_name;

    if deployment.postgres {
        let dump = remote.export_service(DbService::Postgres, &format!("{app}-db"))?;
        let path = backup_dir.join(db_artifact(app));
        write_artifact(&path, &dump)?;
        artifacts.push(path);
    }

    for plan in plan_mounts(deployment, remote, ceiling_mb)? {
        if !plan.eligible {
            let reason = plan.reason.as_deref().unwrap_or("ineligible");
            info!("skipping {}: {reason}", plan.host_path);
            continue;
        }

        let archive = remote.archive_dir(&plan.host_path)?;
        let path = backup_dir.join(storage_artifact(app, plan.index));
        write_artifact(&path, &archive)?;
        artifacts.push(path);
    }

    Ok(artifacts)
}

/// Capture every MySQL service on the host.
///
/// MySQL services are not declared per deployment, so they are backed up as
/// a host-wide sweep rather than from the working set.
pub fn backup_mysql_services(remote: &dyn DokkuHost, backup_dir: &Path) -> Result<Vec<PathBuf>> {
    mkdirp::mkdirp(backup_dir).map_err(|source| BackupError::Io {
        source,
        path: backup_dir.display().to_string(),
    })?;

    let mut artifacts = Vec::new();
    for service in remote.mysql_services()? {
        let dump = remote.export_service(DbService::Mysql, &service)?;
        let path = backup_dir.join(format!("{service}.sql.xz"));
        write_artifact(&path, &dump)?;
        artifacts.push(path);
    }

    Ok(artifacts)
}

/// Restore one deployment's artifacts from the backup directory.
///
/// Mounts are matched to indexed artifacts first; the first mount also
/// accepts the older unindexed `<app>-storage.tar.xz` name. A deployment
/// with a legacy artifact but no configured mounts restores into the
/// platform's conventional storage directory.
#[instrument(skip(deployment, remote, backup_dir), fields(app = %deployment.app_name), level = "debug")]
pub fn restore_deployment(
    deployment: &ResolvedDeployment,
    remote: &dyn DokkuHost,
    backup_dir: &Path,
) -> Result<RestoreOutcome> {
    let mut outcome = RestoreOutcome::default();
    let app = &deployment.app_name;

    if deployment.postgres {
        let path = backup_dir.join(db_artifact(app));
        match read_artifact(&path)? {
            Some(dump) => {
                remote.import_service(DbService::Postgres, &format!("{app}-db"), &dump)?;
                outcome.restored.push(db_artifact(app));
            }
            None => {
                warn!("no database artifact for {app}");
                outcome.missing.push(db_artifact(app));
            }
        }
    }

    for (index, mount) in deployment.storage_mounts.iter().enumerate() {
        let indexed = backup_dir.join(storage_artifact(app, index));
        let (name, archive) = match read_artifact(&indexed)? {
            Some(archive) => (storage_artifact(app, index), Some(archive)),
            None if index == 0 => {
                let legacy = backup_dir.join(legacy_storage_artifact(app));
                (legacy_storage_artifact(app), read_artifact(&legacy)?)
            }
            None => (storage_artifact(app, index), None),
        };

        match archive {
            Some(archive) => {
                remote.restore_dir(mount.host_path(), &archive)?;
                outcome.restored.push(name);
            }
            None => {
                warn!("no matching restore artifact for {}", mount.host_path());
                outcome.missing.push(mount.host_path().to_string());
            }
        }
    }

    // Apps predating mount configuration: unpack the legacy archive into
    // the conventional storage directory.
    if deployment.storage_mounts.is_empty() {
        let legacy = backup_dir.join(legacy_storage_artifact(app));
        if let Some(archive) = read_artifact(&legacy)? {
            let target = format!("{STORAGE_ROOT}/{app}");
            remote.restore_dir(&target, &archive)?;
            outcome.restored.push(legacy_storage_artifact(app));
        }
    }

    Ok(outcome)
}

/// Restore every MySQL dump found in the backup directory.
pub fn restore_mysql_services(remote: &dyn DokkuHost, backup_dir: &Path) -> Result<Vec<String>> {
    let pattern = backup_dir.join("*.sql.xz");
    let matches = glob::glob(&pattern.to_string_lossy())
        .map_err(|source| BackupError::Pattern { source })?;

    let mut restored = Vec::new();
    for entry in matches {
        let path = entry.map_err(|error| BackupError::Io {
            source: error.into(),
            path: backup_dir.display().to_string(),
        })?;

        let Some(service) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(".sql.xz"))
        else {
            continue;
        };

        let dump = std::fs::read(&path).map_err(|source| BackupError::Io {
            source,
            path: path.display().to_string(),
        })?;
        remote.import_service(DbService::Mysql, service, &dump)?;
        restored.push(service.to_string());
    }

    Ok(restored)
}

fn db_artifact(app: &str) -> String {
    format!("{app}-db.dump.xz")
}

fn storage_artifact(app: &str, index: usize) -> String {
    format!("{app}-storage-{index}.tar.xz")
}

fn legacy_storage_artifact(app: &str) -> String {
    format!("{app}-storage.tar.xz")
}

fn write_artifact(path: &Path, contents: &[u8]) -> Result<()> {
    info!("writing {}", path.display());
    std::fs::write(path, contents).map_err(|source| BackupError::Io {
        source,
        path: path.display().to_string(),
    })
}

fn read_artifact(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BackupError::Io {
            source,
            path: path.display().to_string(),
        }),
    }
}

/// Backup workflow error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Server-side capture or restore failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An artifact could not be read or written locally.
    #[error("cannot access backup artifact {path}")]
    Io {
        source: std::io::Error,
        path: String,
    },

    /// The artifact glob pattern is malformed.
    #[error("bad artifact pattern")]
    Pattern { source: glob::PatternError },
}

/// Friendly result alias.
pub type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentNode, ParentNode, StorageMount};
    use crate::remote::Result as RemoteResult;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, collections::BTreeMap};

    /// Canned server for backup tests. Records capture and restore calls.
    #[derive(Default)]
    struct StubHost {
        usage: BTreeMap<String, u64>,
        mysql: Vec<String>,
        restores: RefCell<Vec<(String, Vec<u8>)>>,
        imports: RefCell<Vec<(String, Vec<u8>)>>,
    }

    impl DokkuHost for StubHost {
        fn check_connectivity(&self) -> RemoteResult<()> {
            Ok(())
        }
        fn list_apps(&self) -> RemoteResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn app_exists(&self, _: &str) -> RemoteResult<bool> {
            unimplemented!()
        }
        fn create_app(&self, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn installed_plugins(&self) -> RemoteResult<Vec<String>> {
            unimplemented!()
        }
        fn install_plugin(&self, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn builder_report(&self, _: &str) -> RemoteResult<Option<String>> {
            unimplemented!()
        }
        fn set_builder(&self, _: &str, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn service_exists(&self, _: DbService, _: &str) -> RemoteResult<bool> {
            unimplemented!()
        }
        fn create_service(&self, _: DbService, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn service_linked(&self, _: DbService, _: &str, _: &str) -> RemoteResult<bool> {
            unimplemented!()
        }
        fn link_service(&self, _: DbService, _: &str, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn service_dsn(&self, _: DbService, _: &str) -> RemoteResult<String> {
            unimplemented!()
        }
        fn mysql_services(&self) -> RemoteResult<Vec<String>> {
            Ok(self.mysql.clone())
        }
        fn domains_report(&self, _: &str) -> RemoteResult<Vec<String>> {
            unimplemented!()
        }
        fn add_domain(&self, _: &str, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn cert_active(&self, _: &str) -> RemoteResult<bool> {
            unimplemented!()
        }
        fn install_cert(&self, _: &str, _: &Path, _: &Path) -> RemoteResult<()> {
            unimplemented!()
        }
        fn config_map(&self, _: &str) -> RemoteResult<BTreeMap<String, String>> {
            unimplemented!()
        }
        fn config_set(&self, _: &str, _: &[(String, String)], _: bool) -> RemoteResult<()> {
            unimplemented!()
        }
        fn storage_list(&self, _: &str) -> RemoteResult<Vec<String>> {
            unimplemented!()
        }
        fn mount_storage(&self, _: &str, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn ports_report(&self, _: &str) -> RemoteResult<Vec<String>> {
            unimplemented!()
        }
        fn set_ports(&self, _: &str, _: &[String]) -> RemoteResult<()> {
            unimplemented!()
        }
        fn docker_options_report(&self, _: &str, _: &str) -> RemoteResult<Vec<String>> {
            unimplemented!()
        }
        fn add_docker_option(&self, _: &str, _: &str, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn remove_docker_option(&self, _: &str, _: &str, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn letsencrypt_active(&self, _: &str) -> RemoteResult<bool> {
            unimplemented!()
        }
        fn enable_letsencrypt(&self, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }
        fn letsencrypt_cron_active(&self) -> RemoteResult<bool> {
            unimplemented!()
        }
        fn add_letsencrypt_cron(&self) -> RemoteResult<()> {
            unimplemented!()
        }
        fn deployed_commit(&self, _: &str) -> RemoteResult<Option<String>> {
            unimplemented!()
        }
        fn deploy_branch(&self, _: &str) -> RemoteResult<Option<String>> {
            unimplemented!()
        }
        fn restart(&self, _: &str) -> RemoteResult<()> {
            unimplemented!()
        }

        fn disk_usage_mb(&self, path: &str) -> RemoteResult<u64> {
            Ok(self.usage.get(path).copied().unwrap_or(1))
        }

        fn archive_dir(&self, path: &str) -> RemoteResult<Vec<u8>> {
            Ok(format!("tar:{path}").into_bytes())
        }

        fn restore_dir(&self, path: &str, archive: &[u8]) -> RemoteResult<()> {
            self.restores
                .borrow_mut()
                .push((path.to_string(), archive.to_vec()));
            Ok(())
        }

        fn export_service(&self, _: DbService, name: &str) -> RemoteResult<Vec<u8>> {
            Ok(format!("dump:{name}").into_bytes())
        }

        fn import_service(&self, _: DbService, name: &str, dump: &[u8]) -> RemoteResult<()> {
            self.imports
                .borrow_mut()
                .push((name.to_string(), dump.to_vec()));
            Ok(())
        }
    }

    fn deployment(mounts: Vec<StorageMount>, postgres: bool) -> ResolvedDeployment {
        let parent = ParentNode {
            storage_mounts: mounts,
            postgres: Some(crate::config::Toggle(postgres)),
            ..ParentNode::default()
        };
        ResolvedDeployment::merge(&parent, "api.example.com", &DeploymentNode::default())
    }

    #[test]
    fn opted_out_mounts_are_ineligible_with_reason() {
        let host = StubHost::default();
        let dep = deployment(
            vec![
                StorageMount::Plain("/var/a:/app/a".into()),
                StorageMount::Annotated {
                    mount: "/var/b:/app/b".into(),
                    backup: false,
                },
            ],
            false,
        );

        let plans = plan_mounts(&dep, &host, DEFAULT_SIZE_CEILING_MB).unwrap();
        assert!(plans[0].eligible);
        assert!(!plans[1].eligible);
        assert_eq!(plans[1].reason.as_deref(), Some("opted out of backups"));
    }

    #[test]
    fn oversized_mounts_are_skipped_but_keep_their_index() {
        let host = StubHost {
            usage: BTreeMap::from([("/var/big".to_string(), 5000)]),
            ..StubHost::default()
        };
        let dep = deployment(
            vec![
                StorageMount::Plain("/var/big:/app/big".into()),
                StorageMount::Plain("/var/small:/app/small".into()),
            ],
            false,
        );

        let plans = plan_mounts(&dep, &host, 100).unwrap();
        assert!(!plans[0].eligible);
        assert!(plans[1].eligible);
        assert_eq!(plans[1].index, 1);
    }

    #[test]
    fn backup_writes_indexed_artifacts_and_db_dump() {
        let host = StubHost::default();
        let dir = tempfile::tempdir().unwrap();
        let dep = deployment(vec![StorageMount::Plain("/var/a:/app/a".into())], true);

        let artifacts =
            backup_deployment(&dep, &host, dir.path(), DEFAULT_SIZE_CEILING_MB).unwrap();
        let names: Vec<&str> = artifacts
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(
            names,
            ["api-example-com-db.dump.xz", "api-example-com-storage-0.tar.xz"]
        );
        assert_eq!(
            std::fs::read(&artifacts[1]).unwrap(),
            b"tar:/var/a".to_vec()
        );
    }

    #[test]
    fn restore_reports_missing_artifacts_without_failing() {
        let host = StubHost::default();
        let dir = tempfile::tempdir().unwrap();
        let dep = deployment(vec![StorageMount::Plain("/var/a:/app/a".into())], false);

        let outcome = restore_deployment(&dep, &host, dir.path()).unwrap();
        assert!(outcome.restored.is_empty());
        assert_eq!(outcome.missing, vec!["/var/a".to_string()]);
        assert!(host.restores.borrow().is_empty());
    }

    #[test]
    fn first_mount_accepts_legacy_artifact_name() {
        let host = StubHost::default();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api-example-com-storage.tar.xz"), b"old").unwrap();
        let dep = deployment(vec![StorageMount::Plain("/var/a:/app/a".into())], false);

        let outcome = restore_deployment(&dep, &host, dir.path()).unwrap();
        assert_eq!(outcome.restored, vec!["api-example-com-storage.tar.xz"]);
        assert_eq!(
            host.restores.borrow().as_slice(),
            [("/var/a".to_string(), b"old".to_vec())]
        );
    }

    #[test]
    fn legacy_artifact_without_mounts_goes_to_conventional_dir() {
        let host = StubHost::default();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api-example-com-storage.tar.xz"), b"old").unwrap();
        let dep = deployment(Vec::new(), false);

        let outcome = restore_deployment(&dep, &host, dir.path()).unwrap();
        assert_eq!(outcome.restored, vec!["api-example-com-storage.tar.xz"]);
        assert_eq!(
            host.restores.borrow()[0].0,
            "/var/lib/dokku/data/storage/api-example-com"
        );
    }

    #[test]
    fn mysql_sweep_round_trips_through_artifact_names() {
        let host = StubHost {
            mysql: vec!["wiki-db".to_string()],
            ..StubHost::default()
        };
        let dir = tempfile::tempdir().unwrap();

        let written = backup_mysql_services(&host, dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("wiki-db.sql.xz"));

        let restored = restore_mysql_services(&host, dir.path()).unwrap();
        assert_eq!(restored, vec!["wiki-db".to_string()]);
        assert_eq!(host.imports.borrow()[0].1, b"dump:wiki-db".to_vec());
    }
}
