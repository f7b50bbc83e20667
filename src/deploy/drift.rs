// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Drift detection against live server state.
//!
//! The comparator never parses server output itself. The `import` workflow
//! introspects the host and synthesizes a document in the same JSON schema
//! as the local configuration; both sides then run through the same merge
//! engine, so the comparison is between two [`ResolvedDeployment`] values,
//! not two shapes.
//!
//! # Normalization
//!
//! Three fields need massaging before an honest comparison:
//!
//! - A ports list consisting solely of the platform's implicit default
//!   (`http:80:5000`) is indistinguishable from "unset" and treated as
//!   empty. Any explicitly declared mapping, even on port 80, is compared
//!   verbatim.
//! - Storage mounts reduce to their bind strings and compare as sets.
//! - Extra domains compare under wildcard coverage: a local `*.example.com`
//!   covers any remote domain ending in `.example.com`. Coverage is
//!   deliberately asymmetric; local patterns may cover domains the server
//!   has not seen yet without counting as drift.

use crate::{
    config::{ConfigDocument, ConfigError, DeploymentNode, ParentNode, StorageMount, Toggle},
    deploy::ResolvedDeployment,
    remote::{DbService, DokkuHost, RemoteError},
};

use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, path::PathBuf};
use tracing::{debug, info, warn};

/// Ports entry the platform materializes on its own for web apps.
const IMPLICIT_DEFAULT_PORT: &str = "http:80:5000";

/// Cached snapshots older than this get a staleness warning.
const SNAPSHOT_MAX_AGE_HOURS: i64 = 24;

/// Comparison result for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftStatus {
    /// All compared fields agree.
    InSync,

    /// The app is absent from the remote index entirely.
    Missing,

    /// One or more fields disagree.
    Drift(Vec<FieldDrift>),
}

/// A single field-level mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
    pub field: &'static str,
    pub local: String,
    pub remote: String,
}

/// Aggregated result of a sync check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Per-deployment status, in working-set order.
    pub entries: Vec<(String, DriftStatus)>,

    /// Remote apps present on the server but absent from the local
    /// selection. Informational, never a failure by itself.
    pub unmanaged: Vec<String>,
}

impl SyncReport {
    /// Overall verdict: AND across all compared deployments.
    pub fn in_sync(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, status)| *status == DriftStatus::InSync)
    }
}

/// Compare one resolved local deployment against its remote snapshot.
pub fn compare(local: &ResolvedDeployment, remote: Option<&ResolvedDeployment>) -> DriftStatus {
    let Some(remote) = remote else {
        return DriftStatus::Missing;
    };

    let mut drifts = Vec::new();

    // Auto-detected branches are defined to never drift.
    if let Some(local_branch) = &local.branch {
        let remote_branch = remote.branch.clone().unwrap_or_default();
        if *local_branch != remote_branch {
            drifts.push(FieldDrift {
                field: "branch",
                local: local_branch.clone(),
                remote: remote_branch,
            });
        }
    }

    push_bool_drift(&mut drifts, "postgres", local.postgres, remote.postgres);
    push_bool_drift(
        &mut drifts,
        "letsencrypt",
        local.letsencrypt,
        remote.letsencrypt,
    );

    let local_ports = normalize_ports(&local.ports);
    let remote_ports = normalize_ports(&remote.ports);
    if local_ports != remote_ports {
        drifts.push(FieldDrift {
            field: "ports",
            local: local_ports.join(" "),
            remote: remote_ports.join(" "),
        });
    }

    let local_mounts = normalize_mounts(&local.storage_mounts);
    let remote_mounts = normalize_mounts(&remote.storage_mounts);
    if local_mounts != remote_mounts {
        drifts.push(FieldDrift {
            field: "storage_mounts",
            local: local_mounts.join(" "),
            remote: remote_mounts.join(" "),
        });
    }

    let local_options = sorted(&local.docker_options);
    let remote_options = sorted(&remote.docker_options);
    if local_options != remote_options {
        drifts.push(FieldDrift {
            field: "docker_options",
            local: local_options.join(" "),
            remote: remote_options.join(" "),
        });
    }

    let uncovered: Vec<&String> = remote
        .extra_domains
        .iter()
        .filter(|domain| !covered_by_patterns(&local.extra_domains, domain))
        .collect();
    if !uncovered.is_empty() {
        drifts.push(FieldDrift {
            field: "extra_domains",
            local: local.extra_domains.join(" "),
            remote: remote.extra_domains.join(" "),
        });
    }

    if drifts.is_empty() {
        DriftStatus::InSync
    } else {
        DriftStatus::Drift(drifts)
    }
}

/// Compare a whole working set against the remote snapshot's index.
///
/// The index is keyed by app name; deployments missing from it report
/// [`DriftStatus::Missing`] and skip field comparison. Remote apps with no
/// local counterpart land in [`SyncReport::unmanaged`].
pub fn compare_all(
    locals: &[ResolvedDeployment],
    snapshot: &[ResolvedDeployment],
) -> SyncReport {
    let index: BTreeMap<&str, &ResolvedDeployment> = snapshot
        .iter()
        .map(|remote| (remote.app_name.as_str(), remote))
        .collect();

    let entries = locals
        .iter()
        .map(|local| {
            let status = compare(local, index.get(local.app_name.as_str()).copied());
            (local.domain.clone(), status)
        })
        .collect();

    let unmanaged = snapshot
        .iter()
        .filter(|remote| {
            !locals
                .iter()
                .any(|local| local.app_name == remote.app_name)
        })
        .map(|remote| remote.app_name.clone())
        .collect();

    SyncReport { entries, unmanaged }
}

fn push_bool_drift(drifts: &mut Vec<FieldDrift>, field: &'static str, local: bool, remote: bool) {
    if local != remote {
        drifts.push(FieldDrift {
            field,
            local: local.to_string(),
            remote: remote.to_string(),
        });
    }
}

/// Swallow the platform's implicit default mapping, sort the rest.
fn normalize_ports(ports: &[String]) -> Vec<String> {
    if ports.len() == 1 && ports[0] == IMPLICIT_DEFAULT_PORT {
        return Vec::new();
    }
    sorted(ports)
}

fn normalize_mounts(mounts: &[StorageMount]) -> Vec<String> {
    let mut specs: Vec<String> = mounts
        .iter()
        .map(|mount| mount.spec().to_string())
        .collect();
    specs.sort();
    specs
}

fn sorted(values: &[String]) -> Vec<String> {
    let mut copy = values.to_vec();
    copy.sort();
    copy
}

/// Whether any local pattern covers a remote-observed domain.
fn covered_by_patterns(patterns: &[String], domain: &str) -> bool {
    patterns.iter().any(|pattern| {
        match pattern.strip_prefix("*") {
            // `*.example.com` covers anything ending in `.example.com`.
            Some(suffix) => domain.ends_with(suffix),
            None => pattern == domain,
        }
    })
}

/// Introspect the live host and synthesize a document in the local schema.
///
/// One parent node per app, holding the observed settings, with a single
/// deployment keyed by the app's primary vhost. Feeding this document back
/// through the merge engine yields the `remoteSnapshot` side of [`compare`].
pub fn import_snapshot(
    remote: &dyn DokkuHost,
    ssh_host: &str,
    ssh_alias: &str,
) -> Result<ConfigDocument> {
    let mut document = ConfigDocument {
        ssh_host: ssh_host.to_string(),
        ssh_alias: ssh_alias.to_string(),
        apps: Vec::new(),
    };

    for app in remote.list_apps()? {
        debug!("introspecting app {app}");
        let vhosts = remote.domains_report(&app)?;
        let primary = vhosts.first().cloned().unwrap_or_else(|| app.clone());
        let extra_domains = vhosts.iter().skip(1).cloned().collect();

        let db_name = format!("{app}-db");
        let postgres = remote.service_exists(DbService::Postgres, &db_name)?
            && remote.service_linked(DbService::Postgres, &db_name, &app)?;

        // Platform bookkeeping variables would never appear in a local
        // document, so they stay out of the snapshot too.
        let env_vars = remote
            .config_map(&app)?
            .into_iter()
            .filter(|(key, _)| !key.starts_with("DOKKU_") && key != "GIT_REV")
            .collect();

        let mut parent = ParentNode {
            branch: remote.deploy_branch(&app)?,
            env_vars,
            postgres: Some(Toggle(postgres)),
            letsencrypt: Some(Toggle(remote.letsencrypt_active(&app)?)),
            storage_mounts: remote
                .storage_list(&app)?
                .into_iter()
                .map(StorageMount::Plain)
                .collect(),
            ports: remote.ports_report(&app)?,
            docker_options: remote.docker_options_report(&app, "deploy")?,
            extra_domains,
            ..ParentNode::default()
        };
        parent.deployments.insert(primary, DeploymentNode::default());

        document.apps.push((app, parent));
    }

    Ok(document)
}

/// On-disk snapshot of previously imported remote state.
#[derive(Debug, Clone)]
pub struct SyncCache {
    dir: PathBuf,
}

impl SyncCache {
    const SNAPSHOT_FILE: &'static str = "remote.json";
    const STAMP_FILE: &'static str = "imported_at";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist a snapshot with a fresh timestamp.
    pub fn store(&self, document: &ConfigDocument) -> Result<()> {
        mkdirp::mkdirp(&self.dir).map_err(|source| DriftError::Cache {
            source,
            path: self.dir.display().to_string(),
        })?;

        self.write(Self::SNAPSHOT_FILE, &document.to_string())?;
        self.write(Self::STAMP_FILE, &Utc::now().to_rfc3339())?;
        info!("snapshot stored in {}", self.dir.display());
        Ok(())
    }

    /// Load the stored snapshot, if any, warning when it has gone stale.
    pub fn load(&self) -> Result<Option<ConfigDocument>> {
        let snapshot_path = self.dir.join(Self::SNAPSHOT_FILE);
        let raw = match std::fs::read_to_string(&snapshot_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(DriftError::Cache {
                    source,
                    path: snapshot_path.display().to_string(),
                })
            }
        };

        if let Some(imported_at) = self.imported_at() {
            let age = Utc::now().signed_duration_since(imported_at);
            if age.num_hours() >= SNAPSHOT_MAX_AGE_HOURS {
                warn!(
                    "snapshot is {} hours old, consider re-importing",
                    age.num_hours()
                );
            }
        }

        Ok(Some(raw.parse()?))
    }

    fn imported_at(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(self.dir.join(Self::STAMP_FILE)).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|stamp| stamp.with_timezone(&Utc))
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        std::fs::write(self.dir.join(name), contents).map_err(|source| DriftError::Cache {
            source,
            path: self.dir.join(name).display().to_string(),
        })
    }
}

/// Drift workflow error types.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    /// Remote introspection failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A synthesized or cached document failed to parse.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The sync cache could not be read or written.
    #[error("sync cache access failed at {path}")]
    Cache {
        source: std::io::Error,
        path: String,
    },
}

/// Friendly result alias.
pub type Result<T, E = DriftError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentNode, ParentNode};
    use pretty_assertions::assert_eq;

    fn deployment(domain: &str) -> ResolvedDeployment {
        ResolvedDeployment::merge(&ParentNode::default(), domain, &DeploymentNode::default())
    }

    #[test]
    fn implicit_default_port_equals_unset() {
        let local = deployment("api.example.com");
        let mut remote = deployment("api.example.com");
        remote.ports = vec![IMPLICIT_DEFAULT_PORT.to_string()];
        assert_eq!(compare(&local, Some(&remote)), DriftStatus::InSync);
    }

    #[test]
    fn explicit_port_on_80_is_not_swallowed() {
        let mut local = deployment("api.example.com");
        local.ports = vec!["http:80:9000".to_string()];
        let mut remote = deployment("api.example.com");
        remote.ports = vec!["http:80:9000".to_string()];
        assert_eq!(compare(&local, Some(&remote)), DriftStatus::InSync);

        remote.ports = vec!["http:80:5000".to_string()];
        let status = compare(&local, Some(&remote));
        let DriftStatus::Drift(drifts) = status else {
            panic!("expected drift, got {status:?}");
        };
        assert_eq!(drifts[0].field, "ports");
    }

    #[test]
    fn wildcard_pattern_covers_remote_domains() {
        let mut local = deployment("api.example.com");
        local.extra_domains = vec!["*.example.com".to_string()];
        let mut remote = deployment("api.example.com");
        remote.extra_domains = vec![
            "a.example.com".to_string(),
            "b.example.com".to_string(),
        ];
        assert_eq!(compare(&local, Some(&remote)), DriftStatus::InSync);
    }

    #[test]
    fn uncovered_remote_domain_is_drift() {
        let mut local = deployment("api.example.com");
        local.extra_domains = vec!["*.example.com".to_string()];
        let mut remote = deployment("api.example.com");
        remote.extra_domains = vec!["a.other.com".to_string()];
        let DriftStatus::Drift(drifts) = compare(&local, Some(&remote)) else {
            panic!("expected drift");
        };
        assert_eq!(drifts[0].field, "extra_domains");
    }

    #[test]
    fn local_only_patterns_are_not_drift() {
        let mut local = deployment("api.example.com");
        local.extra_domains = vec!["*.example.com".to_string(), "cdn.example.net".to_string()];
        let remote = deployment("api.example.com");
        assert_eq!(compare(&local, Some(&remote)), DriftStatus::InSync);
    }

    #[test]
    fn unset_local_branch_never_drifts() {
        let local = deployment("api.example.com");
        let mut remote = deployment("api.example.com");
        remote.branch = Some("master".to_string());
        assert_eq!(compare(&local, Some(&remote)), DriftStatus::InSync);
    }

    #[test]
    fn set_local_branch_compares() {
        let mut local = deployment("api.example.com");
        local.branch = Some("main".to_string());
        let mut remote = deployment("api.example.com");
        remote.branch = Some("master".to_string());
        let DriftStatus::Drift(drifts) = compare(&local, Some(&remote)) else {
            panic!("expected drift");
        };
        assert_eq!(drifts[0].field, "branch");
    }

    #[test]
    fn storage_mounts_compare_order_independently() {
        let mut local = deployment("api.example.com");
        local.storage_mounts = vec![
            StorageMount::Plain("/a:/a".to_string()),
            StorageMount::Annotated {
                mount: "/b:/b".to_string(),
                backup: false,
            },
        ];
        let mut remote = deployment("api.example.com");
        remote.storage_mounts = vec![
            StorageMount::Plain("/b:/b".to_string()),
            StorageMount::Plain("/a:/a".to_string()),
        ];
        assert_eq!(compare(&local, Some(&remote)), DriftStatus::InSync);
    }

    #[test]
    fn missing_app_short_circuits() {
        let local = deployment("api.example.com");
        assert_eq!(compare(&local, None), DriftStatus::Missing);
    }

    #[test]
    fn overall_verdict_is_and_across_deployments() {
        let synced = deployment("a.example.com");
        let missing = deployment("b.example.com");
        let snapshot = vec![deployment("a.example.com"), deployment("c.example.com")];

        let report = compare_all(&[synced, missing], &snapshot);
        assert!(!report.in_sync());
        assert_eq!(report.entries[0].1, DriftStatus::InSync);
        assert_eq!(report.entries[1].1, DriftStatus::Missing);
        assert_eq!(report.unmanaged, vec!["c-example-com".to_string()]);
    }

    #[test]
    fn cache_round_trips_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SyncCache::new(dir.path().join("cache"));

        let document: ConfigDocument = r#"
            { "ssh_host": "h", "api": { "deployments": { "api.example.com": {} } } }
        "#
        .parse()
        .unwrap();

        cache.store(&document).unwrap();
        let loaded = cache.load().unwrap().unwrap();
        assert_eq!(document, loaded);
    }

    #[test]
    fn empty_cache_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SyncCache::new(dir.path());
        assert!(cache.load().unwrap().is_none());
    }
}
