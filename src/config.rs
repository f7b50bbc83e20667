// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Configuration document layout.
//!
//! Specify the layout of the hierarchical JSON document that drives a dokkup
//! run. File I/O is left to the caller to figure out.
//!
//! # General Layout
//!
//! The document is a flat JSON object. Two scalar keys, `ssh_host` and
//! `ssh_alias`, identify the target host; every other top-level key names a
//! __parent node__: a group of settings shared by one or more deployments.
//! Each parent node carries a `deployments` mapping from domain name to a
//! __deployment node__ holding per-domain overrides. Parent nodes without any
//! deployments are ignored by the loader.
//!
//! Document order is significant: deployments are processed in the order they
//! appear, so both the parent mapping and each `deployments` mapping preserve
//! insertion order instead of being resorted.
//!
//! # Normalization
//!
//! Upstream documents mix native booleans with the literal strings `"true"`
//! and `"false"`. The [`Toggle`] type absorbs both forms at the serde
//! boundary so the rest of the crate only ever sees `bool`.

use serde::{
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use tracing::debug;

/// Root of the deployment configuration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    /// Host name or address of the Dokku server.
    pub ssh_host: String,

    /// SSH alias used on the command line. Defaults to `ssh_host`.
    pub ssh_alias: String,

    /// Parent nodes keyed by their arbitrary group name, in document order.
    pub apps: Vec<(String, ParentNode)>,
}

impl ConfigDocument {
    /// Look up a parent node by group name.
    pub fn parent(&self, name: &str) -> Option<&ParentNode> {
        self.apps
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, node)| node)
    }
}

impl FromStr for ConfigDocument {
    type Err = ConfigError;

    /// Parse a document, dropping parent nodes that declare no deployments.
    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut document: ConfigDocument =
            serde_json::from_str(data).map_err(ConfigError::Deserialize)?;

        document.apps.retain(|(name, parent)| {
            if parent.deployments.is_empty() {
                debug!("parent node {name:?} declares no deployments, ignoring");
                false
            } else {
                true
            }
        });

        Ok(document)
    }
}

impl Display for ConfigDocument {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        fmt.write_str(rendered.as_str())
    }
}

impl<'de> Deserialize<'de> for ConfigDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = ConfigDocument;

            fn expecting(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
                fmt.write_str("a flat deployment configuration object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut ssh_host: Option<String> = None;
                let mut ssh_alias: Option<String> = None;
                let mut apps = Vec::new();

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "ssh_host" => ssh_host = Some(map.next_value()?),
                        "ssh_alias" => ssh_alias = Some(map.next_value()?),
                        _ => apps.push((key, map.next_value()?)),
                    }
                }

                let ssh_host = ssh_host.ok_or_else(|| de::Error::missing_field("ssh_host"))?;

                // INVARIANT: ssh_alias falls back to ssh_host when absent.
                let ssh_alias = ssh_alias.unwrap_or_else(|| ssh_host.clone());

                Ok(ConfigDocument {
                    ssh_host,
                    ssh_alias,
                    apps,
                })
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

impl Serialize for ConfigDocument {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.apps.len() + 2))?;
        map.serialize_entry("ssh_host", &self.ssh_host)?;
        map.serialize_entry("ssh_alias", &self.ssh_alias)?;
        for (name, parent) in &self.apps {
            map.serialize_entry(name, parent)?;
        }
        map.end()
    }
}

/// Settings shared by a group of deployments.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParentNode {
    /// Directory holding the app's source, relative to the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<String>,

    /// Branch to deploy. Absent means auto-detect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Provision and link a Postgres database for each deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<Toggle>,

    /// Request a Let's Encrypt certificate for each deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub letsencrypt: Option<Toggle>,

    /// Runtime environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,

    /// Build-time docker arguments.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    /// Persistent storage bind declarations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub storage_mounts: Vec<StorageMount>,

    /// Port mappings in `scheme:host:container` form.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    /// Raw docker options passed through to the platform.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_options: Vec<String>,

    /// Additional domains beyond the deployment's own.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_domains: Vec<String>,

    /// Platform plugins required by the app.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,

    /// Builder type override (for example "dockerfile").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,

    /// Concrete deployments sharing this node's settings, in document order.
    #[serde(skip_serializing_if = "DeploymentMap::is_empty")]
    pub deployments: DeploymentMap,
}

/// Per-domain overrides of a parent node's settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<Toggle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub letsencrypt: Option<Toggle>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub storage_mounts: Vec<StorageMount>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_options: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_domains: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,

    /// Tags used for selection filtering. Never inherited from the parent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Ordered mapping of domain name to deployment node.
///
/// JSON object order is preserved so deployments are processed exactly as
/// written in the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentMap(Vec<(String, DeploymentNode)>);

impl DeploymentMap {
    pub fn new(entries: Vec<(String, DeploymentNode)>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeploymentNode)> {
        self.0.iter().map(|(domain, node)| (domain, node))
    }

    pub fn get(&self, domain: &str) -> Option<&DeploymentNode> {
        self.0
            .iter()
            .find(|(key, _)| key == domain)
            .map(|(_, node)| node)
    }

    pub fn insert(&mut self, domain: impl Into<String>, node: DeploymentNode) {
        self.0.push((domain.into(), node));
    }
}

impl<'de> Deserialize<'de> for DeploymentMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MapOrderVisitor;

        impl<'de> Visitor<'de> for MapOrderVisitor {
            type Value = DeploymentMap;

            fn expecting(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
                fmt.write_str("a mapping of domain name to deployment settings")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((domain, node)) = map.next_entry()? {
                    entries.push((domain, node));
                }
                Ok(DeploymentMap(entries))
            }
        }

        deserializer.deserialize_map(MapOrderVisitor)
    }
}

impl Serialize for DeploymentMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (domain, node) in &self.0 {
            map.serialize_entry(domain, node)?;
        }
        map.end()
    }
}

/// Boolean flag accepting native booleans and the strings `"true"`/`"false"`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Toggle(pub bool);

impl Toggle {
    pub fn as_bool(self) -> bool {
        self.0
    }
}

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(value) => Ok(Toggle(value)),
            Raw::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Toggle(true)),
                "false" => Ok(Toggle(false)),
                other => Err(de::Error::custom(format!(
                    "expected \"true\" or \"false\", got {other:?}"
                ))),
            },
        }
    }
}

impl Serialize for Toggle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bool(self.0)
    }
}

/// Storage bind declaration in either plain or annotated form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StorageMount {
    /// Plain `"host:container"` string.
    Plain(String),

    /// Annotated form carrying backup eligibility.
    Annotated {
        mount: String,
        #[serde(default = "default_backup")]
        backup: bool,
    },
}

fn default_backup() -> bool {
    true
}

impl StorageMount {
    /// The `host:container` bind string, regardless of form.
    pub fn spec(&self) -> &str {
        match self {
            Self::Plain(mount) => mount,
            Self::Annotated { mount, .. } => mount,
        }
    }

    /// Host-side path of the bind.
    pub fn host_path(&self) -> &str {
        self.spec().split(':').next().unwrap_or_default()
    }

    /// Whether this mount participates in backups. Defaults to true.
    pub fn backup(&self) -> bool {
        match self {
            Self::Plain(_) => true,
            Self::Annotated { backup, .. } => *backup,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration document.
    #[error(transparent)]
    Deserialize(serde_json::Error),

    /// Failed to serialize configuration document.
    #[error(transparent)]
    Serialize(serde_json::Error),
}

/// Friendly result alias.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn sample() -> &'static str {
        indoc! {r#"
            {
              "ssh_host": "paas.example.com",
              "api": {
                "source_dir": "api",
                "postgres": "true",
                "letsencrypt": false,
                "env_vars": { "RAILS_ENV": "production" },
                "storage_mounts": [
                  "/var/data/api:/app/data",
                  { "mount": "/var/cache/api:/app/cache", "backup": false }
                ],
                "deployments": {
                  "api.example.com": { "tags": ["production"] },
                  "staging.api.example.com": { "branch": "dev", "tags": ["staging"] }
                }
              },
              "scratch": {
                "source_dir": "scratch"
              }
            }
        "#}
    }

    #[test]
    fn parses_flat_document_and_defaults_ssh_alias() {
        let document: ConfigDocument = sample().parse().unwrap();
        assert_eq!(document.ssh_host, "paas.example.com");
        assert_eq!(document.ssh_alias, "paas.example.com");
    }

    #[test]
    fn drops_parent_nodes_without_deployments() {
        let document: ConfigDocument = sample().parse().unwrap();
        assert_eq!(document.apps.len(), 1);
        assert!(document.parent("scratch").is_none());
    }

    #[test]
    fn normalizes_string_typed_booleans() {
        let document: ConfigDocument = sample().parse().unwrap();
        let api = document.parent("api").unwrap();
        assert_eq!(api.postgres, Some(Toggle(true)));
        assert_eq!(api.letsencrypt, Some(Toggle(false)));
    }

    #[test]
    fn rejects_unrecognized_boolean_strings() {
        let result: std::result::Result<ConfigDocument, _> = indoc! {r#"
            {
              "ssh_host": "h",
              "api": {
                "postgres": "yes",
                "deployments": { "api.example.com": {} }
              }
            }
        "#}
        .parse();
        assert!(result.is_err());
    }

    #[test]
    fn accepts_both_storage_mount_forms() {
        let document: ConfigDocument = sample().parse().unwrap();
        let api = document.parent("api").unwrap();
        assert_eq!(api.storage_mounts[0].spec(), "/var/data/api:/app/data");
        assert!(api.storage_mounts[0].backup());
        assert_eq!(api.storage_mounts[1].spec(), "/var/cache/api:/app/cache");
        assert!(!api.storage_mounts[1].backup());
        assert_eq!(api.storage_mounts[0].host_path(), "/var/data/api");
    }

    #[test]
    fn preserves_deployment_order() {
        let document: ConfigDocument = sample().parse().unwrap();
        let api = document.parent("api").unwrap();
        let domains: Vec<&String> = api.deployments.iter().map(|(domain, _)| domain).collect();
        assert_eq!(domains, ["api.example.com", "staging.api.example.com"]);
    }

    #[test]
    fn explicit_ssh_alias_wins() {
        let document: ConfigDocument = indoc! {r#"
            { "ssh_host": "10.0.0.1", "ssh_alias": "paas" }
        "#}
        .parse()
        .unwrap();
        assert_eq!(document.ssh_alias, "paas");
    }

    #[test]
    fn round_trips_through_display() {
        let document: ConfigDocument = sample().parse().unwrap();
        let reparsed: ConfigDocument = document.to_string().parse().unwrap();
        assert_eq!(document, reparsed);
    }

    #[test]
    fn missing_ssh_host_is_a_structural_error() {
        let result: std::result::Result<ConfigDocument, _> = "{}".parse();
        assert!(result.is_err());
    }
}
