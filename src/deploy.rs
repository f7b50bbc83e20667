// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Deployment resolution and planning.
//!
//! A __deployment__ is one domain-addressable target on the Dokku host. Its
//! effective settings come from merging its parent node's shared settings
//! with its own overrides. The merge produces a [`ResolvedDeployment`]: an
//! immutable, inheritance-free view that every downstream component (filter,
//! decision engine, plan executor, drift comparator, backup planner) works
//! from without ever looking back at the raw document.
//!
//! # Merge Rules
//!
//! Field resolution is deliberately uneven because the fields mean different
//! things:
//!
//! - Scalars (`source_dir`, `branch`, `postgres`, `letsencrypt`, `builder`)
//!   take the child value when present and non-empty, else the parent value,
//!   else a documented default.
//! - Maps (`env_vars`, `build_args`) are a right-biased union: the parent map
//!   with the child's entries applied on top.
//! - Lists (`storage_mounts`, `docker_options`, `extra_domains`, `plugins`)
//!   concatenate child items before parent items, duplicates preserved.
//! - `ports` is the one list that overrides instead of concatenating: a child
//!   that declares any ports discards the parent's entirely.
//! - `tags` come from the child only; they never inherit.

pub mod backup;
pub mod decision;
pub mod drift;
pub mod plan;
pub mod secrets;
pub mod select;

use crate::config::{ConfigDocument, DeploymentNode, ParentNode, StorageMount, Toggle};

use std::collections::BTreeMap;

/// Fully merged, inheritance-free view of one deployment.
///
/// Immutable once built: every field is resolved, no further lookups against
/// the parent node are needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDeployment {
    /// Unique key, typically a DNS name.
    pub domain: String,

    /// Remote resource identifier: the domain with `.` replaced by `-`.
    pub app_name: String,

    /// Source directory relative to the document, `.` when unset everywhere.
    pub source_dir: String,

    /// Branch to deploy, or `None` for auto-detection.
    pub branch: Option<String>,

    /// Selection tags, child only.
    pub tags: Vec<String>,

    pub postgres: bool,
    pub letsencrypt: bool,

    /// Builder type override, if any.
    pub builder: Option<String>,

    pub env_vars: BTreeMap<String, String>,
    pub build_args: BTreeMap<String, String>,
    pub storage_mounts: Vec<StorageMount>,
    pub ports: Vec<String>,
    pub docker_options: Vec<String>,
    pub extra_domains: Vec<String>,
    pub plugins: Vec<String>,
}

impl ResolvedDeployment {
    /// Merge a parent node with one of its deployment nodes.
    ///
    /// Pure and total: deterministic, no side effects, never fails on
    /// well-typed input.
    pub fn merge(parent: &ParentNode, domain: &str, child: &DeploymentNode) -> Self {
        Self {
            domain: domain.to_string(),
            app_name: app_name_for(domain),
            source_dir: scalar(&child.source_dir, &parent.source_dir)
                .unwrap_or_else(|| ".".to_string()),
            branch: scalar(&child.branch, &parent.branch),
            tags: child.tags.clone(),
            postgres: toggle(child.postgres, parent.postgres),
            letsencrypt: toggle(child.letsencrypt, parent.letsencrypt),
            builder: scalar(&child.builder, &parent.builder),
            env_vars: union(&parent.env_vars, &child.env_vars),
            build_args: union(&parent.build_args, &child.build_args),
            storage_mounts: concat(&child.storage_mounts, &parent.storage_mounts),
            ports: if child.ports.is_empty() {
                parent.ports.clone()
            } else {
                child.ports.clone()
            },
            docker_options: concat(&child.docker_options, &parent.docker_options),
            extra_domains: concat(&child.extra_domains, &parent.extra_domains),
            plugins: concat(&child.plugins, &parent.plugins),
        }
    }

    /// Resolve every deployment in a document, in document order.
    pub fn resolve_all(document: &ConfigDocument) -> Vec<Self> {
        let mut resolved = Vec::new();
        for (_, parent) in &document.apps {
            for (domain, child) in parent.deployments.iter() {
                resolved.push(Self::merge(parent, domain, child));
            }
        }
        resolved
    }

    /// Whether this deployment is tagged `production`.
    pub fn is_production(&self) -> bool {
        self.tags.iter().any(|tag| tag == "production")
    }
}

/// Derive the remote resource identifier from a domain.
pub fn app_name_for(domain: &str) -> String {
    domain.replace('.', "-")
}

fn scalar(child: &Option<String>, parent: &Option<String>) -> Option<String> {
    child
        .as_deref()
        .filter(|value| !value.is_empty())
        .or(parent.as_deref().filter(|value| !value.is_empty()))
        .map(str::to_string)
}

fn toggle(child: Option<Toggle>, parent: Option<Toggle>) -> bool {
    child.or(parent).map(Toggle::as_bool).unwrap_or(false)
}

fn union(
    parent: &BTreeMap<String, String>,
    child: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = parent.clone();
    merged.extend(child.iter().map(|(key, value)| (key.clone(), value.clone())));
    merged
}

fn concat<T: Clone>(child: &[T], parent: &[T]) -> Vec<T> {
    let mut merged = Vec::with_capacity(child.len() + parent.len());
    merged.extend_from_slice(child);
    merged.extend_from_slice(parent);
    merged
}
