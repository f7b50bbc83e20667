// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Working-set selection.
//!
//! Narrow the resolved deployment list down to the targets a run should
//! touch. Three checks combine conjunctively: explicit domain names (exact
//! match), production exclusion, and tag filters (OR across tags). The
//! filter is stable: survivors keep their input order.

use crate::deploy::ResolvedDeployment;

use std::collections::BTreeSet;
use tracing::info;

/// Selection criteria gathered from the command line.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Explicit domain names. Empty means "no name restriction".
    pub names: BTreeSet<String>,

    /// Tag filters; a deployment matches when any one of its tags is listed.
    pub tags: Vec<String>,

    /// Drop deployments tagged `production`.
    pub exclude_production: bool,
}

impl Selection {
    pub fn new(
        names: impl IntoIterator<Item = impl Into<String>>,
        tags: impl IntoIterator<Item = impl Into<String>>,
        exclude_production: bool,
    ) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            tags: tags.into_iter().map(Into::into).collect(),
            exclude_production,
        }
    }

    fn keeps(&self, deployment: &ResolvedDeployment) -> bool {
        if !self.names.is_empty() && !self.names.contains(&deployment.domain) {
            return false;
        }

        if self.exclude_production && deployment.is_production() {
            info!("excluding production deployment {}", deployment.domain);
            return false;
        }

        if !self.tags.is_empty()
            && !deployment
                .tags
                .iter()
                .any(|tag| self.tags.iter().any(|filter| filter == tag))
        {
            return false;
        }

        true
    }
}

/// Filter resolved deployments down to the working set.
///
/// Stable: result order is input order.
pub fn filter(
    deployments: Vec<ResolvedDeployment>,
    selection: &Selection,
) -> Vec<ResolvedDeployment> {
    deployments
        .into_iter()
        .filter(|deployment| selection.keeps(deployment))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn deployment(domain: &str, tags: &[&str]) -> ResolvedDeployment {
        use crate::config::{DeploymentNode, ParentNode};
        let child = DeploymentNode {
            tags: tags.iter().map(ToString::to_string).collect(),
            ..DeploymentNode::default()
        };
        ResolvedDeployment::merge(&ParentNode::default(), domain, &child)
    }

    fn domains(selected: &[ResolvedDeployment]) -> Vec<&str> {
        selected.iter().map(|dep| dep.domain.as_str()).collect()
    }

    #[test]
    fn explicit_names_match_exactly() {
        let pool = vec![
            deployment("api.example.com", &[]),
            deployment("api.example.org", &[]),
        ];
        let selection = Selection::new(["api.example.com"], [] as [&str; 0], false);
        assert_eq!(domains(&filter(pool, &selection)), ["api.example.com"]);
    }

    #[test]
    fn tag_filters_use_or_semantics() {
        let pool = vec![
            deployment("a.example.com", &["api"]),
            deployment("b.example.com", &["worker"]),
            deployment("c.example.com", &["cron"]),
        ];
        let selection = Selection::new([] as [&str; 0], ["api", "worker"], false);
        assert_eq!(
            domains(&filter(pool, &selection)),
            ["a.example.com", "b.example.com"]
        );
    }

    #[test]
    fn production_exclusion_beats_matching_tag() {
        let pool = vec![deployment("api.example.com", &["production", "api"])];
        let selection = Selection::new([] as [&str; 0], ["api"], true);
        assert!(filter(pool, &selection).is_empty());
    }

    #[test]
    fn checks_combine_conjunctively() {
        let pool = vec![
            deployment("a.example.com", &["api"]),
            deployment("b.example.com", &["api"]),
        ];
        let selection = Selection::new(["a.example.com"], ["worker"], false);
        assert!(filter(pool, &selection).is_empty());
    }

    #[test]
    fn filter_is_stable() {
        let pool = vec![
            deployment("z.example.com", &["api"]),
            deployment("a.example.com", &["api"]),
            deployment("m.example.com", &["api"]),
        ];
        let selection = Selection::new([] as [&str; 0], ["api"], false);
        assert_eq!(
            domains(&filter(pool, &selection)),
            ["z.example.com", "a.example.com", "m.example.com"]
        );
    }

    #[test]
    fn empty_selection_keeps_everything() {
        let pool = vec![
            deployment("a.example.com", &["production"]),
            deployment("b.example.com", &[]),
        ];
        let selection = Selection::default();
        assert_eq!(filter(pool, &selection).len(), 2);
    }
}
