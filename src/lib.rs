// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Deploy a fleet of apps to a Dokku host from one config file.
//!
//! One hierarchical JSON document describes every app and its deployments;
//! dokkup merges the hierarchy into flat per-deployment views, decides which
//! of them actually need work, and converges the server through an
//! idempotent step pipeline. The same resolved views also drive drift
//! detection against live server state and backup/restore of databases and
//! storage mounts.

pub mod config;
pub mod context;
pub mod deploy;
pub mod path;
pub mod remote;
pub mod vcs;

pub use config::ConfigDocument;
pub use context::RunContext;
pub use deploy::ResolvedDeployment;
