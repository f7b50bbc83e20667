// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

//! Remote resource manager.
//!
//! The Dokku host is modeled as a typed capability set behind the
//! [`DokkuHost`] trait: ensure an app exists, attach a domain, mount
//! storage, set configuration, and so on. Every consumer (plan executor,
//! drift comparator, backup planner) talks to the trait; the free-text
//! conventions of the platform's CLI are the implementation detail of one
//! adapter, [`DokkuSsh`], not part of the contract.
//!
//! [`DokkuSsh`] runs each capability as a blocking `ssh <alias> -- dokku …`
//! round trip over an already-authenticated channel and parses the
//! line-prefixed report output. No locking discipline is enforced on the
//! host: concurrent invocations of the tool against the same server are
//! uncoordinated and can race.

use std::{
    collections::BTreeMap,
    io::Write,
    process::{Command, Stdio},
};
use tracing::instrument;

/// Managed database service kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DbService {
    Postgres,
    Mysql,
}

impl DbService {
    /// Plugin and command namespace on the platform.
    pub fn plugin(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

/// Capability set of the remote platform.
pub trait DokkuHost {
    /// Cheap round trip proving the channel works. Run before any
    /// deployment is processed.
    fn check_connectivity(&self) -> Result<()>;

    fn list_apps(&self) -> Result<Vec<String>>;
    fn app_exists(&self, app: &str) -> Result<bool>;
    fn create_app(&self, app: &str) -> Result<()>;

    fn installed_plugins(&self) -> Result<Vec<String>>;
    fn install_plugin(&self, plugin: &str) -> Result<()>;

    fn builder_report(&self, app: &str) -> Result<Option<String>>;
    fn set_builder(&self, app: &str, builder: &str) -> Result<()>;

    fn service_exists(&self, kind: DbService, name: &str) -> Result<bool>;
    fn create_service(&self, kind: DbService, name: &str) -> Result<()>;
    fn service_linked(&self, kind: DbService, name: &str, app: &str) -> Result<bool>;
    fn link_service(&self, kind: DbService, name: &str, app: &str) -> Result<()>;

    /// Connection string the service assigned at creation time.
    fn service_dsn(&self, kind: DbService, name: &str) -> Result<String>;

    /// All managed MySQL services on the host, shared or not.
    fn mysql_services(&self) -> Result<Vec<String>>;

    fn domains_report(&self, app: &str) -> Result<Vec<String>>;
    fn add_domain(&self, app: &str, domain: &str) -> Result<()>;

    fn cert_active(&self, app: &str) -> Result<bool>;

    /// Install a certificate pair from local files.
    fn install_cert(&self, app: &str, cert: &std::path::Path, key: &std::path::Path)
        -> Result<()>;

    fn config_map(&self, app: &str) -> Result<BTreeMap<String, String>>;
    fn config_set(&self, app: &str, pairs: &[(String, String)], restart: bool) -> Result<()>;

    fn storage_list(&self, app: &str) -> Result<Vec<String>>;
    fn mount_storage(&self, app: &str, mount: &str) -> Result<()>;

    fn ports_report(&self, app: &str) -> Result<Vec<String>>;
    fn set_ports(&self, app: &str, ports: &[String]) -> Result<()>;

    fn docker_options_report(&self, app: &str, phase: &str) -> Result<Vec<String>>;
    fn add_docker_option(&self, app: &str, phases: &str, option: &str) -> Result<()>;
    fn remove_docker_option(&self, app: &str, phases: &str, option: &str) -> Result<()>;

    fn letsencrypt_active(&self, app: &str) -> Result<bool>;
    fn enable_letsencrypt(&self, app: &str) -> Result<()>;
    fn letsencrypt_cron_active(&self) -> Result<bool>;
    fn add_letsencrypt_cron(&self) -> Result<()>;

    /// Commit hash of the remote deploy branch's HEAD, or `None` when the
    /// app has never received a push.
    fn deployed_commit(&self, app: &str) -> Result<Option<String>>;

    /// Branch the platform deploys from. `None` before the first push.
    fn deploy_branch(&self, app: &str) -> Result<Option<String>>;

    fn restart(&self, app: &str) -> Result<()>;

    /// Observed disk usage of a host path in megabytes.
    fn disk_usage_mb(&self, path: &str) -> Result<u64>;

    /// Tar-and-xz a host directory, returning the archive bytes.
    fn archive_dir(&self, path: &str) -> Result<Vec<u8>>;

    /// Unpack an xz'd tar archive into a host directory, creating it.
    fn restore_dir(&self, path: &str, archive: &[u8]) -> Result<()>;

    fn export_service(&self, kind: DbService, name: &str) -> Result<Vec<u8>>;
    fn import_service(&self, kind: DbService, name: &str, dump: &[u8]) -> Result<()>;
}

/// Dokku host reached over an authenticated ssh channel.
#[derive(Debug, Clone)]
pub struct DokkuSsh {
    alias: String,
}

impl DokkuSsh {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }

    fn ssh(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=5")
            .arg(&self.alias);
        command
    }

    /// Run a dokku subcommand, capturing trimmed stdout.
    #[instrument(skip(self), level = "debug")]
    fn dokku(&self, args: &[&str]) -> Result<String> {
        let script = format!("dokku {}", args.join(" "));
        self.shell(&script)
    }

    /// Run a dokku subcommand where only the exit status matters.
    fn dokku_ok(&self, args: &[&str]) -> Result<bool> {
        match self.dokku(args) {
            Ok(_) => Ok(true),
            Err(RemoteError::CommandFailed { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Run a shell snippet on the host, capturing trimmed stdout.
    fn shell(&self, script: &str) -> Result<String> {
        let output = self
            .ssh()
            .arg("--")
            .arg(script)
            .output()
            .map_err(RemoteError::Syscall)?;

        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: script.to_string(),
                output: format!("{stdout}{stderr}").trim_end().to_string(),
            });
        }

        Ok(stdout.trim_end().to_string())
    }

    /// Run a shell snippet on the host, capturing raw stdout bytes.
    fn shell_bytes(&self, script: &str) -> Result<Vec<u8>> {
        let output = self
            .ssh()
            .arg("--")
            .arg(script)
            .output()
            .map_err(RemoteError::Syscall)?;

        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: script.to_string(),
                output: String::from_utf8_lossy(output.stderr.as_slice())
                    .trim_end()
                    .to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// Run a shell snippet on the host, feeding bytes to its stdin.
    fn shell_with_stdin(&self, script: &str, input: &[u8]) -> Result<()> {
        let mut child = self
            .ssh()
            .arg("--")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RemoteError::Syscall)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).map_err(RemoteError::Syscall)?;
        }

        let output = child.wait_with_output().map_err(RemoteError::Syscall)?;
        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: script.to_string(),
                output: String::from_utf8_lossy(output.stderr.as_slice())
                    .trim_end()
                    .to_string(),
            });
        }

        Ok(())
    }
}

impl DokkuHost for DokkuSsh {
    fn check_connectivity(&self) -> Result<()> {
        self.dokku(&["version"]).map(|_| ())
    }

    fn list_apps(&self) -> Result<Vec<String>> {
        let output = self.dokku(&["apps:list"])?;
        Ok(report_lines(&output)
            .map(str::trim)
            .map(str::to_string)
            .collect())
    }

    fn app_exists(&self, app: &str) -> Result<bool> {
        self.dokku_ok(&["apps:exists", app])
    }

    fn create_app(&self, app: &str) -> Result<()> {
        self.dokku(&["apps:create", app]).map(|_| ())
    }

    fn installed_plugins(&self) -> Result<Vec<String>> {
        let output = self.dokku(&["plugin:list"])?;
        Ok(report_lines(&output)
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }

    fn install_plugin(&self, plugin: &str) -> Result<()> {
        // Official plugins install by repository URL, named for idempotence.
        let url = format!("https://github.com/dokku/dokku-{plugin}.git");
        self.shell(&format!("sudo dokku plugin:install {url} {plugin}"))
            .map(|_| ())
    }

    fn builder_report(&self, app: &str) -> Result<Option<String>> {
        let output = self.dokku(&["builder:report", app, "--builder-selected"])?;
        Ok(Some(output).filter(|selected| !selected.is_empty()))
    }

    fn set_builder(&self, app: &str, builder: &str) -> Result<()> {
        self.dokku(&["builder:set", app, "selected", builder])
            .map(|_| ())
    }

    fn service_exists(&self, kind: DbService, name: &str) -> Result<bool> {
        let subcommand = format!("{}:exists", kind.plugin());
        self.dokku_ok(&[subcommand.as_str(), name])
    }

    fn create_service(&self, kind: DbService, name: &str) -> Result<()> {
        let subcommand = format!("{}:create", kind.plugin());
        self.dokku(&[subcommand.as_str(), name]).map(|_| ())
    }

    fn service_linked(&self, kind: DbService, name: &str, app: &str) -> Result<bool> {
        let subcommand = format!("{}:linked", kind.plugin());
        self.dokku_ok(&[subcommand.as_str(), name, app])
    }

    fn link_service(&self, kind: DbService, name: &str, app: &str) -> Result<()> {
        let subcommand = format!("{}:link", kind.plugin());
        self.dokku(&[subcommand.as_str(), name, app]).map(|_| ())
    }

    fn service_dsn(&self, kind: DbService, name: &str) -> Result<String> {
        let subcommand = format!("{}:info", kind.plugin());
        self.dokku(&[subcommand.as_str(), name, "--dsn"])
    }

    fn mysql_services(&self) -> Result<Vec<String>> {
        let output = self.dokku(&["mysql:list"])?;
        Ok(report_lines(&output)
            .filter_map(|line| line.split_whitespace().next())
            .filter(|name| *name != "NAME")
            .map(str::to_string)
            .collect())
    }

    fn domains_report(&self, app: &str) -> Result<Vec<String>> {
        let output = self.dokku(&["domains:report", app, "--domains-app-vhosts"])?;
        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    fn add_domain(&self, app: &str, domain: &str) -> Result<()> {
        self.dokku(&["domains:add", app, domain]).map(|_| ())
    }

    fn cert_active(&self, app: &str) -> Result<bool> {
        let output = self.dokku(&["certs:report", app, "--certs-ssl-enabled"])?;
        Ok(output.trim() == "true")
    }

    fn install_cert(
        &self,
        app: &str,
        cert: &std::path::Path,
        key: &std::path::Path,
    ) -> Result<()> {
        // certs:add expects a tar stream holding server.crt and server.key.
        let staging = std::env::temp_dir().join(format!("dokkup-certs-{app}"));
        std::fs::create_dir_all(&staging).map_err(RemoteError::Syscall)?;
        std::fs::copy(cert, staging.join("server.crt")).map_err(RemoteError::Syscall)?;
        std::fs::copy(key, staging.join("server.key")).map_err(RemoteError::Syscall)?;

        let archive = Command::new("tar")
            .arg("-C")
            .arg(&staging)
            .args(["-cf", "-", "server.crt", "server.key"])
            .output()
            .map_err(RemoteError::Syscall)?;
        let result = self.shell_with_stdin(&format!("dokku certs:add {app}"), &archive.stdout);

        let _ = std::fs::remove_dir_all(&staging);
        result
    }

    fn config_map(&self, app: &str) -> Result<BTreeMap<String, String>> {
        let output = self.dokku(&["config:show", app])?;
        Ok(report_lines(&output)
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect())
    }

    fn config_set(&self, app: &str, pairs: &[(String, String)], restart: bool) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut args = vec!["config:set".to_string()];
        if !restart {
            args.push("--no-restart".to_string());
        }
        args.push(app.to_string());
        for (key, value) in pairs {
            args.push(shell_quote(&format!("{key}={value}")));
        }

        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        self.dokku(&borrowed).map(|_| ())
    }

    fn storage_list(&self, app: &str) -> Result<Vec<String>> {
        let output = self.dokku(&["storage:list", app])?;
        Ok(report_lines(&output)
            .map(str::trim)
            .filter(|line| line.contains(':'))
            .map(str::to_string)
            .collect())
    }

    fn mount_storage(&self, app: &str, mount: &str) -> Result<()> {
        self.dokku(&["storage:mount", app, mount]).map(|_| ())
    }

    fn ports_report(&self, app: &str) -> Result<Vec<String>> {
        let output = self.dokku(&["ports:list", app])?;
        Ok(report_lines(&output)
            .filter_map(|line| {
                let mut columns = line.split_whitespace();
                match (columns.next(), columns.next(), columns.next()) {
                    (Some(scheme), Some(host), Some(container))
                        if host.chars().all(|ch| ch.is_ascii_digit()) =>
                    {
                        Some(format!("{scheme}:{host}:{container}"))
                    }
                    _ => None,
                }
            })
            .collect())
    }

    fn set_ports(&self, app: &str, ports: &[String]) -> Result<()> {
        let mut args = vec!["ports:set", app];
        args.extend(ports.iter().map(String::as_str));
        self.dokku(&args).map(|_| ())
    }

    fn docker_options_report(&self, app: &str, phase: &str) -> Result<Vec<String>> {
        let flag = format!("--docker-options-{phase}");
        let output = self.dokku(&["docker-options:report", app, flag.as_str()])?;
        Ok(group_options(&output))
    }

    fn add_docker_option(&self, app: &str, phases: &str, option: &str) -> Result<()> {
        let quoted = shell_quote(option);
        self.dokku(&["docker-options:add", app, phases, quoted.as_str()])
            .map(|_| ())
    }

    fn remove_docker_option(&self, app: &str, phases: &str, option: &str) -> Result<()> {
        let quoted = shell_quote(option);
        self.dokku(&["docker-options:remove", app, phases, quoted.as_str()])
            .map(|_| ())
    }

    fn letsencrypt_active(&self, app: &str) -> Result<bool> {
        self.dokku_ok(&["letsencrypt:active", app])
    }

    fn enable_letsencrypt(&self, app: &str) -> Result<()> {
        self.dokku(&["letsencrypt:enable", app]).map(|_| ())
    }

    fn letsencrypt_cron_active(&self) -> Result<bool> {
        match self.shell("crontab -l") {
            Ok(crontab) => Ok(crontab.contains("letsencrypt")),
            Err(RemoteError::CommandFailed { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn add_letsencrypt_cron(&self) -> Result<()> {
        self.dokku(&["letsencrypt:cron-job", "--add"]).map(|_| ())
    }

    fn deployed_commit(&self, app: &str) -> Result<Option<String>> {
        // A missing app or an app that never received a push both report
        // as "no commit": the decision engine treats them the same.
        match self.dokku(&["git:report", app, "--git-sha"]) {
            Ok(sha) if sha.is_empty() => Ok(None),
            Ok(sha) => Ok(Some(sha)),
            Err(RemoteError::CommandFailed { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn deploy_branch(&self, app: &str) -> Result<Option<String>> {
        match self.dokku(&["git:report", app, "--git-deploy-branch"]) {
            Ok(branch) if branch.is_empty() => Ok(None),
            Ok(branch) => Ok(Some(branch)),
            Err(RemoteError::CommandFailed { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn restart(&self, app: &str) -> Result<()> {
        self.dokku(&["ps:restart", app]).map(|_| ())
    }

    fn disk_usage_mb(&self, path: &str) -> Result<u64> {
        let output = self.shell(&format!("sudo du -sm {}", shell_quote(path)))?;
        output
            .split_whitespace()
            .next()
            .and_then(|size| size.parse().ok())
            .ok_or_else(|| RemoteError::Parse {
                what: "du output",
                output,
            })
    }

    fn archive_dir(&self, path: &str) -> Result<Vec<u8>> {
        let quoted = shell_quote(path);
        self.shell_bytes(&format!("sudo tar -C {quoted} -cf - . | xz"))
    }

    fn restore_dir(&self, path: &str, archive: &[u8]) -> Result<()> {
        let quoted = shell_quote(path);
        self.shell_with_stdin(
            &format!("sudo mkdir -p {quoted} && xz -d | sudo tar -C {quoted} -xf -"),
            archive,
        )
    }

    fn export_service(&self, kind: DbService, name: &str) -> Result<Vec<u8>> {
        self.shell_bytes(&format!("dokku {}:export {name} | xz", kind.plugin()))
    }

    fn import_service(&self, kind: DbService, name: &str, dump: &[u8]) -> Result<()> {
        self.shell_with_stdin(
            &format!("xz -d | dokku {}:import {name}", kind.plugin()),
            dump,
        )
    }
}

/// Iterate report lines, dropping the platform's `=====>`/`----->` banners.
fn report_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("=====>") && !line.starts_with("----->"))
}

/// Re-group a whitespace-flattened option report into whole options.
///
/// The report prints all options on one line; an option starts at each
/// `-`/`--` token and owns the non-dash tokens that follow it.
fn group_options(output: &str) -> Vec<String> {
    let mut options: Vec<String> = Vec::new();
    for token in output.split_whitespace() {
        if token.starts_with('-') || options.is_empty() {
            options.push(token.to_string());
        } else {
            let last = options.last_mut().expect("non-empty options");
            last.push(' ');
            last.push_str(token);
        }
    }
    options
}

/// Quote a string for the remote shell.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "_-./:=@".contains(ch))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Remote resource manager error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The transport could not be spawned or used.
    #[error("cannot reach remote host")]
    Syscall(#[source] std::io::Error),

    /// The remote command ran but reported failure.
    #[error("remote command {command:?} failed:\n{output}")]
    CommandFailed { command: String, output: String },

    /// Report output did not follow the expected conventions.
    #[error("cannot parse {what}:\n{output}")]
    Parse {
        what: &'static str,
        output: String,
    },
}

/// Friendly result alias.
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn report_lines_drop_banners_and_blanks() {
        let output = "=====> my-app domains information\n  one.example.com\n\n-----> done\n  two.example.com";
        let lines: Vec<&str> = report_lines(output).map(str::trim).collect();
        assert_eq!(lines, ["one.example.com", "two.example.com"]);
    }

    #[test]
    fn group_options_reattaches_option_arguments() {
        let grouped = group_options("--build-arg RAILS_ENV=production --restart unless-stopped");
        assert_eq!(
            grouped,
            ["--build-arg RAILS_ENV=production", "--restart unless-stopped"]
        );
    }

    #[test]
    fn shell_quote_passes_safe_tokens_through() {
        assert_eq!(shell_quote("KEY=plain-value_1"), "KEY=plain-value_1");
        assert_eq!(shell_quote("/var/data:/app/data"), "/var/data:/app/data");
    }

    #[test]
    fn shell_quote_wraps_and_escapes_the_rest() {
        assert_eq!(shell_quote("KEY=two words"), "'KEY=two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
