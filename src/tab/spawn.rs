//! Deciding what a tab runs, where, and with which environment.
//!
//! Everything here is pure so the precedence rules can be tested without a
//! helper. The supervisor gathers the inputs (preferred shell, proxy
//! variables) over RPC and feeds them through these functions.

use std::path::{Path, PathBuf};

use ptyhost_config::{PreserveDirectory, Profile};
use url::Url;

use crate::error::{Error, Result};
use crate::shell;

/// Descriptors 0, 1 and 2 of the child all refer to the first passed fd.
pub const STDIO_MAP: [(i32, usize); 3] = [(0, 0), (1, 0), (2, 0)];

/// Program looked up inside the container when no shell was discovered.
pub const DEFAULT_SHELL_NAME: &str = "bash";

/// The resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub argv: Vec<String>,
    /// The program the login flag and cwd policy were judged by. `None` for
    /// an alternate argv, empty for the passwd fallback.
    pub arg0: Option<String>,
}

impl ResolvedCommand {
    fn is_alternate(&self) -> bool {
        self.arg0.is_none()
    }
}

/// Resolve the argv for one spawn attempt.
///
/// Precedence: `alternate` argv, the profile's custom command, the
/// container's preferred `shell`, then the passwd fallback. `-l` is added
/// for login profiles when the program accepts it, never to an alternate
/// argv.
pub fn resolve_command(
    alternate: Option<&[String]>,
    profile: &Profile,
    shell: Option<&str>,
) -> Result<ResolvedCommand> {
    if let Some(argv) = alternate.filter(|argv| !argv.is_empty()) {
        return Ok(ResolvedCommand {
            argv: argv.to_vec(),
            arg0: None,
        });
    }

    let (mut argv, arg0) = if let Some(command) = profile.custom_command() {
        let argv = shell_words::split(command)
            .map_err(|e| Error::SpawnFailed(format!("cannot parse custom command: {e}")))?;
        let Some(first) = argv.first().cloned() else {
            return Err(Error::SpawnFailed("custom command is empty".to_string()));
        };
        (argv, first)
    } else if let Some(shell) = shell.filter(|s| !s.is_empty()) {
        (vec![shell.to_string()], shell.to_string())
    } else {
        (shell::fallback_argv(), String::new())
    };

    if profile.login_shell && shell::supports_login_flag(&arg0) {
        argv.push("-l".to_string());
    }

    Ok(ResolvedCommand {
        argv,
        arg0: Some(arg0),
    })
}

/// Name to resolve inside the container for the discovered `shell`.
pub fn shell_lookup_name(shell: Option<&str>) -> String {
    shell
        .and_then(|s| Path::new(s).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SHELL_NAME)
        .to_string()
}

/// Working directory for the spawn, as a local path.
///
/// `initial` is an explicit override and always wins. Otherwise
/// `previous` is used directly for alternate commands, or filtered through
/// the profile's `policy`.
pub fn resolve_cwd(
    initial: Option<&str>,
    previous: Option<&str>,
    command: &ResolvedCommand,
    policy: PreserveDirectory,
) -> Option<String> {
    if let Some(dir) = initial.filter(|d| !d.is_empty()) {
        return to_local_path(dir).map(path_string);
    }

    let previous = previous.filter(|d| !d.is_empty())?;
    if command.is_alternate() {
        return to_local_path(previous).map(path_string);
    }

    let preserve = match policy {
        PreserveDirectory::Never => false,
        PreserveDirectory::Safe => command.arg0.as_deref().is_some_and(shell::is_shell),
        PreserveDirectory::Always => true,
    };
    if !preserve {
        return None;
    }
    to_local_path(previous).map(path_string)
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// Turn an absolute path or a `file://` URI into a path on this machine.
///
/// URIs naming another host, and anything that is not a file URI, are not
/// native and yield `None`.
pub fn to_local_path(dir: &str) -> Option<PathBuf> {
    if dir.starts_with('/') {
        return Some(PathBuf::from(dir));
    }
    let mut url = Url::parse(dir).ok()?;
    if url.scheme() != "file" || !is_local_host(url.host_str()) {
        return None;
    }
    // to_file_path only accepts an empty host or "localhost"
    url.set_host(None).ok()?;
    url.to_file_path().ok()
}

fn is_local_host(host: Option<&str>) -> bool {
    match host {
        None | Some("") | Some("localhost") => true,
        Some(host) => hostname::get()
            .ok()
            .is_some_and(|local| local.to_string_lossy().eq_ignore_ascii_case(host)),
    }
}

/// Set `key` in a `KEY=VALUE` list, replacing an existing entry.
pub fn set_env(env: &mut Vec<String>, key: &str, value: &str) {
    let entry = format!("{key}={value}");
    let prefix = format!("{key}=");
    match env.iter_mut().find(|e| e.starts_with(&prefix) || e.as_str() == key) {
        Some(existing) => *existing = entry,
        None => env.push(entry),
    }
}

/// Environment overrides for a process started with `profile`.
///
/// `proxy` is the helper's proxy environment and is only used when the
/// profile forwards it.
pub fn spawn_environment(profile: &Profile, proxy: Vec<String>) -> Vec<String> {
    let mut env = if profile.use_proxy { proxy } else { Vec::new() };
    set_env(&mut env, "PTYHOST_PROFILE", &profile.uuid.to_string());
    set_env(&mut env, "PTYHOST_VERSION", crate::VERSION);
    set_env(&mut env, "COLORTERM", "truecolor");
    set_env(&mut env, "TERM", "xterm-256color");
    env
}
