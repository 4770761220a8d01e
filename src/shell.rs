//! Shell classification used for login flags and directory preservation.
//!
//! Known shells are a built-in list plus every entry of the host's
//! `/etc/shells`, read once and cached.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::connection::launcher::in_flatpak;

const BUILTIN_SHELLS: &[&str] = &["sh", "bash", "dash", "zsh", "fish", "tcsh", "csh", "tmux"];

/// Shells that accept `-l` to start as a login shell.
const LOGIN_SHELLS: &[&str] = &["bash", "fish", "zsh", "dash", "tcsh", "sh"];

/// Command used when no shell could be discovered: ask the passwd database.
pub const FALLBACK_ARGV: &[&str] = &["sh", "-c", "$(getent passwd $(whoami) | cut -d: -f7)"];

static KNOWN_SHELLS: OnceLock<HashSet<String>> = OnceLock::new();

fn shells_file() -> &'static str {
    if in_flatpak() {
        "/var/run/host/etc/shells"
    } else {
        "/etc/shells"
    }
}

/// Entries of a shells(5) file, skipping comments and blank lines.
fn parse_shells_file(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

fn build_known_shells(etc_shells: Option<&str>) -> HashSet<String> {
    let mut shells = HashSet::new();
    for name in BUILTIN_SHELLS {
        shells.insert((*name).to_string());
        shells.insert(format!("/bin/{name}"));
        shells.insert(format!("/usr/bin/{name}"));
    }
    if let Some(contents) = etc_shells {
        shells.extend(parse_shells_file(contents).map(str::to_string));
    }
    shells
}

fn known_shells() -> &'static HashSet<String> {
    KNOWN_SHELLS.get_or_init(|| {
        let path = shells_file();
        let contents = std::fs::read_to_string(path);
        if let Err(e) = &contents {
            log::debug!("Could not read {path}: {e}");
        }
        build_known_shells(contents.ok().as_deref())
    })
}

/// Whether `program` (a bare name or a path) is a known shell.
pub fn is_shell(program: &str) -> bool {
    !program.is_empty() && known_shells().contains(program)
}

/// Whether `program` accepts `-l`.
pub fn supports_login_flag(program: &str) -> bool {
    LOGIN_SHELLS
        .iter()
        .any(|name| program == *name || program.ends_with(&format!("/{name}")))
}

/// Fallback argv as owned strings.
pub fn fallback_argv() -> Vec<String> {
    FALLBACK_ARGV.iter().map(|s| s.to_string()).collect()
}
