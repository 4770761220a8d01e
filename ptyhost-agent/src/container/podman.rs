//! Podman containers, including toolbox and distrobox ones.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::process::RunPlan;

use super::SpawnRequest;

const TOOLBOX_LABELS: &[&str] = &["com.github.containers.toolbox", "com.github.debarshiray.toolbox"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodmanContainer {
    pub id: String,
    pub name: String,
    /// `podman`, `toolbox` or `distrobox`.
    pub provider: &'static str,
}

impl PodmanContainer {
    pub fn icon_name(&self) -> &'static str {
        match self.provider {
            "toolbox" => "container-toolbox-symbolic",
            "distrobox" => "container-distrobox-symbolic",
            _ => "container-podman-symbolic",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
    #[serde(rename = "IsInfra", default)]
    is_infra: bool,
}

/// Parse `podman ps --all --format=json`.
pub fn parse_ps(json: &str) -> serde_json::Result<Vec<PodmanContainer>> {
    let entries: Vec<PsEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .filter(|entry| !entry.is_infra)
        .map(|entry| {
            let labels = entry.labels.unwrap_or_default();
            let provider = if TOOLBOX_LABELS
                .iter()
                .any(|label| labels.get(*label).is_some_and(|v| v == "true"))
            {
                "toolbox"
            } else if labels.get("manager").is_some_and(|v| v == "distrobox") {
                "distrobox"
            } else {
                "podman"
            };
            let name = entry
                .names
                .into_iter()
                .next()
                .unwrap_or_else(|| entry.id.chars().take(12).collect());
            PodmanContainer {
                id: entry.id,
                name,
                provider,
            }
        })
        .collect())
}

pub fn is_available() -> bool {
    super::session::find_in_path("podman").is_some()
}

/// List every container known to podman.
pub async fn list() -> Result<Vec<PodmanContainer>> {
    let output = Command::new("podman")
        .args(["ps", "--all", "--format=json"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .context("Failed to run podman ps")?;
    if !output.status.success() {
        bail!("podman ps exited with {}", output.status);
    }
    let json = String::from_utf8_lossy(&output.stdout);
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    parse_ps(&json).context("Failed to parse podman ps output")
}

/// The file podman rewrites whenever containers are created or removed.
pub fn storage_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| {
        dir.join("containers")
            .join("storage")
            .join("overlay-containers")
            .join("containers.json")
    })
}

/// Watch the storage directory; every event pings `tx`.
pub fn watch_storage(tx: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let file = storage_file().context("No data directory")?;
    let dir = file.parent().context("Storage file has no parent")?;
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) if event.paths.iter().any(|p| p.ends_with("containers.json")) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => log::warn!("Container storage watch error: {e}"),
        }
    })?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    Ok(watcher)
}

async fn start(id: &str) -> Result<()> {
    let status = Command::new("podman")
        .args(["start", id])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .context("Failed to run podman start")?;
    if !status.success() {
        bail!("podman start {id} exited with {status}");
    }
    Ok(())
}

fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string())
}

/// `podman exec` command line that runs `request.argv` inside `id`.
fn exec_argv(id: &str, user: &str, request: &SpawnRequest) -> Vec<String> {
    let mut argv: Vec<String> = [
        "podman",
        "exec",
        "--privileged",
        "--interactive",
        "--tty",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    argv.push(format!("--user={user}"));
    if !request.cwd.is_empty() {
        argv.push(format!("--workdir={}", request.cwd));
    }
    let extra_fds = request
        .fds
        .iter()
        .map(|(dest, _)| *dest)
        .max()
        .unwrap_or(2)
        - 2;
    if extra_fds > 0 {
        argv.push(format!("--preserve-fds={extra_fds}"));
    }
    for (key, value) in &request.env {
        argv.push(format!("--env={key}={value}"));
    }
    argv.push(id.to_string());
    argv.extend(request.argv.iter().cloned());
    argv
}

/// Start the container if needed and build the `podman exec` plan.
pub async fn plan(container: &PodmanContainer, request: SpawnRequest) -> Result<RunPlan> {
    start(&container.id).await?;
    let argv = exec_argv(&container.id, &current_user(), &request);
    Ok(RunPlan {
        argv,
        cwd: None,
        env: Vec::new(),
        fds: request.fds,
    })
}

/// Resolve `program` inside the container's `PATH`.
pub async fn find_in_path(container: &PodmanContainer, program: &str) -> Option<String> {
    if start(&container.id).await.is_err() {
        return None;
    }
    let output = Command::new("podman")
        .args(["exec", &format!("--user={}", current_user()), &container.id])
        .args(["sh", "-c", "command -v \"$1\"", "sh", program])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then_some(path)
}
