//! The user's own session on the host.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::process::RunPlan;

use super::SpawnRequest;

pub const SESSION_ID: &str = "session";
pub const SESSION_PROVIDER: &str = "session";
pub const SESSION_DISPLAY_NAME: &str = "My Computer";
pub const SESSION_ICON: &str = "computer-symbolic";

/// Run the request directly in the helper's environment.
pub fn plan(request: SpawnRequest) -> RunPlan {
    RunPlan {
        argv: request.argv,
        cwd: (!request.cwd.is_empty()).then(|| PathBuf::from(request.cwd)),
        env: request.env,
        fds: request.fds,
    }
}

/// Resolve `program` against the helper's `PATH`.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
