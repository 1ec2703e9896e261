//! cgroup v2 access for running containers.

use std::io;
use std::path::PathBuf;

use nsattach_shared::constants::layout;
use nsattach_shared::errors::{NsattachError, NsattachResult};

/// The unified-hierarchy cgroup of `pid`, e.g. `/lxc/web`.
///
/// None on hosts without a cgroup v2 entry for the process.
pub(crate) fn unified_path(pid: i32) -> io::Result<Option<String>> {
    let content = std::fs::read_to_string(format!("/proc/{}/cgroup", pid))?;
    Ok(content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(|path| path.trim().to_string()))
}

pub(crate) fn cgroup_dir(relative: &str) -> PathBuf {
    PathBuf::from(layout::CGROUP_ROOT).join(relative.trim_start_matches('/'))
}

fn not_available() -> NsattachError {
    NsattachError::Cgroup("Invalid cgroup key or container not running".into())
}

fn item_path(pid: i32, key: &str) -> NsattachResult<PathBuf> {
    if key.is_empty() || key.contains('/') || key.starts_with('.') {
        return Err(not_available());
    }
    let relative = unified_path(pid)
        .ok()
        .flatten()
        .ok_or_else(not_available)?;
    Ok(cgroup_dir(&relative).join(key))
}

pub(crate) fn read_item(pid: i32, key: &str) -> NsattachResult<String> {
    let path = item_path(pid, key)?;
    std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => not_available(),
        _ => NsattachError::Cgroup(format!("Unable to read cgroup value: {}", e)),
    })
}

pub(crate) fn write_item(pid: i32, key: &str, value: &str) -> NsattachResult<()> {
    let path = item_path(pid, key)?;
    tracing::debug!(pid, key, path = %path.display(), "writing cgroup item");
    std::fs::write(&path, value)
        .map_err(|e| NsattachError::Cgroup(format!("Unable to set cgroup value: {}", e)))
}
