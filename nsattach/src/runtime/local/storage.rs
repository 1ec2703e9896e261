//! Container directories: create, destroy and clone on the `dir` backing
//! store.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nsattach_shared::constants::layout;
use nsattach_shared::errors::{NsattachError, NsattachResult};
use rand::Rng;
use walkdir::WalkDir;

use crate::runtime::ContainerConfig;

const DIR_BACKING_STORE: &str = "dir";

/// Files describing a running instance, never copied by clone.
const RUNTIME_FILES: [&str; 2] = [layout::PID_FILE, layout::RUNNING_CONFIG_FILE];

pub(super) fn check_backing_store(backing_store: Option<&str>) -> NsattachResult<()> {
    match backing_store {
        None | Some(DIR_BACKING_STORE) => Ok(()),
        Some(other) => Err(NsattachError::InvalidArgument(format!(
            "unsupported backing store: {}",
            other
        ))),
    }
}

/// Value of `lxc.rootfs.path` for a container directory.
pub(super) fn rootfs_spec(dir: &Path) -> String {
    format!(
        "{}:{}",
        DIR_BACKING_STORE,
        dir.join(layout::ROOTFS_DIR).display()
    )
}

/// Resolve a template name to the program to run.
fn template_program(template: &str, template_dir: &Path) -> PathBuf {
    if template.contains('/') {
        PathBuf::from(template)
    } else {
        template_dir.join(format!("lxc-{}", template))
    }
}

/// Lay out a new container and run its template.
///
/// Returns the configuration as left by the template.
pub(super) fn create(
    name: &str,
    dir: &Path,
    template_dir: &Path,
    template: Option<&str>,
    args: &[String],
) -> NsattachResult<ContainerConfig> {
    let rootfs = dir.join(layout::ROOTFS_DIR);
    fs::create_dir_all(&rootfs)?;

    let config_file = dir.join(layout::CONFIG_FILE);
    let mut config = ContainerConfig::new();
    config.set("lxc.uts.name", name)?;
    config.set("lxc.rootfs.path", &rootfs_spec(dir))?;
    config.save(&config_file)?;

    let Some(template) = template else {
        return Ok(config);
    };

    let program = template_program(template, template_dir);
    tracing::info!(container = name, template = %program.display(), "running template");

    let status = Command::new(&program)
        .arg("--name")
        .arg(name)
        .arg("--path")
        .arg(dir)
        .arg("--rootfs")
        .arg(&rootfs)
        .args(args)
        .status();

    let failure = match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("template {} failed: {}", program.display(), status)),
        Err(e) => Some(format!("template {}: {}", program.display(), e)),
    };
    if let Some(reason) = failure {
        if let Err(e) = fs::remove_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove partial container");
        }
        return Err(NsattachError::Internal(reason));
    }

    Ok(ContainerConfig::load(&config_file)?)
}

pub(super) fn destroy(dir: &Path) -> NsattachResult<()> {
    fs::remove_dir_all(dir)?;
    tracing::info!(dir = %dir.display(), "container destroyed");
    Ok(())
}

/// Recursively copy a container directory, skipping runtime files.
pub(super) fn copy_tree(src: &Path, dst: &Path) -> NsattachResult<()> {
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| NsattachError::Internal(format!("walk {}: {}", src.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| NsattachError::Internal(e.to_string()))?;

        if entry.depth() == 1
            && RUNTIME_FILES
                .iter()
                .any(|f| relative.as_os_str() == *f)
        {
            continue;
        }

        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            tracing::debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(())
}

/// Random locally administered MAC in the range lxc hands out.
pub(super) fn random_mac() -> String {
    let mut rng = rand::rng();
    format!(
        "00:16:3e:{:02x}:{:02x}:{:02x}",
        rng.random::<u8>(),
        rng.random::<u8>(),
        rng.random::<u8>()
    )
}

/// Rewrite the copied configuration for its new identity.
pub(super) fn rewrite_clone_config(
    config: &mut ContainerConfig,
    src_dir: &Path,
    dst_dir: &Path,
    new_name: &str,
    keep_name: bool,
    keep_mac: bool,
) -> NsattachResult<()> {
    if !keep_name {
        config.set("lxc.uts.name", new_name)?;
    }

    // Only a rootfs that lived inside the source directory moves along
    let old_rootfs = config.value("lxc.rootfs.path").map(str::to_string);
    if let Some(old) = old_rootfs {
        let path = old.strip_prefix("dir:").unwrap_or(&old);
        if Path::new(path).starts_with(src_dir) {
            config.set("lxc.rootfs.path", &rootfs_spec(dst_dir))?;
        }
    }

    if !keep_mac {
        let hwaddr_keys: Vec<String> = config
            .keys()
            .into_iter()
            .filter(|k| k.starts_with("lxc.net.") && k.ends_with(".hwaddr"))
            .map(str::to_string)
            .collect();
        for key in hwaddr_keys {
            config.set(&key, &random_mac())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backing_store_check() {
        assert!(check_backing_store(None).is_ok());
        assert!(check_backing_store(Some("dir")).is_ok());
        assert!(check_backing_store(Some("btrfs")).is_err());
    }

    #[test]
    fn test_template_program() {
        let dir = Path::new("/usr/share/lxc/templates");
        assert_eq!(
            template_program("busybox", dir),
            PathBuf::from("/usr/share/lxc/templates/lxc-busybox")
        );
        assert_eq!(template_program("/tmp/t.sh", dir), PathBuf::from("/tmp/t.sh"));
    }

    #[test]
    fn test_create_without_template() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("c1");
        let config = create("c1", &dir, tmp.path(), None, &[]).unwrap();

        assert!(dir.join("rootfs").is_dir());
        assert_eq!(config.value("lxc.uts.name"), Some("c1"));
        assert_eq!(ContainerConfig::load(&dir.join("config")).unwrap(), config);
    }

    #[test]
    fn test_failed_template_removes_container() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("c1");
        let err = create("c1", &dir, tmp.path(), Some("missing"), &[]).unwrap_err();
        assert!(err.to_string().contains("lxc-missing"));
        assert!(!dir.exists());
    }

    #[test]
    fn test_copy_tree_skips_runtime_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("rootfs/etc")).unwrap();
        fs::write(src.join("rootfs/etc/hostname"), "src").unwrap();
        fs::write(src.join("config"), "lxc.uts.name = src\n").unwrap();
        fs::write(src.join(layout::PID_FILE), "1 1").unwrap();
        std::os::unix::fs::symlink("hostname", src.join("rootfs/etc/link")).unwrap();

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("rootfs/etc/hostname")).unwrap(), "src");
        assert!(dst.join("config").exists());
        assert!(!dst.join(layout::PID_FILE).exists());
        assert_eq!(
            fs::read_link(dst.join("rootfs/etc/link")).unwrap(),
            PathBuf::from("hostname")
        );
    }

    #[test]
    fn test_random_mac_format() {
        let mac = random_mac();
        assert!(mac.starts_with("00:16:3e:"));
        assert_eq!(mac.len(), 17);
    }

    #[test]
    fn test_rewrite_clone_config() {
        let src = Path::new("/var/lib/lxc/a");
        let dst = Path::new("/var/lib/lxc/b");
        let original = ContainerConfig::parse(
            "lxc.uts.name = a\n\
             lxc.rootfs.path = dir:/var/lib/lxc/a/rootfs\n\
             lxc.net.0.hwaddr = 00:16:3e:00:00:01\n",
        )
        .unwrap();

        let mut config = original.clone();
        rewrite_clone_config(&mut config, src, dst, "b", false, false).unwrap();
        assert_eq!(config.value("lxc.uts.name"), Some("b"));
        assert_eq!(config.value("lxc.rootfs.path"), Some("dir:/var/lib/lxc/b/rootfs"));
        assert_ne!(config.value("lxc.net.0.hwaddr"), Some("00:16:3e:00:00:01"));

        let mut kept = original.clone();
        rewrite_clone_config(&mut kept, src, dst, "b", true, true).unwrap();
        assert_eq!(kept.value("lxc.uts.name"), Some("a"));
        assert_eq!(kept.value("lxc.net.0.hwaddr"), Some("00:16:3e:00:00:01"));
    }
}
