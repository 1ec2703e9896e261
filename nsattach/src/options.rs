//! Host configuration.

use std::path::PathBuf;

use nsattach_shared::constants::{envs as const_envs, layout, workers};
use nsattach_shared::errors::{NsattachError, NsattachResult};
use serde::{Deserialize, Serialize};

/// Configuration of a [`Host`](crate::Host).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostOptions {
    /// Directory holding one directory per container.
    ///
    /// Default: `/var/lib/lxc` for root, `$XDG_DATA_HOME/lxc` otherwise
    #[serde(default = "default_lxcpath")]
    pub lxcpath: PathBuf,

    /// Maximum number of blocking operations running at once.
    ///
    /// Default: 4
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Where non-absolute template names are looked up.
    ///
    /// Default: /usr/share/lxc/templates
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
}

fn default_lxcpath() -> PathBuf {
    if unsafe { libc::geteuid() } == 0 {
        return PathBuf::from(layout::SYSTEM_LXCPATH);
    }
    dirs::data_dir()
        .map(|dir| dir.join(layout::USER_LXCPATH_DIR))
        .unwrap_or_else(|| PathBuf::from(layout::SYSTEM_LXCPATH))
}

fn default_worker_threads() -> usize {
    workers::DEFAULT_THREADS
}

fn default_template_dir() -> PathBuf {
    PathBuf::from(layout::TEMPLATE_DIR)
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            lxcpath: default_lxcpath(),
            worker_threads: default_worker_threads(),
            template_dir: default_template_dir(),
        }
    }
}

impl HostOptions {
    /// Defaults with `NSATTACH_LXCPATH` and `NSATTACH_WORKER_THREADS`
    /// applied.
    pub fn from_env() -> NsattachResult<Self> {
        let mut options = Self::default();

        if let Ok(path) = std::env::var(const_envs::LXCPATH)
            && !path.is_empty()
        {
            options.lxcpath = PathBuf::from(path);
        }

        if let Ok(threads) = std::env::var(const_envs::WORKER_THREADS) {
            options.worker_threads = threads.trim().parse().map_err(|_| {
                NsattachError::InvalidArgument(format!(
                    "{} must be a positive integer, got {:?}",
                    const_envs::WORKER_THREADS,
                    threads
                ))
            })?;
        }

        options.validate()?;
        Ok(options)
    }

    pub fn with_lxcpath(mut self, lxcpath: impl Into<PathBuf>) -> Self {
        self.lxcpath = lxcpath.into();
        self
    }

    pub fn validate(&self) -> NsattachResult<()> {
        if self.worker_threads == 0 {
            return Err(NsattachError::InvalidArgument(
                "worker_threads must be at least 1".into(),
            ));
        }
        if !self.lxcpath.is_absolute() {
            return Err(NsattachError::InvalidArgument(format!(
                "lxcpath must be an absolute path, got: {}",
                self.lxcpath.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = HostOptions::default();
        assert_eq!(options.worker_threads, 4);
        assert_eq!(options.template_dir, PathBuf::from("/usr/share/lxc/templates"));
        assert!(options.lxcpath.ends_with("lxc"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let options = HostOptions {
            worker_threads: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_lxcpath() {
        let options = HostOptions::default().with_lxcpath("relative/path");
        assert!(options.validate().is_err());
        assert!(HostOptions::default().with_lxcpath("/tmp/lxc").validate().is_ok());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let options: HostOptions = serde_json::from_str(r#"{"lxcpath": "/srv/lxc"}"#).unwrap();
        assert_eq!(options.lxcpath, PathBuf::from("/srv/lxc"));
        assert_eq!(options.worker_threads, 4);
    }
}
