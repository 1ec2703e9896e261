//! Directory-backed container runtime.
//!
//! Layout under `<lxcpath>/<name>/`:
//! - `config`: lxc-style `key = value` configuration
//! - `rootfs/`: the `dir` backing store
//! - `init.pid`: pid and start time of the running init
//! - `running.config`: configuration snapshot taken at start

mod attach;
mod cgroup;
mod init;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nix::unistd::{AccessFlags, access};
use nsattach_shared::constants::layout;
use nsattach_shared::errors::{NsattachError, NsattachResult};
use parking_lot::RwLock;

use super::config::{ContainerConfig, supported_keys};
use super::{
    AttachEntry, AttachOptions, CloneOptions, ContainerBackend, ContainerHandle,
    ContainerProvider,
};
use crate::util::process::{self, PidRecord};

pub struct LocalBackend {
    name: String,
    lxcpath: PathBuf,
    template_dir: PathBuf,
    config: RwLock<ContainerConfig>,
    refs: AtomicUsize,
}

impl LocalBackend {
    /// Construct the object for `name`, loading its configuration if the
    /// container is defined.
    pub fn open(name: &str, lxcpath: &Path, template_dir: &Path) -> NsattachResult<Self> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(NsattachError::InvalidArgument(format!(
                "invalid container name: {:?}",
                name
            )));
        }

        let config_file = lxcpath.join(name).join(layout::CONFIG_FILE);
        let config = if config_file.exists() {
            ContainerConfig::load(&config_file)?
        } else {
            ContainerConfig::new()
        };

        Ok(Self {
            name: name.to_string(),
            lxcpath: lxcpath.to_path_buf(),
            template_dir: template_dir.to_path_buf(),
            config: RwLock::new(config),
            refs: AtomicUsize::new(1),
        })
    }

    /// The container's directory.
    pub fn dir(&self) -> PathBuf {
        self.lxcpath.join(&self.name)
    }

    fn config_file(&self) -> PathBuf {
        self.dir().join(layout::CONFIG_FILE)
    }

    fn pid_file(&self) -> PathBuf {
        self.dir().join(layout::PID_FILE)
    }

    fn running_config_file(&self) -> PathBuf {
        self.dir().join(layout::RUNNING_CONFIG_FILE)
    }

    /// The init's pid record, if it is still alive.
    fn running_record(&self) -> Option<PidRecord> {
        process::read_pid_file(&self.pid_file())
            .ok()
            .filter(|record| process::is_record_alive(*record))
    }
}

impl ContainerBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn lxcpath(&self) -> &Path {
        &self.lxcpath
    }

    fn acquire(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        if let Ok(1) = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            tracing::debug!(container = %self.name, "container object released");
        }
    }

    fn may_control(&self) -> bool {
        // The nearest existing ancestor decides whether we could create it
        let dir = self.dir();
        dir.ancestors()
            .find(|p| p.exists())
            .is_some_and(|p| access(p, AccessFlags::W_OK).is_ok())
    }

    fn is_defined(&self) -> bool {
        self.config_file().exists()
    }

    fn is_running(&self) -> bool {
        self.running_record().is_some()
    }

    fn init_pid(&self) -> Option<i32> {
        self.running_record().map(|r| r.pid)
    }

    fn attach(&self, entry: &mut dyn AttachEntry, options: &AttachOptions) -> NsattachResult<i32> {
        let init_pid = self.init_pid().ok_or(NsattachError::NotRunning)?;
        attach::attach(init_pid, entry, options)
    }

    fn create(
        &self,
        template: Option<&str>,
        backing_store: Option<&str>,
        args: &[String],
    ) -> NsattachResult<()> {
        if self.is_defined() {
            return Err(NsattachError::AlreadyExists);
        }
        storage::check_backing_store(backing_store)?;

        let config = storage::create(&self.name, &self.dir(), &self.template_dir, template, args)?;
        *self.config.write() = config;
        tracing::info!(container = %self.name, "container created");
        Ok(())
    }

    fn start(&self, _use_init: bool, argv: &[String]) -> NsattachResult<()> {
        if !self.is_defined() {
            return Err(NsattachError::NotDefined);
        }
        if self.is_running() {
            return Err(NsattachError::Running);
        }

        let config = self.config.read().clone();
        let record = init::spawn(&self.name, &config, argv)?;
        process::write_pid_file(&self.pid_file(), record)?;
        config.save(&self.running_config_file())?;
        Ok(())
    }

    fn stop(&self) -> NsattachResult<()> {
        let record = self.running_record().ok_or(NsattachError::NotRunning)?;
        init::kill(record)?;
        for file in [self.pid_file(), self.running_config_file()] {
            if let Err(e) = std::fs::remove_file(&file) {
                tracing::debug!(file = %file.display(), error = %e, "failed to remove runtime file");
            }
        }
        Ok(())
    }

    fn destroy(&self) -> NsattachResult<()> {
        if self.is_running() {
            return Err(NsattachError::Running);
        }
        storage::destroy(&self.dir())
    }

    fn clone_to(&self, new_name: &str, options: &CloneOptions) -> NsattachResult<ContainerHandle> {
        if options.snapshot {
            return Err(NsattachError::InvalidArgument(
                "snapshot clones require an overlay backing store".into(),
            ));
        }
        storage::check_backing_store(options.backing_store.as_deref())?;
        if self.is_running() {
            return Err(NsattachError::Running);
        }

        let lxcpath = options.path.clone().unwrap_or_else(|| self.lxcpath.clone());
        let target = LocalBackend::open(new_name, &lxcpath, &self.template_dir)?;
        if target.dir().exists() {
            return Err(NsattachError::AlreadyExists);
        }

        storage::copy_tree(&self.dir(), &target.dir())?;

        let mut config = self.config.read().clone();
        storage::rewrite_clone_config(
            &mut config,
            &self.dir(),
            &target.dir(),
            new_name,
            options.keep_name,
            options.keep_mac,
        )?;
        config.save(&target.config_file())?;
        *target.config.write() = config;

        tracing::info!(source = %self.name, clone = new_name, "container cloned");
        Ok(Arc::new(target))
    }

    fn load_config(&self, file: Option<&Path>) -> NsattachResult<()> {
        let path = file.map_or_else(|| self.config_file(), Path::to_path_buf);
        let config = ContainerConfig::load(&path)?;
        *self.config.write() = config;
        Ok(())
    }

    fn save_config(&self, file: Option<&Path>) -> NsattachResult<()> {
        let path = file.map_or_else(|| self.config_file(), Path::to_path_buf);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.config.read().save(&path)?;
        Ok(())
    }

    fn config_keys(&self) -> Vec<String> {
        supported_keys()
    }

    fn get_config_item(&self, key: &str) -> NsattachResult<String> {
        Ok(self.config.read().get(key)?)
    }

    fn set_config_item(&self, key: &str, value: &str) -> NsattachResult<()> {
        Ok(self.config.write().set(key, value)?)
    }

    fn clear_config_item(&self, key: &str) -> NsattachResult<()> {
        Ok(self.config.write().clear(key)?)
    }

    fn get_running_config_item(&self, key: &str) -> NsattachResult<String> {
        if !self.is_running() {
            return Err(NsattachError::NotRunning);
        }
        Ok(ContainerConfig::load(&self.running_config_file())?.get(key)?)
    }

    fn get_cgroup_item(&self, key: &str) -> NsattachResult<String> {
        let pid = self.init_pid().ok_or_else(|| {
            NsattachError::Cgroup("Invalid cgroup key or container not running".into())
        })?;
        cgroup::read_item(pid, key)
    }

    fn set_cgroup_item(&self, key: &str, value: &str) -> NsattachResult<()> {
        let pid = self.init_pid().ok_or_else(|| {
            NsattachError::Cgroup("Invalid cgroup key or container not running".into())
        })?;
        cgroup::write_item(pid, key, value)
    }
}

/// Opens [`LocalBackend`]s.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    lxcpath: PathBuf,
    template_dir: PathBuf,
}

impl LocalProvider {
    pub fn new(lxcpath: impl Into<PathBuf>, template_dir: impl Into<PathBuf>) -> Self {
        Self {
            lxcpath: lxcpath.into(),
            template_dir: template_dir.into(),
        }
    }
}

impl ContainerProvider for LocalProvider {
    fn open(&self, name: &str, lxcpath: Option<&Path>) -> NsattachResult<ContainerHandle> {
        let lxcpath = lxcpath.unwrap_or(&self.lxcpath);
        Ok(Arc::new(LocalBackend::open(name, lxcpath, &self.template_dir)?))
    }
}
