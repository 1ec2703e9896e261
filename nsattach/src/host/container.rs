//! Caller-side container object.

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use nsattach_shared::errors::{NsattachError, NsattachResult};
use serde::{Deserialize, Serialize};

use super::bridge::Requirement;
use super::process::{AttachedProcess, ProcessOptions};
use super::Host;
use crate::runtime::{CloneOptions, ContainerBackend, ContainerHandle, ContainerState};

const KEY_PREFIX: &str = "lxc.";

/// A configuration value: list keys yield every entry, others a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Scalar(String),
    List(Vec<String>),
}

impl ConfigValue {
    /// Interpret a raw backend value: newline-terminated values are lists.
    fn from_raw(raw: String) -> Self {
        match raw.strip_suffix('\n') {
            Some(body) => Self::List(body.split('\n').map(str::to_string).collect()),
            None => Self::Scalar(raw),
        }
    }

    fn entries(&self) -> Vec<&str> {
        match self {
            Self::Scalar(value) => vec![value.as_str()],
            Self::List(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{}", value),
            Self::List(values) => write!(f, "{}", values.join("\n")),
        }
    }
}

fn normalize_key(key: &str) -> String {
    if key.starts_with(KEY_PREFIX) {
        key.to_string()
    } else {
        format!("{}{}", KEY_PREFIX, key)
    }
}

/// A container as seen by the host.
///
/// Clones share one reference on the underlying container object, which
/// is released when the last clone is dropped.
#[derive(Clone)]
pub struct Container {
    inner: Rc<ContainerInner>,
}

struct ContainerInner {
    host: Host,
    backend: ContainerHandle,
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        self.backend.release();
    }
}

impl Container {
    pub(crate) fn new(host: Host, backend: ContainerHandle) -> Self {
        Self {
            inner: Rc::new(ContainerInner { host, backend }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn lxcpath(&self) -> &Path {
        self.inner.backend.lxcpath()
    }

    pub fn is_defined(&self) -> bool {
        self.inner.backend.is_defined()
    }

    pub fn is_running(&self) -> bool {
        self.inner.backend.is_running()
    }

    pub fn state(&self) -> ContainerState {
        self.inner.backend.state()
    }

    pub fn init_pid(&self) -> Option<i32> {
        self.inner.backend.init_pid()
    }

    pub(crate) fn backend(&self) -> &ContainerHandle {
        &self.inner.backend
    }

    pub(crate) fn host(&self) -> &Host {
        &self.inner.host
    }

    // ========================================================================
    // Lifecycle (worker bridge)
    // ========================================================================

    /// Create the container, optionally from a template.
    pub async fn create(
        &self,
        template: Option<&str>,
        backing_store: Option<&str>,
        args: &[String],
    ) -> NsattachResult<()> {
        let template = template.map(str::to_string);
        let backing_store = backing_store.map(str::to_string);
        let args = args.to_vec();
        self.host()
            .bridge()
            .run_on(self.backend(), Requirement::Any, move |c| {
                c.create(template.as_deref(), backing_store.as_deref(), &args)
                    .map_err(|e| NsattachError::operation("Failed to create container", e))
            })
            .await
    }

    /// Start the container's init. An empty `argv` uses the configured one.
    pub async fn start(&self, argv: &[String]) -> NsattachResult<()> {
        let argv = argv.to_vec();
        self.host()
            .bridge()
            .run_on(self.backend(), Requirement::Defined, move |c| {
                c.start(false, &argv)
                    .map_err(|e| NsattachError::operation("Failed to start container", e))
            })
            .await
    }

    pub async fn stop(&self) -> NsattachResult<()> {
        self.host()
            .bridge()
            .run_on(self.backend(), Requirement::Defined, |c| {
                c.stop()
                    .map_err(|e| NsattachError::operation("Failed to stop container", e))
            })
            .await
    }

    pub async fn destroy(&self) -> NsattachResult<()> {
        self.host()
            .bridge()
            .run_on(self.backend(), Requirement::Defined, |c| {
                c.destroy()
                    .map_err(|e| NsattachError::operation("Failed to destroy container", e))
            })
            .await
    }

    /// Copy a stopped container under a new name.
    pub async fn clone_to(&self, new_name: &str, options: CloneOptions) -> NsattachResult<Container> {
        let new_name = new_name.to_string();
        let backend = self
            .host()
            .bridge()
            .run_on(self.backend(), Requirement::Defined, move |c| {
                if c.is_running() {
                    return Err(NsattachError::Running);
                }
                c.clone_to(&new_name, &options)
                    .map_err(|e| NsattachError::operation("Failed to clone container", e))
            })
            .await?;
        Ok(self.host().wrap(backend))
    }

    /// Load configuration from `file`, or from the container's config.
    pub async fn load_config(&self, file: Option<&Path>) -> NsattachResult<()> {
        let file = file.map(Path::to_path_buf);
        self.host()
            .bridge()
            .run_on(self.backend(), Requirement::Any, move |c| {
                c.load_config(file.as_deref())
                    .map_err(|e| NsattachError::operation("Failed to load config file", e))
            })
            .await
    }

    /// Save configuration to `file`, or to the container's config.
    pub async fn save_config(&self, file: Option<&Path>) -> NsattachResult<()> {
        let file: Option<PathBuf> = file.map(Path::to_path_buf);
        self.host()
            .bridge()
            .run_on(self.backend(), Requirement::Any, move |c| {
                c.save_config(file.as_deref())
                    .map_err(|e| NsattachError::operation("Failed to save config file", e))
            })
            .await
    }

    // ========================================================================
    // Configuration items (synchronous)
    // ========================================================================

    pub fn config_keys(&self) -> Vec<String> {
        self.backend().config_keys()
    }

    /// Read a key. The `lxc.` prefix is optional.
    pub fn get_config_item(&self, key: &str) -> NsattachResult<ConfigValue> {
        let raw = self.backend().get_config_item(&normalize_key(key))?;
        Ok(ConfigValue::from_raw(raw))
    }

    /// Replace a key's value. A list value sets one entry per element.
    ///
    /// If any entry is rejected, the previous value is put back.
    pub fn set_config_item(&self, key: &str, value: impl Into<ConfigValue>) -> NsattachResult<()> {
        set_config_value(&**self.backend(), &normalize_key(key), &value.into())
    }

    /// Append to a list key; sets a scalar key.
    pub fn append_config_item(&self, key: &str, value: &str) -> NsattachResult<()> {
        self.backend().set_config_item(&normalize_key(key), value)
    }

    pub fn clear_config_item(&self, key: &str) -> NsattachResult<()> {
        self.backend().clear_config_item(&normalize_key(key))
    }

    /// Read a key from the configuration the container was started with.
    pub fn get_running_config_item(&self, key: &str) -> NsattachResult<String> {
        self.backend().get_running_config_item(key)
    }

    // ========================================================================
    // Cgroup items (synchronous)
    // ========================================================================

    pub fn get_cgroup_item(&self, key: &str) -> NsattachResult<String> {
        let value = self.backend().get_cgroup_item(key)?;
        Ok(value.trim_end_matches('\n').to_string())
    }

    pub fn set_cgroup_item(&self, key: &str, value: &str) -> NsattachResult<()> {
        self.backend().set_cgroup_item(key, value)
    }

    // ========================================================================
    // Processes
    // ========================================================================

    /// Run `program` inside the container.
    ///
    /// Returns at once. The namespace entry happens on a worker; its
    /// outcome shows up on the handle's state. An exec failure is reported
    /// as an exit with the negated errno.
    pub fn attach(
        &self,
        program: &str,
        args: &[String],
        options: ProcessOptions,
    ) -> NsattachResult<AttachedProcess> {
        self.host().attach(self, program, args, options)
    }
}

fn set_config_value(
    backend: &dyn ContainerBackend,
    key: &str,
    value: &ConfigValue,
) -> NsattachResult<()> {
    let previous = ConfigValue::from_raw(backend.get_config_item(key)?);

    if let Err(err) = replace_config_value(backend, key, value) {
        if let Err(restore) = replace_config_value(backend, key, &previous) {
            tracing::warn!(key, error = %restore, "could not restore config item");
        }
        return Err(err);
    }
    Ok(())
}

fn replace_config_value(
    backend: &dyn ContainerBackend,
    key: &str,
    value: &ConfigValue,
) -> NsattachResult<()> {
    backend.clear_config_item(key)?;
    for entry in value.entries() {
        if entry.is_empty() {
            continue;
        }
        backend.set_config_item(key, entry)?;
    }
    Ok(())
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name())
            .field("lxcpath", &self.lxcpath())
            .finish()
    }
}
