//! lxc-style container configuration.
//!
//! A config file is a sequence of `key = value` lines. Comments start with
//! `#`. Keys may repeat; list-valued keys accumulate one value per line,
//! scalar keys keep the last value.

use std::io;
use std::path::Path;

use nsattach_shared::errors::NsattachError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration key: {0}")]
    InvalidKey(String),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("config io: {0}")]
    Io(#[from] io::Error),
}

impl From<ConfigError> for NsattachError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => NsattachError::from(e),
            other => NsattachError::Config(other.to_string()),
        }
    }
}

// ============================================================================
// Key table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Scalar,
    List,
}

const SCALAR_KEYS: &[&str] = &[
    "lxc.apparmor.profile",
    "lxc.arch",
    "lxc.autodev",
    "lxc.console.logfile",
    "lxc.console.path",
    "lxc.ephemeral",
    "lxc.init.cmd",
    "lxc.init.cwd",
    "lxc.init.gid",
    "lxc.init.uid",
    "lxc.log.file",
    "lxc.log.level",
    "lxc.mount.auto",
    "lxc.mount.fstab",
    "lxc.namespace.clone",
    "lxc.pty.max",
    "lxc.rootfs.mount",
    "lxc.rootfs.options",
    "lxc.rootfs.path",
    "lxc.signal.halt",
    "lxc.signal.reboot",
    "lxc.signal.stop",
    "lxc.start.auto",
    "lxc.start.delay",
    "lxc.start.order",
    "lxc.tty.max",
    "lxc.uts.name",
];

const LIST_KEYS: &[&str] = &[
    "lxc.cap.drop",
    "lxc.cap.keep",
    "lxc.environment",
    "lxc.group",
    "lxc.idmap",
    "lxc.include",
    "lxc.mount.entry",
];

/// Key families addressed by prefix, e.g. `lxc.net.0.type`.
const FAMILIES: &[(&str, KeyKind)] = &[
    ("lxc.cgroup.", KeyKind::Scalar),
    ("lxc.cgroup2.", KeyKind::Scalar),
    ("lxc.hook.", KeyKind::List),
    ("lxc.net.", KeyKind::Scalar),
    ("lxc.prlimit.", KeyKind::Scalar),
    ("lxc.sysctl.", KeyKind::Scalar),
];

fn key_kind(key: &str) -> Option<KeyKind> {
    if SCALAR_KEYS.contains(&key) {
        return Some(KeyKind::Scalar);
    }
    if LIST_KEYS.contains(&key) {
        return Some(KeyKind::List);
    }
    FAMILIES
        .iter()
        .find(|(prefix, _)| key.len() > prefix.len() && key.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

/// A key that names a whole family, such as `lxc.net`.
fn is_family_root(key: &str) -> bool {
    FAMILIES
        .iter()
        .any(|(prefix, _)| prefix.strip_suffix('.') == Some(key))
}

/// Every key and key family the configuration accepts.
pub fn supported_keys() -> Vec<String> {
    let mut keys: Vec<String> = SCALAR_KEYS
        .iter()
        .chain(LIST_KEYS)
        .map(|k| k.to_string())
        .chain(
            FAMILIES
                .iter()
                .map(|(prefix, _)| prefix.trim_end_matches('.').to_string()),
        )
        .collect();
    keys.sort();
    keys
}

// ============================================================================
// ContainerConfig
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    entries: Vec<(String, String)>,
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
                line: index + 1,
                reason: format!("expected 'key = value', got '{}'", line),
            })?;
            let key = key.trim();
            if key_kind(key).is_none() {
                return Err(ConfigError::InvalidKey(key.to_string()));
            }
            config
                .entries
                .push((key.to_string(), value.trim().to_string()));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{} = {}\n", k, v))
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.render())?;
        Ok(())
    }

    /// Raw values of `key` in file order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Effective value of a scalar key.
    pub fn value<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.values(key).last()
    }

    /// Formatted value: list keys yield each value followed by a newline,
    /// scalar keys the effective value or an empty string.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        match key_kind(key) {
            Some(KeyKind::List) => Ok(self.values(key).map(|v| format!("{}\n", v)).collect()),
            Some(KeyKind::Scalar) => Ok(self.value(key).unwrap_or_default().to_string()),
            None => Err(ConfigError::InvalidKey(key.to_string())),
        }
    }

    /// Set a key. List keys append; scalar keys replace.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key_kind(key) {
            Some(KeyKind::List) => {}
            Some(KeyKind::Scalar) => self.entries.retain(|(k, _)| k != key),
            None => return Err(ConfigError::InvalidKey(key.to_string())),
        }
        self.entries.push((key.to_string(), value.to_string()));
        Ok(())
    }

    /// Remove a key and every key nested under it.
    pub fn clear(&mut self, key: &str) -> Result<(), ConfigError> {
        if key_kind(key).is_none() && !is_family_root(key) {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }
        let nested = format!("{}.", key);
        self.entries
            .retain(|(k, _)| k != key && !k.starts_with(&nested));
        Ok(())
    }

    /// Keys present in this configuration, in first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (k, _) in &self.entries {
            if !keys.contains(&k.as_str()) {
                keys.push(k.as_str());
            }
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
