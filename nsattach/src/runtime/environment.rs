//! Environment of attached processes.

use std::ffi::CStr;

use nsattach_shared::constants::environment as const_env;
use nsattach_shared::errors::{NsattachError, NsattachResult};
use serde::{Deserialize, Serialize};

use crate::util::cstr::CStringArray;

/// How the host environment relates to the attached process's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvPolicy {
    /// Start from an empty environment.
    #[default]
    Clear,
    /// Inherit the host environment.
    Keep,
}

/// Resolved environment, ready to hand to `execve`.
pub struct Environment {
    vars: Vec<String>,
    cvars: CStringArray,
}

impl Environment {
    /// Resolve the final environment.
    ///
    /// With [`EnvPolicy::Clear`] the result holds a PATH (the default unless
    /// `extra` sets one), the container marker, then `extra`. Later entries
    /// override earlier ones with the same name.
    pub fn build(policy: EnvPolicy, extra: &[(String, String)]) -> NsattachResult<Self> {
        let mut vars: Vec<String> = Vec::new();

        if policy == EnvPolicy::Keep {
            for (key, value) in std::env::vars_os() {
                if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
                    vars.push(format!("{}={}", key, value));
                }
            }
        }

        if !vars.iter().any(|v| v.starts_with("PATH=")) {
            vars.push(format!("PATH={}", const_env::DEFAULT_PATH));
        }
        vars.push(const_env::CONTAINER_MARKER.to_string());

        for (key, value) in extra {
            if key.is_empty() || key.contains('=') {
                return Err(NsattachError::InvalidArgument(format!(
                    "invalid environment variable name: {:?}",
                    key
                )));
            }
            let prefix = format!("{}=", key);
            vars.retain(|v| !v.starts_with(&prefix));
            vars.push(format!("{}{}", prefix, value));
        }

        let cvars = CStringArray::from_strs(vars.iter().map(String::as_str)).map_err(|_| {
            NsattachError::InvalidArgument("environment contains a NUL byte".into())
        })?;

        Ok(Self { vars, cvars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.iter().rev().find_map(|v| {
            v.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub(crate) fn as_cstrings(&self) -> &CStringArray {
        &self.cvars
    }

    pub(crate) fn iter_cstr(&self) -> impl Iterator<Item = &CStr> {
        self.cvars.iter()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").field("vars", &self.vars).finish()
    }
}
