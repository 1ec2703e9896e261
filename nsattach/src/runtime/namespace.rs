//! Namespace selection for attach requests.

use std::fmt;
use std::str::FromStr;

use nix::sched::CloneFlags;
use nsattach_shared::constants::namespaces as ns_names;
use nsattach_shared::errors::{NsattachError, NsattachResult};

/// Bitset over the namespaces an attached process enters.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet(CloneFlags);

/// Entry order and the `/proc/<pid>/ns/*` file name of each namespace.
///
/// The user namespace goes first so the remaining setns calls are checked
/// against the capabilities it grants.
const ENTRY_ORDER: [(CloneFlags, &str, &str); 6] = [
    (CloneFlags::CLONE_NEWUSER, "user", ns_names::USER),
    (CloneFlags::CLONE_NEWNS, "mnt", ns_names::MOUNT),
    (CloneFlags::CLONE_NEWPID, "pid", ns_names::PID),
    (CloneFlags::CLONE_NEWUTS, "uts", ns_names::UTS),
    (CloneFlags::CLONE_NEWIPC, "ipc", ns_names::IPC),
    (CloneFlags::CLONE_NEWNET, "net", ns_names::NET),
];

impl NamespaceSet {
    pub const MOUNT: Self = Self(CloneFlags::CLONE_NEWNS);
    pub const UTS: Self = Self(CloneFlags::CLONE_NEWUTS);
    pub const IPC: Self = Self(CloneFlags::CLONE_NEWIPC);
    pub const USER: Self = Self(CloneFlags::CLONE_NEWUSER);
    pub const PID: Self = Self(CloneFlags::CLONE_NEWPID);
    pub const NET: Self = Self(CloneFlags::CLONE_NEWNET);

    pub const fn empty() -> Self {
        Self(CloneFlags::empty())
    }

    /// Every supported namespace.
    pub fn all() -> Self {
        ENTRY_ORDER
            .iter()
            .fold(Self::empty(), |acc, (flag, _, _)| acc.union(Self(*flag)))
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0.contains(other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }

    /// The raw clone flags.
    pub fn flags(self) -> CloneFlags {
        self.0
    }

    /// Parse a list of namespace names.
    ///
    /// `ns` is accepted as an alias for `mount`; names are case-insensitive.
    pub fn parse<I, S>(names: I) -> NsattachResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for name in names {
            set = set.union(Self::from_name(name.as_ref())?);
        }
        Ok(set)
    }

    fn from_name(name: &str) -> NsattachResult<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        if lowered == ns_names::MOUNT_ALIAS {
            return Ok(Self::MOUNT);
        }
        ENTRY_ORDER
            .iter()
            .find(|(_, _, display)| *display == lowered)
            .map(|(flag, _, _)| Self(*flag))
            .ok_or_else(|| NsattachError::InvalidArgument(format!("invalid namespace: {}", name)))
    }

    /// Member namespaces in entry order, with their procfs file names.
    pub(crate) fn entries(self) -> impl Iterator<Item = (CloneFlags, &'static str)> {
        ENTRY_ORDER
            .into_iter()
            .filter(move |(flag, _, _)| self.0.contains(*flag))
            .map(|(flag, proc_name, _)| (flag, proc_name))
    }

    /// Display names of the member namespaces.
    pub fn names(self) -> Vec<&'static str> {
        ENTRY_ORDER
            .iter()
            .filter(|(flag, _, _)| self.0.contains(*flag))
            .map(|(_, _, display)| *display)
            .collect()
    }
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

/// Comma-separated list, e.g. `mount,pid`.
impl FromStr for NamespaceSet {
    type Err = NsattachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.split(',').filter(|part| !part.trim().is_empty()))
    }
}
