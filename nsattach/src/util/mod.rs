//! Low-level helpers shared by the engine modules.

pub(crate) mod cstr;
pub(crate) mod exec;
pub(crate) mod process;
pub(crate) mod raw;

pub use process::signal_name;
