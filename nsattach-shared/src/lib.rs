//! nsattach shared types
//!
//! Error taxonomy and constants used by the engine library, the CLI and
//! the test fixtures.

pub mod constants;
pub mod errors;

pub use errors::{NsattachError, NsattachResult};
