pub mod attach;
pub mod cat;
pub mod cgroup;
pub mod clone;
pub mod config;
pub mod create;
pub mod destroy;
pub mod info;
pub mod start;
pub mod stop;
pub mod version;
