//! Tracing subscriber setup.

use nsattach_shared::constants::envs as const_envs;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "warn";

/// Install a stderr fmt subscriber.
///
/// The filter is `filter` when given, otherwise `NSATTACH_LOG`, otherwise
/// `RUST_LOG`, otherwise "warn". Safe to call more than once; only the
/// first call installs a subscriber.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = filter
        .map(EnvFilter::try_new)
        .or_else(|| std::env::var(const_envs::LOG).ok().map(EnvFilter::try_new))
        .and_then(Result::ok)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
}
