use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Without `debug` the level is pinned to `info` for this crate and `warn`
/// for dependencies, ignoring `RUST_LOG`. With `debug` the default becomes
/// `debug` and `RUST_LOG` may override it. Calling twice is harmless.
pub fn init(debug: bool) {
    let default = if debug {
        "sd_paint=debug,info"
    } else {
        "sd_paint=info,warn"
    };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    } else {
        EnvFilter::new(default)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .try_init();
}
