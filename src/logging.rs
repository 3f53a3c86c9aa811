use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
/// Logs go to stderr so streamed text on stdout stays clean.
pub fn init_logger(verbose: bool, json: bool) {
    let default = if verbose { "natal_relay=debug,info" } else { "natal_relay=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        registry.with(fmt.json()).init();
    } else {
        registry.with(fmt.compact()).init();
    }
}
