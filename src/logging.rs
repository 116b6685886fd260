use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber on stderr. Stdout stays free for
/// hook output.
///
/// * `default_filter` -- used when `RUST_LOG` is not set (e.g. `"stopkran=info"`).
/// * `log_json` -- emit JSON lines instead of the human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if log_json {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    }
}
