use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initializes the global `tracing` subscriber. JSON to stderr by default;
/// `json = false` switches to the human-readable formatter for local runs.
/// The filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(json: bool) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_log::LogTracer::init()?;
    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(fmt_layer))?;
    } else {
        let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(fmt_layer))?;
    }
    Ok(())
}
