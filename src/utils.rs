use indicatif::ProgressStyle;
use indicatif::style::TemplateError;

/// Name of the environment variable holding the log filter directives.
#[cfg(feature = "logging")]
pub const LOG_ENV: &str = "SUIRO_LOG";

/// Installs a global `tracing` subscriber printing to stderr, with progress
/// bars for parallel runs.
///
/// The filter is read from `SUIRO_LOG` and defaults to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}

/// Style of the progress bar attached to parallel runs.
pub(crate) fn progress_style() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}
