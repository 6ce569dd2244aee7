use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::ProgressStyle;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing::Metadata;
use tracing::level_filters::LevelFilter;
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Crate prefix of the spans drawn as progress spinners.
const PROGRESS_TARGET: &str = "bmdware_hil::";
const SPINNER_TICK: Duration = Duration::from_millis(90);

/// Sets up logging to stderr plus an OpenTelemetry tracer.
///
/// An explicit `level` wins over `RUST_LOG`; without either only warnings and
/// errors are logged. On an interactive terminal, spans flagged with
/// `progress` draw a spinner and logs are pretty-printed; otherwise logs are
/// JSON lines. Only the first call in a process has any effect.
pub(crate) fn initialise_tracing(
    service_name: &str,
    interactive_terminal: bool,
    level: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| {
            let tracer = install_tracer(service_name);
            let levels = log_filter(level);
            if interactive_terminal && io::stderr().is_terminal() {
                interactive_subscriber(levels, tracer)
            } else {
                json_subscriber(levels, tracer)
            }
        })
        .as_ref()
        .copied()
}

fn log_filter(level: Option<LevelFilter>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

fn install_tracer(service_name: &str) -> SdkTracer {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(service_name.to_owned());
    global::set_tracer_provider(provider);
    tracer
}

fn interactive_subscriber(levels: EnvFilter, tracer: SdkTracer) -> Result<(), TelemetryError> {
    let spinners = IndicatifLayer::new()
        .with_progress_style(spinner_style())
        .with_tick_settings(TickSettings {
            default_tick_interval: Some(SPINNER_TICK),
            ..TickSettings::default()
        });
    let logs = fmt::layer()
        .pretty()
        .with_target(false)
        .with_writer(spinners.get_stderr_writer());

    tracing_subscriber::registry()
        .with(logs.with_filter(levels))
        .with(spinners.with_filter(filter::filter_fn(is_progress_span)))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

fn json_subscriber(levels: EnvFilter, tracer: SdkTracer) -> Result<(), TelemetryError> {
    let logs = fmt::layer()
        .json()
        .with_target(false)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(logs.with_filter(levels))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

fn is_progress_span(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with(PROGRESS_TARGET)
        && metadata.fields().field("progress").is_some()
        && *metadata.level() <= tracing::Level::INFO
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn explicit_level_overrides_the_environment() {
        assert_eq!("debug", log_filter(Some(LevelFilter::DEBUG)).to_string());
    }

    #[test]
    fn spinner_template_parses() {
        assert!(ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed:.dim}").is_ok());
    }
}
