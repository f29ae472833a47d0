//! Structured logging setup.
//!
//! All progress messages are `tracing` events. Human-readable output goes
//! through [`PipelineFormatter`], which renders
//! `[timestamp][LABEL] message key=value` using an explicit [`Theme`].
//! A `kind` field of [`SECTION`] or [`SUCCESS`] promotes an INFO event to
//! that label.

use std::fmt;

use anyhow::{Result, anyhow};
use chrono::Local;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

pub const SECTION: &str = "section";
pub const SUCCESS: &str = "success";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Plain,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Bold,
    Dim,
    None,
}

impl Color {
    fn code(self) -> Option<&'static str> {
        match self {
            Color::Black => Some("30"),
            Color::Red => Some("31"),
            Color::Green => Some("32"),
            Color::Yellow => Some("33"),
            Color::Blue => Some("34"),
            Color::Magenta => Some("35"),
            Color::Cyan => Some("36"),
            Color::White => Some("37"),
            Color::Bold => Some("1"),
            Color::Dim => Some("2"),
            Color::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Theme {
    pub color: bool,
    pub timestamp_format: String,
    pub timestamp: Color,
    pub section: Color,
    pub info: Color,
    pub warning: Color,
    pub error: Color,
    pub success: Color,
    pub debug: Color,
    pub fields: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            color: true,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            timestamp: Color::Dim,
            section: Color::Magenta,
            info: Color::Cyan,
            warning: Color::Yellow,
            error: Color::Red,
            success: Color::Green,
            debug: Color::Blue,
            fields: Color::Dim,
        }
    }
}

impl Theme {
    fn paint(&self, enabled: bool, color: Color, text: &str) -> String {
        match color.code() {
            Some(code) if enabled => format!("\x1b[{code}m{text}\x1b[0m"),
            _ => text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Section,
    Success,
    Info,
    Warning,
    Error,
    Debug,
    Trace,
}

impl Label {
    fn resolve(level: &Level, kind: Option<&str>) -> Self {
        if *level == Level::ERROR {
            Label::Error
        } else if *level == Level::WARN {
            Label::Warning
        } else if *level == Level::INFO {
            match kind {
                Some(SECTION) => Label::Section,
                Some(SUCCESS) => Label::Success,
                _ => Label::Info,
            }
        } else if *level == Level::DEBUG {
            Label::Debug
        } else {
            Label::Trace
        }
    }

    fn text(self) -> &'static str {
        match self {
            Label::Section => "SECTION",
            Label::Success => "SUCCESS",
            Label::Info => "INFO",
            Label::Warning => "WARNING",
            Label::Error => "ERROR",
            Label::Debug => "DEBUG",
            Label::Trace => "TRACE",
        }
    }

    fn color(self, theme: &Theme) -> Color {
        match self {
            Label::Section => theme.section,
            Label::Success => theme.success,
            Label::Info => theme.info,
            Label::Warning => theme.warning,
            Label::Error => theme.error,
            Label::Debug | Label::Trace => theme.debug,
        }
    }
}

#[derive(Default)]
struct EventFields {
    message: String,
    kind: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "kind" => self.kind = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "kind" => self.kind = Some(format!("{value:?}").trim_matches('"').to_string()),
            name => self.extra.push((name, format!("{value:?}"))),
        }
    }
}

/// Event formatter used for `pretty` and `plain` output.
#[derive(Debug, Clone, Default)]
pub struct PipelineFormatter {
    theme: Theme,
}

impl PipelineFormatter {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }
}

impl<S, N> FormatEvent<S, N> for PipelineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let theme = &self.theme;
        let ansi = theme.color && writer.has_ansi_escapes();
        let label = Label::resolve(event.metadata().level(), fields.kind.as_deref());
        let timestamp = Local::now().format(&theme.timestamp_format).to_string();

        write!(
            writer,
            "{}{} {}",
            theme.paint(ansi, theme.timestamp, &format!("[{timestamp}]")),
            theme.paint(ansi, label.color(theme), &format!("[{}]", label.text())),
            fields.message
        )?;
        for (name, value) in &fields.extra {
            write!(
                writer,
                " {}",
                theme.paint(ansi, theme.fields, &format!("{name}={value}"))
            )?;
        }
        writeln!(writer)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub theme: Theme,
    pub otlp_endpoint: Option<String>,
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .event_format(PipelineFormatter::new(config.theme.clone()))
            .boxed(),
        LogFormat::Plain => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .event_format(PipelineFormatter::new(config.theme.clone()))
            .boxed(),
    };

    #[cfg(feature = "otel")]
    {
        let otel_layer = match config.otlp_endpoint.as_deref() {
            Some(endpoint) => {
                let tracer = opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                        vec![KeyValue::new("service.name", "srcforge")],
                    )))
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint),
                    )
                    .install_simple()?;
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(filter)
            .with(otel_layer)
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    #[cfg(not(feature = "otel"))]
    {
        if let Some(endpoint) = &config.otlp_endpoint {
            eprintln!(
                "warning: --otlp-endpoint '{endpoint}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel."
            );
        }

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(filter)
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    Ok(())
}

/// Flushes exporters installed by [`init`].
pub fn shutdown(config: &LogConfig) {
    #[cfg(feature = "otel")]
    if config.otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }
    #[cfg(not(feature = "otel"))]
    let _ = config;
}
