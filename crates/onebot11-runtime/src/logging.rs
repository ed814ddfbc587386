//! Subscriber setup for the `tracing` output of the engine.
//!
//! Most programs never touch this module: [`OneBotRuntime`](crate::OneBotRuntime)
//! calls [`init_from_config`] with the `logging` section of the loaded
//! configuration. Embedders without a config file use [`LoggingBuilder`]:
//!
//! ```rust,ignore
//! use onebot11_runtime::config::LogLevel;
//! use onebot11_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .level(LogLevel::Warn)
//!     .directive("onebot11_core=debug")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LoggingConfig, SpanEventConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const DEFAULT_LOG_FILE: &str = "onebot11.log";

/// Which span lifecycle events are logged.
///
/// The engine opens a `connection` span per managed connection and a
/// `listener` span per subscriber worker; `LIFECYCLE` shows when they come
/// and go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close only.
    pub const LIFECYCLE: Self = Self {
        new: true,
        close: true,
        ..Self::NONE
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, flag)| acc | flag)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        let SpanEventConfig {
            new,
            enter,
            exit,
            close,
        } = *config;
        Self {
            new,
            enter,
            exit,
            close,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// A subscriber installed earlier is left in place.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Programmatic counterpart of [`LoggingConfig`].
#[derive(Debug, Default)]
pub struct LoggingBuilder {
    settings: LoggingConfig,
    /// Extra `EnvFilter` directives, applied after the base level.
    directives: Vec<String>,
    span_events: SpanEvents,
    show_target: bool,
}

impl LoggingBuilder {
    /// Info level, full format on stdout, targets shown.
    pub fn new() -> Self {
        Self {
            show_target: true,
            ..Default::default()
        }
    }

    /// Starts from a configuration section; `filters` become directives.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by_key(|(module, _)| *module);

        Self {
            settings: config.clone(),
            directives: filters
                .into_iter()
                .map(|(module, level)| format!("{module}={level}"))
                .collect(),
            span_events: SpanEvents::from(&config.span_events),
            show_target: true,
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.settings.level = level;
        self
    }

    /// Adds a filter directive such as `onebot11_transport=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.settings.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.settings.output = output;
        self
    }

    /// Writes to `path` instead of a standard stream.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.output = LogOutput::File;
        self.settings.file_path = Some(path.into());
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.settings.thread_ids = enabled;
        self
    }

    /// Shows the source file and line of each event.
    pub fn file_location(mut self, enabled: bool) -> Self {
        self.settings.file_location = enabled;
        self
    }

    /// Shows the module path of each event.
    pub fn target(mut self, enabled: bool) -> Self {
        self.show_target = enabled;
        self
    }

    /// `RUST_LOG` replaces the configured level when set; directives apply
    /// on top of either.
    fn build_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.settings.level.as_str()));

        for directive in &self.directives {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring invalid log directive '{directive}': {e}"),
            }
        }
        filter
    }

    /// Like [`try_init`](Self::try_init), ignoring an existing subscriber.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber; fails if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();

        let mut fallbacks = Vec::new();
        if cfg!(not(feature = "json-log")) && self.settings.format == LogFormat::Json {
            fallbacks.push("JSON logging needs the `json-log` feature, using the full format");
        }

        let layer = match (self.settings.output, &self.settings.file_path) {
            (LogOutput::Stdout, _) => self.fmt_layer(std::io::stdout),
            (LogOutput::Stderr, _) => self.fmt_layer(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                let directory = path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE));
                self.fmt_layer(tracing_appender::rolling::never(directory, file_name))
            }
            (LogOutput::File, None) => {
                fallbacks.push("File output requested but no file path configured, using stdout");
                self.fmt_layer(std::io::stdout)
            }
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()?;

        for message in fallbacks {
            warn!("{message}");
        }
        Ok(())
    }

    fn fmt_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let located = self.settings.file_location;
        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.show_target)
            .with_thread_ids(self.settings.thread_ids)
            .with_file(located)
            .with_line_number(located);

        match self.settings.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => layer.boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_collects_directives() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            thread_ids: true,
            file_location: true,
            ..Default::default()
        };
        config.filters.insert("onebot11_transport".into(), LogLevel::Trace);
        config.filters.insert("onebot11_core".into(), LogLevel::Debug);
        config.span_events.close = true;

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.settings.level, LogLevel::Warn);
        assert_eq!(
            builder.directives,
            ["onebot11_core=debug", "onebot11_transport=trace"]
        );
        assert!(builder.settings.thread_ids);
        assert!(builder.settings.file_location);
        assert_eq!(
            builder.span_events,
            SpanEvents {
                close: true,
                ..SpanEvents::NONE
            }
        );
    }

    #[test]
    fn test_file_setter_switches_output() {
        let builder = LoggingBuilder::new().file("/tmp/onebot11-test.log");
        assert_eq!(builder.settings.output, LogOutput::File);
        assert!(builder.show_target);
    }

    #[test]
    fn test_span_event_flags() {
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
        assert_eq!(SpanEvents::FULL.to_fmt_span(), FmtSpan::FULL);
        assert_eq!(
            SpanEvents::LIFECYCLE.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
    }
}
