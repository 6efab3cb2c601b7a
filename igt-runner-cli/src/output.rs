// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use igt_runner::reporter::ReporterStderr;
use owo_colors::{OwoColorize, Style, style};
use std::{
    fmt,
    io::{self, BufWriter, Write},
    sync::Once,
};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// The environment variable that configures log filtering.
pub const LOG_ENV: &str = "IGT_RUNNER_LOG";

/// Events with this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "igt_runner_cli::no_heading";

#[derive(Copy, Clone, Debug, Default, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        value_name = "WHEN",
        env = "IGT_RUNNER_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let OutputOpts { color } = self;
        init_logger(color.should_colorize());
        OutputContext { color }
    }
}

#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) color: Color,
}

impl OutputContext {
    /// Returns true if the execute reporter should use colors.
    pub(crate) fn should_colorize_reporter(&self) -> bool {
        self.color.should_colorize()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    /// Everything the binaries print in color goes to stderr.
    fn should_colorize(self) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(supports_color::Stream::Stderr).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

static INIT_LOGGER: Once = Once::new();

/// Installs the stderr log subscriber, filtered by [`LOG_ENV`].
fn init_logger(colorize: bool) {
    INIT_LOGGER.call_once(|| {
        let filter = std::env::var(LOG_ENV).unwrap_or_default();
        let default = || Targets::new().with_default(LevelFilter::INFO);
        let (targets, parse_error) = match filter.parse::<Targets>() {
            _ if filter.is_empty() => (default(), None),
            Ok(targets) => (targets, None),
            Err(error) => (default(), Some(error)),
        };

        let layer = tracing_subscriber::fmt::layer()
            .event_format(LevelPrefixFormatter { colorize })
            .with_writer(io::stderr)
            .with_filter(targets);
        tracing_subscriber::registry().with(layer).init();

        if let Some(error) = parse_error {
            tracing::warn!("ignoring invalid {LOG_ENV} value `{filter}`: {error}");
        }
    });
}

/// Formats events as `<level>: <message>`.
struct LevelPrefixFormatter {
    colorize: bool,
}

fn level_heading(level: Level) -> (&'static str, Style) {
    match level {
        Level::ERROR => ("error", style().red().bold()),
        Level::WARN => ("warning", style().yellow().bold()),
        Level::INFO => ("info", style().bold()),
        Level::DEBUG => ("debug", style().bold()),
        Level::TRACE => ("trace", style().dimmed()),
    }
}

impl<S, N> FormatEvent<S, N> for LevelPrefixFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != NO_HEADING_TARGET {
            let (heading, heading_style) = level_heading(*metadata.level());
            let heading_style = if self.colorize {
                heading_style
            } else {
                Style::new()
            };
            write!(writer, "{}: ", heading.style(heading_style))?;
        }

        let mut visitor = MessageVisitor {
            writer: &mut writer,
            result: Ok(()),
        };
        event.record(&mut visitor);
        visitor.result?;
        writeln!(writer)
    }
}

/// Writes only the `message` field; structured fields are left out.
struct MessageVisitor<'writer, 'a> {
    writer: &'a mut format::Writer<'writer>,
    result: fmt::Result,
}

impl Visit for MessageVisitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && self.result.is_ok() {
            self.result = write!(self.writer, "{value:?}");
        }
    }
}

/// Where the binaries write: the real stdout and stderr, or buffers in tests.
#[derive(Default)]
pub enum OutputWriter {
    /// Write to the process's stdout and stderr.
    #[default]
    Normal,
    /// Capture output.
    #[cfg(test)]
    Test {
        /// Captured stdout.
        stdout: Vec<u8>,
        /// Captured stderr.
        stderr: Vec<u8>,
    },
}

impl OutputWriter {
    pub(crate) fn stdout_writer(&mut self) -> Box<dyn Write + '_> {
        match self {
            Self::Normal => Box::new(BufWriter::new(io::stdout())),
            #[cfg(test)]
            Self::Test { stdout, .. } => Box::new(stdout),
        }
    }

    pub(crate) fn reporter_output(&mut self) -> ReporterStderr<'_> {
        match self {
            Self::Normal => ReporterStderr::Terminal,
            #[cfg(test)]
            Self::Test { stderr, .. } => ReporterStderr::Buffer(stderr),
        }
    }
}
