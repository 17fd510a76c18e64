// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup for the extension's own diagnostics.
//!
//! Extension output ends up in the same CloudWatch stream as the function's
//! logs, so every line carries a fixed prefix that makes it easy to filter:
//!
//! ```text
//! LOGZIO_EXTENSION | INFO | run_cycle{cycle=2}: LOGS | Batch sent without errors
//! LOGZIO_EXTENSION | ERROR | run_cycle{cycle=3}: LOGS | Logz.io listener internal error, requeueing batch range [0, 4]
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::log_level::LogLevel;

pub const LOG_PREFIX: &str = "LOGZIO_EXTENSION";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs the global subscriber at `level`.
///
/// Returns an error if the filter cannot be built or a global subscriber is
/// already set.
pub fn init(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(level.filter_directive())?)
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_formatter_prefixes_lines() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(capture.clone())
            .with_ansi(false)
            .event_format(Formatter)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("engine", cycle = 3);
            let _guard = span.enter();
            tracing::warn!("Completion timeout reached");
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            output,
            "LOGZIO_EXTENSION | WARN | engine{cycle=3}: Completion timeout reached\n"
        );
    }
}
