// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{env, io::IsTerminal, sync::Mutex};

use bon::Builder;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// Lets configuration sources spell "use the default" as `""` as well as by
/// leaving the field out.
///
/// # Errors
/// Returns an error if the non-empty string does not deserialize into `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// Filter used when neither [`LoggingOptions::level`] nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for hourly-rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default, into)]
    pub dir: String,

    /// Filter directives such as `"info"` or `"info,keyq_server=debug"`.
    /// Falls back to `RUST_LOG`, then to `info`.
    #[builder(into)]
    pub level: Option<String>,

    /// Output format for every log sink.
    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per sink (720 hourly files is 30 days).
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Also write to stdout when file logging is enabled.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

/// Available log output formats.
#[derive(
    Clone,
    Debug,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    derive_more::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, with the current span and span list.
    #[display("json")]
    Json,

    /// Human-readable lines.
    #[default]
    #[display("text")]
    Text,
}

static UT_LOG_GUARDS: OnceCell<Mutex<Vec<WorkerGuard>>> = OnceCell::new();

/// Initialize logging for unit tests. Safe to call from every test.
///
/// Honors `UNITTEST_LOG_DIR` (default `/tmp/__keyq_unittest_logs`) and
/// `UNITTEST_LOG_LEVEL`.
pub fn init_default_ut_logging() {
    UT_LOG_GUARDS.get_or_init(|| {
        let dir = env::var("UNITTEST_LOG_DIR")
            .unwrap_or_else(|_| "/tmp/__keyq_unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,hyper=warn,tower=warn,reqwest=warn,h2=info".to_string());
        let opts = LoggingOptions::builder().dir(dir.clone()).level(level).build();
        let guards = init_global_logging("unittest", &opts);
        tracing::info!("logs dir = {}", dir);
        Mutex::new(guards)
    });
}

/// Install the global tracing subscriber.
///
/// Layers, depending on `opts`:
/// - stdout, when `append_stdout` is set
/// - `{dir}/{app_name}.*`, hourly rotation, all levels
/// - `{dir}/{app_name}-err.*`, hourly rotation, errors only
///
/// Only the first call has any effect; later calls return no guards. The
/// returned guards flush the non-blocking writers when dropped.
///
/// # Panics
/// Panics if the log directory cannot be used, if the level string does not
/// parse, or if another global subscriber is already installed. Logging is
/// set up before anything else, so these surface at startup.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: std::sync::Once = std::sync::Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            fmt_layer(writer, opts.log_format, std::io::stdout().is_terminal())
        });

        let file_layer = (!opts.dir.is_empty()).then(|| {
            let appender = rolling_appender(&opts.dir, app_name, opts.max_log_files);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            fmt_layer(writer, opts.log_format, false)
        });

        let err_file_layer = (!opts.dir.is_empty()).then(|| {
            let prefix = format!("{app_name}-err");
            let appender = rolling_appender(&opts.dir, &prefix, opts.max_log_files);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            fmt_layer(writer, opts.log_format, false).with_filter(filter::LevelFilter::ERROR)
        });

        let level = opts
            .level
            .clone()
            .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
            .unwrap_or_else(|| DEFAULT_LOG_TARGETS.to_string());
        let targets = level
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let subscriber = Registry::default()
            .with(targets)
            .with(stdout_layer)
            .with(file_layer)
            .with(err_file_layer);
        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}

fn rolling_appender(dir: &str, prefix: &str, max_log_files: usize) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(max_log_files)
        .build(dir)
        .unwrap_or_else(|e| panic!("initializing rolling file appender at {dir} failed: {e}"))
}

fn fmt_layer<S>(
    writer: NonBlocking,
    format: LogFormat,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    match format {
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_log_text_to_stdout_only() {
        let opts = LoggingOptions::default();
        assert!(opts.dir.is_empty());
        assert!(opts.append_stdout);
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.max_log_files, 720);
        assert_eq!(opts, LoggingOptions::builder().build());
    }

    #[test]
    fn empty_log_format_falls_back_to_default() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"log_format": "", "level": "debug"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.level.as_deref(), Some("debug"));

        let opts: LoggingOptions = serde_json::from_str(r#"{"log_format": "json"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let result = serde_json::from_str::<LoggingOptions>(r#"{"log_format": "xml"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn log_format_parses_from_cli_spelling() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}
