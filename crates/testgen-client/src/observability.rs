use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing::Span;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter used when neither `TESTGEN_LOG_LEVEL` nor `RUST_LOG` parses.
pub const DEFAULT_FILTER: &str = "testgen_client=info";

const DEFAULT_LOG_FILE: &str = "testgen-client.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where log lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr.
    Console,
    /// One JSON object per line, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

/// Subscriber settings resolved from `TESTGEN_*` variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub filter: String,
    pub output: LogOutput,
}

impl ObservabilitySettings {
    /// Resolves settings through `lookup`; `None` means logging is switched off.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let enabled = lookup("TESTGEN_OBSERVABILITY_ENABLED")
            .and_then(|v| parse_bool_env(&v))
            .unwrap_or(true);
        if !enabled {
            return None;
        }

        let filter = ["TESTGEN_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .find(|directive| !directive.trim().is_empty() && EnvFilter::try_new(directive).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let output = match lookup("TESTGEN_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
            None => LogOutput::Console,
            Some(raw) => {
                let path = PathBuf::from(raw);
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or_else(|| PathBuf::from("."), PathBuf::from);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE)
                    .to_string();
                LogOutput::JsonFile { dir, file_name }
            }
        };

        Some(Self { filter, output })
    }

    pub fn from_env() -> Option<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// JSONL layer; the current span's `session_id` and `model` land on every line.
fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_writer(writer)
}

/// Root span for every request a session makes.
pub(crate) fn session_span(session_id: &str, model_name: &str) -> Span {
    tracing::info_span!("testgen_session", session_id = %session_id, model = %model_name)
}

/// Initialize tracing once per process.
///
/// Environment variables:
/// - `TESTGEN_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `TESTGEN_LOG_LEVEL`: optional filter (`debug`, `testgen_client=trace`, ...).
/// - `RUST_LOG`: fallback filter when `TESTGEN_LOG_LEVEL` is unset or invalid.
/// - `TESTGEN_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file,
///   otherwise they go to stderr in a compact console format.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let Some(settings) = ObservabilitySettings::from_env() else {
            return;
        };
        let env_filter =
            EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        match settings.output {
            LogOutput::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer(writer))
                    .try_init();
            }
            LogOutput::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
