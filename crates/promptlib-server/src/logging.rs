//! Logging configuration and initialization.
//!
//! Presets pick a baseline per `promptlib::*` target; `--log target=level` overrides win over
//! the preset, and `RUST_LOG` wins over both. Output is plain text or JSON lines.

use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const TARGET_PREFIX: &str = "promptlib::";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

/// Logging preset levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Startup, API and turn lifecycle at info; per-delta tracing off.
    #[default]
    Production,
    Verbose,
    /// Everything at debug except keepalives.
    Debug,
    /// Includes per-delta and per-chunk events.
    Trace,
    /// Warnings and errors only.
    Quiet,
}

/// Logging configuration built from CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Per-target level overrides keyed by full target, e.g. "promptlib::stream".
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Build from CLI flags. When several preset flags are set, quiet beats trace beats debug
    /// beats verbose.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        // "stream=debug,store=trace" or repeated flags
        let mut overrides = HashMap::new();
        for override_str in log_overrides {
            for part in override_str.split(',') {
                let Some((target, level_str)) = part.split_once('=') else {
                    continue;
                };
                let target = target.trim();
                let full_target = if target.starts_with(TARGET_PREFIX) || target == "tower_http" {
                    target.to_string()
                } else {
                    format!("{}{}", TARGET_PREFIX, target)
                };

                if let Some(level) = parse_level(level_str.trim()) {
                    overrides.insert(full_target, level);
                }
            }
        }

        Self {
            preset,
            overrides,
            format,
        }
    }

    fn preset_directives(&self) -> Vec<String> {
        let directives: &[&str] = match self.preset {
            LogPreset::Production => &[
                "promptlib::startup=info",
                "promptlib::api=info",
                "promptlib::ws=info",
                "promptlib::ws::ping=off",
                "promptlib::stream=info",
                "promptlib::reconcile=info",
                "promptlib::store=info",
                "promptlib::provider=warn",
                "promptlib::notify=warn",
                "tower_http=warn",
            ],
            LogPreset::Verbose => &[
                "promptlib=info",
                "promptlib::provider=info",
                "promptlib::ws::ping=off",
                "tower_http=info",
            ],
            LogPreset::Debug => &["promptlib=debug", "promptlib::ws::ping=off", "tower_http=debug"],
            LogPreset::Trace => &["promptlib=trace", "tower_http=trace"],
            LogPreset::Quiet => &["promptlib=warn", "tower_http=error"],
        };
        directives.iter().map(|d| d.to_string()).collect()
    }

    /// Filter directive string for this configuration, ignoring `RUST_LOG`.
    pub fn directives(&self) -> String {
        let mut directives = self.preset_directives();
        let mut overrides: Vec<_> = self.overrides.iter().collect();
        overrides.sort();
        for (target, level) in overrides {
            directives.push(format!("{}={}", target, level_to_str(*level)));
        }
        directives.join(",")
    }

    /// Build an EnvFilter. `RUST_LOG` takes precedence when set.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }

        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }
}
