//! Logging infrastructure - structured tracing throughout the binder
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Stable `event = "..."` fields for code generation and memory events
//! - Console or rolling file output

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer flushing for the process lifetime
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when absent
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // DYNBIND_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("DYNBIND_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // DYNBIND_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("DYNBIND_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("DYNBIND_LOG_JSON").is_ok();
        config.show_spans = std::env::var("DYNBIND_LOG_SPANS").is_ok();

        config
    }

    /// Minimal logging for hot call paths
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Verbose logging including emitted stub bytes
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some("dynbind.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Idempotent; a subscriber installed by the host application wins.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("dynbind={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = match &config.log_path {
            Some(path) => {
                let path = Path::new(path);
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
                let file = path.file_name().map(|f| f.to_os_string()).unwrap_or_else(|| "dynbind.log".into());
                let appender = tracing_appender::rolling::never(dir, file);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                let base = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(span_events);
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
            None => {
                let base = fmt::layer()
                    .with_writer(io::stderr)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_thread_ids(cfg!(debug_assertions))
                    .with_line_number(cfg!(debug_assertions));
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
        };

        // Host may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Binder-specific logging functions
// ============================================================================

/// Log strategy selection for a signature
pub fn log_strategy_selected(function: &str, strategy: &str) {
    use tracing::debug;
    debug!(
        event = "strategy_selected",
        function = function,
        strategy = strategy,
        "Invocation strategy selected"
    );
}

/// Log a construction failure that turned an entry point into a failing stub
pub fn log_binding_failure(function: &str, error: &str) {
    use tracing::warn;
    warn!(
        event = "binding_failure",
        function = function,
        error = error,
        "Function bound to failing entry point"
    );
}

/// Log a compiled machine-code stub
pub fn log_stub_compiled(function: &str, address: usize, size: usize) {
    use tracing::debug;
    debug!(
        event = "stub_compiled",
        function = function,
        address = format_args!("{:#x}", address),
        size_bytes = size,
        "Call stub installed"
    );
}

/// Dump stub bytes (trace level only)
pub fn log_stub_bytes(function: &str, code: &[u8]) {
    use tracing::trace;
    if tracing::enabled!(Level::TRACE) {
        let hex: Vec<String> = code.iter().map(|b| format!("{:02x}", b)).collect();
        trace!(
            event = "stub_bytes",
            function = function,
            code = %hex.join(" "),
            "Call stub code"
        );
    }
}

/// Log page block allocation
pub fn log_page_alloc(address: usize, pages: usize) {
    use tracing::debug;
    debug!(
        event = "page_alloc",
        address = format_args!("{:#x}", address),
        pages = pages,
        "Executable pages allocated"
    );
}

/// Log page block release
pub fn log_page_free(address: usize, pages: usize) {
    use tracing::debug;
    debug!(
        event = "page_free",
        address = format_args!("{:#x}", address),
        pages = pages,
        "Executable pages released"
    );
}

/// Log magazine allocation
pub fn log_magazine_alloc(slots: usize, pages: usize) {
    use tracing::debug;
    debug!(
        event = "magazine_alloc",
        slots = slots,
        pages = pages,
        "Closure magazine allocated"
    );
}

/// Log closure slot assignment
#[inline]
pub fn log_closure_alloc(address: usize, recycled: bool) {
    use tracing::trace;
    trace!(
        event = "closure_alloc",
        address = format_args!("{:#x}", address),
        recycled = recycled,
        "Closure slot assigned"
    );
}

/// Log closure slot reclamation
#[inline]
pub fn log_closure_reclaimed(address: usize) {
    use tracing::trace;
    trace!(
        event = "closure_reclaimed",
        address = format_args!("{:#x}", address),
        "Closure slot returned to free list"
    );
}

/// Log a callback that failed inside native code
pub fn log_closure_error(address: usize, error: &str) {
    use tracing::error;
    error!(
        event = "closure_error",
        address = format_args!("{:#x}", address),
        error = error,
        "Closure callback failed; returning zero"
    );
}

/// Log native call entry
#[inline]
pub fn log_native_call(function: &str, arg_count: usize) {
    use tracing::trace;
    trace!(
        event = "native_call",
        function = function,
        args = arg_count,
        "Native function called"
    );
}

/// Log text buffer growth during encoding
#[inline]
pub fn log_buffer_grow(from: usize, to: usize) {
    use tracing::trace;
    trace!(
        event = "buffer_grow",
        from = from,
        to = to,
        "Encode buffer expanded"
    );
}

/// Timing guards for coarse binder operations
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Guard logging the elapsed time of `operation` when dropped
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                event = "timing",
                operation = self.operation,
                elapsed_us = self.start.elapsed().as_micros() as u64,
                "Operation finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_path.is_none());

        let perf_config = LogConfig::performance();
        assert_eq!(perf_config.level, Level::ERROR);

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert!(debug_config.show_spans);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::performance());
        init(); // Should not panic
        assert!(is_initialized());
    }

    #[test]
    fn test_logging_functions() {
        log_strategy_selected("abs", "fast-int");
        log_stub_compiled("abs", 0x1000, 32);
        log_stub_bytes("abs", &[0x53, 0xc3]);
        log_page_alloc(0x1000, 1);
        log_page_free(0x1000, 1);
        log_magazine_alloc(64, 1);
        log_closure_alloc(0x2000, false);
        log_closure_reclaimed(0x2000);
        log_native_call("abs", 1);
        let _guard = perf::track("test");
    }
}
