// Logging System for Starling
//
// This module provides a unified logging interface for Starling nodes.
// It's built on top of the `tracing` ecosystem: every component emits events
// through `tracing`, and the subscriber installed here is the sink they are
// injected into.
//
// Formatting never blocks the caller. Formatted lines are pushed into a bounded
// channel and written out by a background drain thread; when the buffer is full
// the line is dropped and counted (see `dropped_lines`).
//
// # Usage Examples
//
// ```rust
// use starling::logging;
//
// // Initialize with default settings (INFO level, console output)
// logging::init_default()?;
//
// // Development: DEBUG level, starling::scheduler at TRACE
// logging::init_development()?;
//
// // Production: JSON output, no file/line info
// logging::init_production()?;
//
// // Spans and structured events
// let span = starling::node_span!("acme:billing:a1");
// let _guard = span.enter();
// starling::log_lifecycle!("acme:billing:a1", "initialized");
// ```

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

/// Default number of formatted lines buffered ahead of the drain thread.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;

/// Configuration for the Starling logging system
///
/// # Examples
///
/// ```rust
/// use starling::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     json_format: true,
///     target_filters: Some("starling=debug,starling::scheduler=trace".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
    /// Lines buffered ahead of the drain thread before new lines are dropped
    pub buffer_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

static DROPPED_LINES: AtomicU64 = AtomicU64::new(0);

/// Number of log lines dropped because the buffer was full.
pub fn dropped_lines() -> u64 {
    DROPPED_LINES.load(Ordering::Relaxed)
}

/// Non-blocking `MakeWriter` that hands formatted lines to a drain thread.
#[derive(Debug, Clone)]
pub struct BufferedWriter {
    lines: flume::Sender<Vec<u8>>,
}

impl BufferedWriter {
    /// Spawns the drain thread writing into `sink`.
    pub fn spawn<W>(mut sink: W, capacity: usize) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = flume::bounded::<Vec<u8>>(capacity.max(1));
        std::thread::Builder::new()
            .name("starling-log-drain".to_string())
            .spawn(move || {
                for line in rx.iter() {
                    if sink.write_all(&line).is_err() {
                        continue;
                    }
                    if rx.is_empty() {
                        let _ = sink.flush();
                    }
                }
                let _ = sink.flush();
            })?;
        Ok(Self { lines: tx })
    }
}

/// One formatted event; queued for the drain thread when dropped.
pub struct BufferedLine {
    buf: Vec<u8>,
    lines: flume::Sender<Vec<u8>>,
}

impl Write for BufferedLine {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BufferedLine {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.buf);
        if self.lines.try_send(line).is_err() {
            DROPPED_LINES.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<'a> MakeWriter<'a> for BufferedWriter {
    type Writer = BufferedLine;

    fn make_writer(&'a self) -> Self::Writer {
        BufferedLine {
            buf: Vec::new(),
            lines: self.lines.clone(),
        }
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    // Add any target-specific filters if provided
    if let Some(filters) = &config.target_filters {
        for filter in filters.split(',') {
            if let Ok(directive) = filter.trim().parse() {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }
    env_filter
}

/// Initialize the logging system with the given configuration
///
/// Only the first successful call installs a subscriber; later calls are no-ops.
pub fn init(config: LogConfig) -> io::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = install_console(config);
    });
    result
}

fn install_console(config: LogConfig) -> io::Result<()> {
    let writer = BufferedWriter::spawn(io::stdout(), config.buffer_capacity)?;
    let registry = tracing_subscriber::registry().with(env_filter(&config));

    let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
        Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_thread_names(config.show_thread_info)
                    .with_thread_ids(config.show_thread_info)
                    .with_writer(writer),
            ),
        )
    } else {
        let layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info)
            .with_writer(writer);
        if config.show_time {
            Box::new(registry.with(layer))
        } else {
            Box::new(registry.with(layer.without_time()))
        }
    };

    set_global_subscriber(subscriber);
    Ok(())
}

// Helper function to set the global subscriber
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Initialize logging with both console and file output
///
/// Console output respects the ansi color setting, while file output is always plain.
/// Both outputs go through their own drain thread.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = install_with_file(config, log_file);
    });
    result
}

fn install_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    let console_writer = BufferedWriter::spawn(io::stdout(), config.buffer_capacity)?;
    let file_writer = BufferedWriter::spawn(file, config.buffer_capacity)?;

    let console_layer = fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info)
        .with_writer(console_writer);

    let file_layer = fmt::layer()
        .with_ansi(false) // No ANSI colors in files
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_writer(file_writer);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter(&config))
        .with(console_layer)
        .with(file_layer);

    set_global_subscriber(subscriber);
    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() -> io::Result<()> {
    init(LogConfig::default())
}

/// Detailed, colored output for development.
///
/// DEBUG for every Starling module and TRACE for the scheduler.
pub fn init_development() -> io::Result<()> {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("starling=debug,starling::scheduler=trace".to_string()),
        ..Default::default()
    })
}

/// JSON output for log aggregators, without file/line information.
pub fn init_production() -> io::Result<()> {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
        buffer_capacity: DEFAULT_BUFFER_CAPACITY,
    })
}

/// Only warnings and errors, compact, to keep test output clean.
pub fn init_test() -> io::Result<()> {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
        buffer_capacity: DEFAULT_BUFFER_CAPACITY,
    })
}

/// Create a span for operations performed on behalf of one node
///
/// ```rust
/// let span = starling::node_span!("acme:billing:a1");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! node_span {
    ($address:expr) => {
        tracing::info_span!("node", address = %$address)
    };
    ($address:expr, $($fields:tt)*) => {
        tracing::info_span!("node", address = %$address, $($fields)*)
    };
}

/// Create a span for handling one request
#[macro_export]
macro_rules! request_span {
    ($request_type:expr, $request_id:expr) => {
        tracing::debug_span!("request", request_type = %$request_type, request_id = %$request_id)
    };
    ($request_type:expr, $request_id:expr, $($fields:tt)*) => {
        tracing::debug_span!("request", request_type = %$request_type, request_id = %$request_id, $($fields)*)
    };
}

/// Log node lifecycle events - use for important node state changes
///
/// ```rust
/// starling::log_lifecycle!("acme:billing:a1", "stopped", reason = "shutdown");
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($address:expr, $event:expr) => {
        tracing::info!(address = %$address, event = $event)
    };
    ($address:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(address = %$address, event = $event, $($fields)*)
    };
}

/// Log request/response traffic - use for detailed message handling
#[macro_export]
macro_rules! log_request {
    ($request_type:expr, $status:expr) => {
        tracing::debug!(request_type = %$request_type, status = $status)
    };
    ($request_type:expr, $status:expr, $($fields:tt)*) => {
        tracing::debug!(request_type = %$request_type, status = $status, $($fields)*)
    };
}

/// Log scheduling events
#[macro_export]
macro_rules! log_scheduler {
    ($scheduler:expr, $event:expr) => {
        tracing::trace!(scheduler = $scheduler, event = $event)
    };
    ($scheduler:expr, $event:expr, $($fields:tt)*) => {
        tracing::trace!(scheduler = $scheduler, event = $event, $($fields)*)
    };
}

/// Log error events - use for all error conditions
///
/// ```rust
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
/// starling::log_error!(error, component = "transport");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*)
    };
}

/// Get the current tracing dispatcher
///
/// Useful when spawning OS threads that need the same logging configuration.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

// Re-export the most commonly used tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
