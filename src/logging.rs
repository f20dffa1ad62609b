//! RT-safe logging.
//!
//! # Architecture
//!
//! ```text
//! RT Thread              LogStream            Background Thread
//! ──────────             ─────────            ─────────────────
//!
//! rt_log!() ──────────▶ [L0][L1][L2] ──────▶ forward_to_log()
//! ~100ns                  lock-free           log facade
//! non-blocking            ring buffer         (EspLogger / env_logger)
//! ```
//!
//! # Rules
//!
//! - The RT path never calls a blocking log function
//! - `log::info!`, `println!` and friends are for background threads only
//! - The RT path uses the `rt_*!` macros
//! - Messages are dropped (and counted) when the ring is full

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

/// Maximum message length.
pub const MAX_MSG_LEN: usize = 120;

/// Log buffer size (number of entries).
pub const LOG_BUFFER_SIZE: usize = 256;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Matching level of the `log` facade.
    pub fn to_log(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// A single log entry.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct LogEntry {
    /// Timestamp in microseconds.
    pub timestamp_us: i64,
    pub level: LogLevel,
    /// Message length.
    pub len: u8,
    /// Message bytes (not null-terminated).
    pub msg: [u8; MAX_MSG_LEN],
}

impl LogEntry {
    const EMPTY: Self = Self {
        timestamp_us: 0,
        level: LogLevel::Info,
        len: 0,
        msg: [0; MAX_MSG_LEN],
    };

    /// Message text. A multi-byte character cut by truncation is dropped.
    pub fn message(&self) -> &str {
        let bytes = &self.msg[..self.len as usize];
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl Default for LogEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Lock-free log ring (multiple producers, single consumer).
///
/// - Producers claim an index with a CAS, so a dropped message never
///   consumes a slot
/// - Each slot carries a commit stamp; the drain side only reads committed
///   entries
/// - Push never blocks (drops the message if full)
pub struct LogStream<const N: usize = LOG_BUFFER_SIZE> {
    entries: UnsafeCell<[LogEntry; N]>,
    /// `idx + 1` once the entry for logical index `idx` is fully written.
    commits: [AtomicU32; N],
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    dropped: AtomicU32,
}

// SAFETY: A slot is written only by the producer that claimed its index
// through `write_idx`, and read only by the drain side after the commit
// stamp is published. The full check keeps producers off slots not yet
// drained.
unsafe impl<const N: usize> Sync for LogStream<N> {}
unsafe impl<const N: usize> Send for LogStream<N> {}

impl<const N: usize> LogStream<N> {
    const MASK: usize = N - 1;

    /// Create a new empty log stream.
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "Log buffer size must be power of 2");

        const UNCOMMITTED: AtomicU32 = AtomicU32::new(0);

        Self {
            entries: UnsafeCell::new([LogEntry::EMPTY; N]),
            commits: [UNCOMMITTED; N],
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Push a log entry (RT-safe, never blocks).
    ///
    /// Returns `true` if the message was queued, `false` if dropped.
    #[inline]
    pub fn push(&self, timestamp_us: i64, level: LogLevel, msg: &[u8]) -> bool {
        let mut write = self.write_idx.load(Ordering::Relaxed);
        loop {
            let read = self.read_idx.load(Ordering::Acquire);
            if write.wrapping_sub(read) >= N as u32 {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            match self.write_idx.compare_exchange_weak(
                write,
                write.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => write = current,
            }
        }

        let idx = (write as usize) & Self::MASK;
        let len = msg.len().min(MAX_MSG_LEN);

        // SAFETY: index `write` was claimed by this producer alone, and the
        // drain side has already released this slot (full check above).
        unsafe {
            let entry = &mut (*self.entries.get())[idx];
            entry.timestamp_us = timestamp_us;
            entry.level = level;
            entry.len = len as u8;
            entry.msg[..len].copy_from_slice(&msg[..len]);
        }

        self.commits[idx].store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Drain the next entry (single consumer).
    ///
    /// Returns `None` if nothing is committed yet.
    #[inline]
    pub fn drain(&self) -> Option<LogEntry> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let idx = (read as usize) & Self::MASK;

        if self.commits[idx].load(Ordering::Acquire) != read.wrapping_add(1) {
            return None;
        }

        // SAFETY: committed and not yet released to producers.
        let entry = unsafe { (*self.entries.get())[idx] };

        self.read_idx.store(read.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    /// Messages dropped because the ring was full.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reset dropped counter (e.g., after reporting).
    #[inline]
    pub fn reset_dropped(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn has_entries(&self) -> bool {
        self.pending() != 0
    }

    /// Entries claimed but not yet drained.
    #[inline]
    pub fn pending(&self) -> u32 {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<const N: usize> Default for LogStream<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a message into a buffer, truncating at its end.
///
/// Returns the number of bytes written.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: core::fmt::Arguments<'_>) -> usize {
    use core::fmt::Write;

    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl Write for BufWriter<'_> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            let to_write = bytes.len().min(self.buf.len() - self.pos);
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
            Ok(())
        }
    }

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = core::fmt::write(&mut writer, args);
    writer.pos
}

/// Drain `stream` into the `log` facade (background thread only).
///
/// Entries go out under the `rt` target with their RT timestamp. Returns
/// the number of entries forwarded. Drops since the last call are reported
/// once and the counter is reset.
pub fn forward_to_log<const N: usize>(stream: &LogStream<N>) -> usize {
    let mut forwarded = 0;
    while let Some(entry) = stream.drain() {
        log::log!(
            target: "rt",
            entry.level.to_log(),
            "[{:>10}] {}",
            entry.timestamp_us,
            entry.message()
        );
        forwarded += 1;
    }

    let dropped = stream.dropped();
    if dropped > 0 {
        log::warn!(target: "rt", "{} RT log messages dropped", dropped);
        stream.reset_dropped();
    }
    forwarded
}

/// RT-safe log macro.
///
/// Use this in the RT path instead of `log::info!`, `println!`, etc.
///
/// # Example
///
/// ```
/// use cw_keyer_core::logging::{LogLevel, LogStream};
/// use cw_keyer_core::rt_log;
///
/// let stream: LogStream<8> = LogStream::new();
/// rt_log!(LogLevel::Info, stream, 1_000, "wpm {}", 25);
/// assert_eq!(stream.drain().unwrap().message(), "wpm 25");
/// ```
#[macro_export]
macro_rules! rt_log {
    ($level:expr, $stream:expr, $timestamp:expr, $($arg:tt)*) => {{
        let mut buf = [0u8; $crate::logging::MAX_MSG_LEN];
        let len = $crate::logging::format_to_buffer(&mut buf, format_args!($($arg)*));
        $stream.push($timestamp, $level, &buf[..len]);
    }};
}

/// RT-safe info log.
#[macro_export]
macro_rules! rt_info {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Info, $stream, $timestamp, $($arg)*)
    };
}

/// RT-safe warning log.
#[macro_export]
macro_rules! rt_warn {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Warn, $stream, $timestamp, $($arg)*)
    };
}

/// RT-safe error log.
#[macro_export]
macro_rules! rt_error {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Error, $stream, $timestamp, $($arg)*)
    };
}

/// RT-safe debug log.
#[macro_export]
macro_rules! rt_debug {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Debug, $stream, $timestamp, $($arg)*)
    };
}

/// RT-safe trace log (maximum verbosity).
#[macro_export]
macro_rules! rt_trace {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Trace, $stream, $timestamp, $($arg)*)
    };
}

/// Log stream for the calling core.
///
/// - Core 0 → `RT_LOG_STREAM` (RT thread)
/// - Core 1 → `BG_LOG_STREAM` (best-effort threads)
#[cfg(target_os = "espidf")]
#[inline]
pub fn current_log_stream() -> &'static LogStream {
    // SAFETY: plain FreeRTOS queries on the calling task.
    unsafe {
        let task = esp_idf_svc::sys::xTaskGetCurrentTaskHandle();
        if esp_idf_svc::sys::xTaskGetCoreID(task) == 0 {
            &crate::RT_LOG_STREAM
        } else {
            &crate::BG_LOG_STREAM
        }
    }
}

/// Host builds have no core pinning: everything is background.
#[cfg(not(target_os = "espidf"))]
#[inline]
pub fn current_log_stream() -> &'static LogStream {
    &crate::BG_LOG_STREAM
}
