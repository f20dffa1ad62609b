//! Global RT log streams, one producer side per core.

use crate::logging::LogStream;

/// Log stream written by the keying loop only.
pub static RT_LOG_STREAM: LogStream = LogStream::new();

/// Log stream shared by the best-effort threads (consumers, diagnostics).
pub static BG_LOG_STREAM: LogStream = LogStream::new();
