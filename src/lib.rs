//! # cw-keyer-core
//!
//! Iambic keying state machine and lock-free timing event stream for a CW
//! keyer.
//!
//! ## Architecture
//!
//! All timing information flows through [`TimingStream`]. Components are
//! isolated:
//! - The RT thread ([`KeyerCore`]) is the only producer and never waits for
//!   anyone
//! - Consumers (decoder, sidetone, UI) each drain their own cursor and
//!   never see each other
//! - No callbacks across threads, no mutexes, no allocation on the RT path
//!
//! ```text
//! Clock ──▶ KeyerCore::tick ──▶ TimingStream ──▶ StreamConsumer (×C)
//!              │    ▲
//!              │    └── KeyerConfig (atomics + generation)
//!              └──▶ KeyingOutput (TX line)
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod clock;
pub mod config;
pub mod consumer;
pub mod event;
pub mod fault;
pub mod gap;
pub mod iambic;
pub mod keyer;
pub mod log_globals;
pub mod logging;
pub mod sample;
pub mod stream;

pub use config::{IambicConfig, KeyerConfig, CONFIG};
pub use consumer::StreamConsumer;
pub use event::{EventKind, GapKind, TimingEvent};
pub use fault::{FaultCode, FaultState};
pub use iambic::{Element, IambicProcessor};
pub use keyer::{KeyerCore, KeyingOutput, TickPacer};
pub use log_globals::{BG_LOG_STREAM, RT_LOG_STREAM};
pub use sample::GpioState;
pub use stream::{StreamError, TimingStream};
