//! Log shipping subsystem.
//!
//! # Data Flow
//! ```text
//! Call site (handler, coordinator)
//!     → record.rs (LogRecord built immutably: level, msg, fields)
//!     → sink.rs (encode as one JSON line, serialize writers)
//!     → TCP stream to the aggregator (e.g. Logstash tcp input)
//!
//! Connection States:
//!     Disconnected → Connecting → Connected → Closing → Closed
//!     Connected → Disconnected when the transport drops (no reconnect)
//! ```
//!
//! # Design Decisions
//! - One persistent connection opened at startup; unreachable is fatal there
//! - Writes after a drop fail; callers fall back to local logs
//! - Newline-delimited records need no extra framing

pub mod record;
pub mod sink;

pub use record::{FieldValue, Level, LogRecord};
pub use sink::{ship_or_fallback, ConnectError, ConnectionState, LogSink, SinkStats, WriteError};
