//! General utility code that didn't fit anywhere else
// (c) 2025 Ross Younger

mod tracing;
pub use self::tracing::TimeFormat;
pub use self::tracing::is_initialized as tracing_is_initialised;
pub(crate) use self::tracing::{setup as setup_tracing, trace_level, ConsoleTraceType};
