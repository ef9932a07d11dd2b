//! Observability utilities.

mod logging;
mod tracing;

pub use logging::{init_logging, LogFormat, LOG_FORMAT_VAR};
pub use tracing::{SpanTimer, StageSpanAttributes};
