//! Custom actix middleware: request logging and per-endpoint metrics.

pub mod logging;
pub mod metrics;

pub use self::logging::RequestLogging;
pub use self::metrics::MetricsMiddleware;
