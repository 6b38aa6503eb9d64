//! Logging macros used throughout the chunk write pipeline.
//!
//! All logging goes through `tracing`. These wrappers exist so call sites
//! read the same way across this crate and `chunk-writer-cli`.

/// Info level logging - general information messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        tracing::info!($($arg)*);
    }};
}

/// Warning level logging - potentially problematic situations
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        tracing::warn!($($arg)*);
    }};
}

/// Error level logging - error conditions
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
    }};
}

/// Debug level logging - detailed information for debugging.
///
/// Gated behind the `debug-logging` feature so the wire-level tracing this
/// crate's hot path (`executor.rs`'s frame read/write loop) would otherwise
/// emit compiles to nothing in a default build.
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        tracing::debug!($($arg)*);
    }};
}

/// Stub used when the `debug-logging` feature is disabled: compiles to
/// nothing, so call sites don't need their own `#[cfg]`.
#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{}};
}
