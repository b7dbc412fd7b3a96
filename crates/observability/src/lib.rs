//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize human-readable logging for interactive use.
pub fn init_pretty() {
    tracing::init(LogFormat::Pretty);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::LogFormat;

#[cfg(test)]
mod tests {
    #[test]
    fn pretty_then_json_init_does_not_panic() {
        super::init_pretty();
        super::init();
        ::tracing::debug!("subscriber installed");
    }
}
