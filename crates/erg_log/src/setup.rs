//! Function to setup logging in binaries.

/// Directs [`log`] calls to stderr.
///
/// Idempotent: only the first call installs the logger.
pub fn setup_logging() {
    fn setup() {
        let log_filter = crate::default_log_filter();

        if log_filter.contains("trace") {
            log::set_max_level(log::LevelFilter::Trace);
        } else if log_filter.contains("debug") {
            log::set_max_level(log::LevelFilter::Debug);
        } else {
            log::set_max_level(log::LevelFilter::Info);
        }

        let mut stderr_logger = env_logger::Builder::new();
        stderr_logger.parse_filters(&log_filter);
        stderr_logger.init();
    }

    use std::sync::Once;
    static START: Once = Once::new();
    START.call_once(setup);
}
