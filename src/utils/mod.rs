//! The `utils` module holds the pieces shared by every other module: the
//! crate error type and logging setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::error::Error;
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(logging::parse_level("loud"), tracing::Level::INFO);
        assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    }

    #[test]
    fn closed_transport_errors_are_retryable() {
        let err: Error = tungstenite::Error::ConnectionClosed.into();
        assert!(err.is_retryable());

        let err: Error = tungstenite::Error::AlreadyClosed.into();
        assert!(err.is_retryable());

        let err: Error = tungstenite::Error::AttackAttempt.into();
        assert!(!err.is_retryable());
        assert!(!Error::NotConnected.is_retryable());
    }
}
