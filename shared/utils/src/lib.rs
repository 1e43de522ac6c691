pub mod config;
pub mod logging;
pub mod error;
pub mod validation;

pub use config::*;
pub use logging::*;
pub use error::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.relay.max_retries, 3);
        assert_eq!(config.chat.system_user_id, "system");
    }

    #[test]
    fn test_error_handling() {
        let error = RelayError::authentication("Invalid webhook signature");
        assert_eq!(error.error_code(), "AUTHENTICATION_ERROR");
        assert_eq!(error.http_status_code(), 401);
    }
}
