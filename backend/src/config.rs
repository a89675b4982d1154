use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sampling: SamplingConfig,
    pub external: ExternalConfig,
    pub logging: LoggingConfig,
}

/// Location of the SQLite schema catalog
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    pub row_limit: u32,
}

/// Settings for transient connections to user databases
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalConfig {
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env first so its values are visible as environment overrides
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./catalog.db")?
            .set_default("sampling.row_limit", 5)?
            .set_default("external.connect_timeout_secs", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(limit) = env::var("SAMPLE_ROW_LIMIT") {
            let limit = limit.parse::<u32>().map_err(|e| {
                config::ConfigError::Message(format!("SAMPLE_ROW_LIMIT must be a positive integer: {}", e))
            })?;
            builder = builder.set_override("sampling.row_limit", limit)?;
        }

        if let Ok(timeout) = env::var("CONNECT_TIMEOUT_SECS") {
            let timeout = timeout.parse::<u64>().map_err(|e| {
                config::ConfigError::Message(format!("CONNECT_TIMEOUT_SECS must be an integer: {}", e))
            })?;
            builder = builder.set_override("external.connect_timeout_secs", timeout)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        if config.sampling.row_limit == 0 {
            return Err(config::ConfigError::Message(
                "sampling.row_limit must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Install the global tracing subscriber. Call once, before serving.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let ansi = match logging.style.as_str() {
        "never" => false,
        "always" => true,
        _ => std::io::IsTerminal::is_terminal(&std::io::stdout()),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("DATABASE_URL");
        env::remove_var("SAMPLE_ROW_LIMIT");
        env::remove_var("CONNECT_TIMEOUT_SECS");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.sampling.row_limit, 5);
        assert_eq!(config.external.connect_timeout_secs, 10);
    }
}
