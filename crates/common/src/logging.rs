use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ensure_directory, LogConfig};
use crate::error::{Error, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Console output goes to stderr;
/// when `config.directory` is set, a daily-rolling file layer is added as well.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::configuration(format!("Invalid log filter: {}", e)))?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let file_layer = match &config.directory {
        Some(dir) => {
            ensure_directory(dir)?;
            let file_appender = RollingFileAppender::new(
                Rotation::DAILY,
                dir,
                format!("{}.log", config.file_prefix),
            );
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_writer(file_appender),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::other(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_logging_once() {
        let temp_dir = tempdir().unwrap();
        let config = LogConfig {
            level: "debug".to_string(),
            directory: Some(temp_dir.path().join("logs")),
            file_prefix: "test".to_string(),
        };

        init_logging(&config).unwrap();
        assert!(temp_dir.path().join("logs").is_dir());

        // a second global subscriber is refused
        assert!(init_logging(&LogConfig::default()).is_err());
    }
}
