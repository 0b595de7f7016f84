mod config;

pub use config::{Config, FlushConfig, HivesConfig, LogLevel, LoggingConfig, PolicyConfig};
