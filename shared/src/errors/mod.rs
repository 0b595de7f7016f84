mod config_errors;
mod registry_errors;

pub use config_errors::ConfigError;
pub use registry_errors::RegistryError;
