use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{
    ConnectionTarget, DatabaseTargets, DeployEnv, ReadinessSettings, ServerSettings, Settings,
};

/// Loads the application settings from the given TOML file.
///
/// This function is the primary entry point for this crate. It reads the configuration file,
/// layers `APP_*` environment variables on top, and deserializes the result into our
/// strongly-typed `Settings` struct.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path))
        // Environment variables win over the file, e.g. APP_SERVER__PORT=8080.
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Attempt to deserialize the entire configuration into our `Settings` struct
    let settings = builder.try_deserialize::<Settings>()?;
    settings.validate()?;

    Ok(settings)
}
