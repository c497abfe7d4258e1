pub mod logging;
pub mod toml_config;
