pub mod json;
pub mod rate_limiter;
pub mod toml_config;
