//! Configuration management utilities
//!
//! - `ConfigBuilder` trait for layered configuration (defaults, file, env)
//! - Environment variable loading with proper error handling

mod builder;
mod env;

pub use builder::ConfigBuilder;
pub use env::{build_env_key, get_env, get_env_bool, get_env_parse, override_from_env};
