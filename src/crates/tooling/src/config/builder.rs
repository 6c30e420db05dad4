//! Configuration builder trait

use crate::Result;

/// Trait for configuration structures loaded in layers.
///
/// The usual order is defaults, then a file, then environment overrides,
/// then validation:
///
/// ```rust,ignore
/// let mut config: RelayConfig = load_toml(path)?;
/// config.apply_env("RELAY_")?;
/// config.validate()?;
/// ```
pub trait ConfigBuilder: Default + Clone {
    /// Validate the configuration
    ///
    /// Returns an error if a value is out of range or fields contradict
    /// each other.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Overlay values from environment variables named `{PREFIX}{FIELD}`.
    fn apply_env(&mut self, prefix: &str) -> Result<()>;

    /// Defaults overlaid with the environment, validated.
    fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::override_from_env;
    use crate::ToolingError;

    #[derive(Clone, Debug, PartialEq)]
    struct TestConfig {
        port: u16,
        workers: usize,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self { port: 8080, workers: 4 }
        }
    }

    impl ConfigBuilder for TestConfig {
        fn validate(&self) -> Result<()> {
            if self.workers == 0 {
                return Err(ToolingError::General("workers must be positive".into()));
            }
            Ok(())
        }

        fn apply_env(&mut self, prefix: &str) -> Result<()> {
            override_from_env(&mut self.port, &format!("{}PORT", prefix))?;
            override_from_env(&mut self.workers, &format!("{}WORKERS", prefix))?;
            Ok(())
        }
    }

    #[test]
    fn test_from_env_uses_defaults() {
        let config = TestConfig::from_env("TOOLING_BUILDER_UNSET_").unwrap();
        assert_eq!(config, TestConfig::default());
    }

    #[test]
    fn test_from_env_validates() {
        std::env::set_var("TOOLING_BUILDER_BAD_WORKERS", "0");
        let result = TestConfig::from_env("TOOLING_BUILDER_BAD_");
        std::env::remove_var("TOOLING_BUILDER_BAD_WORKERS");
        assert!(result.is_err());
    }
}
