use anyhow::Result;
use config::Config as RawConfig;
use serde::Deserialize;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "TIMETABLED";

/// Process settings read from `TIMETABLED_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Workspace to open before the first request arrives.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            workspace: None,
        }
    }
}

impl Config {
    /// ## Errors
    /// Returns an error if building the configuration or deserializing it fails.
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg: Config = RawConfig::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = Config::from_source(env(&[])).expect("config");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.workspace.is_none());
    }

    #[test]
    fn reads_prefixed_variables() {
        let cfg = Config::from_source(env(&[
            ("TIMETABLED_LOG_LEVEL", "debug"),
            ("TIMETABLED_WORKSPACE", "/tmp/term-2024"),
        ]))
        .expect("config");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/term-2024")));
    }
}
