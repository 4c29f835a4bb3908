use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{errors::Result, resample::Resampling};

/// Resolver settings.
///
/// Every field is optional in TOML and falls back to its default:
///
/// ```toml
/// materialize_threshold = 100000000
/// resampling = "nearest"
/// cache_bytes = 0
/// ```
///
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Sources with more cells than this are always opened as proxies
    pub materialize_threshold: usize,

    /// Resampling used when a target doesn't name one
    pub resampling: Resampling,

    /// Byte limit of the result cache used by `consume_cached`. 0 turns caching off.
    pub cache_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            materialize_threshold: 100_000_000,
            resampling: Resampling::Nearest,
            cache_bytes: 0,
        }
    }
}

impl Config {
    pub fn from_toml_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::io::Write;

    #[test]
    fn test_defaults() -> Result<()> {
        let config = Config::from_toml_str("")?;
        assert_eq!(config, Config::default());
        assert_eq!(config.materialize_threshold, 100_000_000);
        assert_eq!(config.cache_bytes, 0);

        Ok(())
    }

    #[test]
    fn test_partial() -> Result<()> {
        let config = Config::from_toml_str("resampling = \"average\"\ncache_bytes = 1048576\n")?;
        assert_eq!(config.resampling, Resampling::Average);
        assert_eq!(config.cache_bytes, 1 << 20);
        assert_eq!(config.materialize_threshold, 100_000_000);

        Ok(())
    }

    #[test]
    fn test_bad_config() {
        assert!(matches!(
            Config::from_toml_str("resampling = \"bilinear\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("materialize_threshold = -1"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "materialize_threshold = 2500")?;
        let config = Config::load(file.path())?;
        assert_eq!(config.materialize_threshold, 2500);

        assert!(matches!(
            Config::load(file.path().with_extension("missing")),
            Err(Error::IO(_))
        ));

        Ok(())
    }

    #[test]
    fn test_serializes() {
        let config = Config {
            materialize_threshold: 10,
            resampling: Resampling::Average,
            cache_bytes: 64,
        };
        let json = serde_json::to_value(&config).expect("serializable");
        assert_eq!(
            json,
            serde_json::json!({
                "materialize_threshold": 10,
                "resampling": "average",
                "cache_bytes": 64,
            })
        );
    }
}
