use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;

/// Loads a typed configuration from a TOML file with environment-variable
/// overrides layered on top (`MEDIACTRL__cfw__port=9999` style, `__` as the
/// nesting separator).
#[derive(Debug)]
pub struct ConfigLoader {
    base_path: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(base_path: P, env_prefix: &str) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            env_prefix: env_prefix.to_string(),
        }
    }

    /// Load `file_path` (resolved relative to `base_path`) and merge
    /// environment overrides on top.
    pub fn load_from_file<T, P>(&self, file_path: P) -> Result<T>
    where
        T: DeserializeOwned + Debug,
        P: AsRef<Path>,
    {
        let full_path = self.base_path.join(file_path);
        if !full_path.exists() {
            return Err(Error::config(format!(
                "config file not found: {}",
                full_path.display()
            )));
        }

        let built = Config::builder()
            .add_source(File::from(full_path))
            .add_source(Environment::with_prefix(&self.env_prefix).separator("__"))
            .build()
            .map_err(|e| Error::config(format!("failed to load config: {}", e)))?;

        built
            .try_deserialize()
            .map_err(|e| Error::config(format!("failed to deserialize config: {}", e)))
    }

    /// Load configuration purely from environment variables, for
    /// environments (e.g. containers) with no config file mounted.
    pub fn load_from_env<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Debug,
    {
        let built = Config::builder()
            .add_source(Environment::with_prefix(&self.env_prefix).separator("__"))
            .build()
            .map_err(|e| Error::config(format!("failed to load env config: {}", e)))?;

        built
            .try_deserialize()
            .map_err(|e| Error::config(format!("failed to deserialize env config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        port: u16,
    }

    #[test]
    fn loads_toml_file() {
        let dir = std::env::temp_dir().join(format!(
            "mediactrl-infra-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "port = 2427").unwrap();

        let loader = ConfigLoader::new(&dir, "MEDIACTRL_TEST");
        let parsed: Sample = loader.load_from_file("sample.toml").unwrap();
        assert_eq!(parsed.port, 2427);
    }

    #[test]
    fn missing_file_is_an_error() {
        let loader = ConfigLoader::new("/nonexistent/path", "MEDIACTRL_TEST");
        let result: Result<Sample> = loader.load_from_file("sample.toml");
        assert!(result.is_err());
    }
}
