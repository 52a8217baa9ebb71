//! Configuration file loading.
//!
//! # Example
//!
//! ```toml
//! [sandbox]
//! max_memory_mb = 128
//! strict_imports = true
//!
//! [assembler]
//! arch = "x86"
//! mode = "64"
//! syntax = "nasm"
//! address = 0x401000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// `[sandbox]` and `[assembler]` tables.
    #[serde(flatten)]
    pub runtime: RuntimeConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Consume the file, keeping the runtime configuration.
    pub fn into_runtime(self) -> RuntimeConfig {
        self.runtime
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.runtime.sandbox.max_memory_mb, 256);
        assert_eq!(config.runtime.assembler.arch, "x86");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = ConfigFile::from_toml("").unwrap();

        assert!(config.runtime.sandbox.strict_imports);
        assert_eq!(config.runtime.assembler.syntax, "intel");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [sandbox]
            max_memory_mb = 128
            max_string_len = 512
            strict_imports = false

            [assembler]
            arch = "arm"
            mode = "thumb+be"
            syntax = "gas"
            address = 0x401000
        "#;

        let config = ConfigFile::from_toml(toml).unwrap().into_runtime();

        assert_eq!(config.sandbox.max_memory_mb, 128);
        assert_eq!(config.sandbox.max_string_len, 512);
        assert!(!config.sandbox.strict_imports);
        assert_eq!(config.assembler.arch, "arm");
        assert_eq!(config.assembler.mode, "thumb+be");
        assert_eq!(config.assembler.syntax, "gas");
        assert_eq!(config.assembler.address, 0x40_1000);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/definitely/not/here/keystone.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
