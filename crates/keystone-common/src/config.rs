//! Configuration structures for wasm-keystone.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`SandboxConfig`]: Interpreter sandbox settings (memory ceiling, import policy)
//! - [`AssemblerDefaults`]: Front-end defaults (architecture, mode, syntax, address)

use serde::{Deserialize, Serialize};

use crate::KeystoneError;
use crate::consts::{Architecture, Mode, Syntax, UnknownName};

/// Top-level runtime configuration.
///
/// It can be loaded from a TOML file (see [`crate::ConfigFile`]) and is
/// then overridden by command line flags.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Sandbox configuration.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Assembler front-end defaults.
    #[serde(default)]
    pub assembler: AssemblerDefaults,
}

/// Interpreter sandbox configuration.
///
/// The sandbox always runs the guest on the interpreter; there is no
/// setting that enables native code generation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Maximum linear memory per runtime instance in megabytes.
    ///
    /// Zero disables the limit (the guest's own declared maximum applies).
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Maximum length in bytes of a NUL-terminated string read back from
    /// the guest (error descriptions).
    #[serde(default = "defaults::max_string_len")]
    pub max_string_len: usize,

    /// Reject guest artifacts whose imports are not all covered by the
    /// stub table.
    ///
    /// When disabled, unknown imports are linked to stubs that trap when
    /// called.
    #[serde(default = "defaults::strict_imports")]
    pub strict_imports: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: defaults::max_memory_mb(),
            max_string_len: defaults::max_string_len(),
            strict_imports: defaults::strict_imports(),
        }
    }
}

impl SandboxConfig {
    /// Memory ceiling in bytes, or `None` when unlimited.
    pub fn max_memory_bytes(&self) -> Option<usize> {
        (self.max_memory_mb > 0).then(|| (self.max_memory_mb as usize) * 1024 * 1024)
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<(), KeystoneError> {
        if self.max_string_len == 0 {
            return Err(KeystoneError::invalid_config(
                "max_string_len must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Default assembler settings used by front-ends.
///
/// Values are table names, resolved with the parsers in [`crate::consts`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssemblerDefaults {
    /// Target architecture name.
    #[serde(default = "defaults::arch")]
    pub arch: String,

    /// Target mode name (`+` combines flags).
    #[serde(default = "defaults::mode")]
    pub mode: String,

    /// Assembly syntax name.
    #[serde(default = "defaults::syntax")]
    pub syntax: String,

    /// Base address for position-dependent encoding.
    #[serde(default)]
    pub address: u64,
}

impl Default for AssemblerDefaults {
    fn default() -> Self {
        Self {
            arch: defaults::arch(),
            mode: defaults::mode(),
            syntax: defaults::syntax(),
            address: 0,
        }
    }
}

impl AssemblerDefaults {
    /// Resolve the architecture name.
    pub fn architecture(&self) -> Result<Architecture, KeystoneError> {
        self.arch
            .parse()
            .map_err(|e: UnknownName| KeystoneError::invalid_config(e.to_string()))
    }

    /// Resolve the mode name.
    pub fn target_mode(&self) -> Result<Mode, KeystoneError> {
        self.mode
            .parse()
            .map_err(|e: UnknownName| KeystoneError::invalid_config(e.to_string()))
    }

    /// Resolve the syntax name.
    pub fn syntax_dialect(&self) -> Result<Syntax, KeystoneError> {
        self.syntax
            .parse()
            .map_err(|e: UnknownName| KeystoneError::invalid_config(e.to_string()))
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_memory_mb() -> u32 {
        256
    }

    pub const fn max_string_len() -> usize {
        4096
    }

    pub const fn strict_imports() -> bool {
        true
    }

    pub fn arch() -> String {
        "x86".to_string()
    }

    pub fn mode() -> String {
        "32".to_string()
    }

    pub fn syntax() -> String {
        "intel".to_string()
    }
}
