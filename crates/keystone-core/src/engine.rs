//! Interpreter-only Wasmtime engine.
//!
//! The [`SandboxEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared by every runtime instance
//! - Compiled for the Pulley interpreter target, never for the host ISA
//! - Synchronous: no async support, no fuel and no epoch interruption

use tracing::info;
use wasmtime::{Config, Engine, OptLevel};

use keystone_common::{KeystoneError, SandboxConfig};

/// Returns the Pulley target matching the host pointer width and byte order.
///
/// Wasmtime requires the interpreter target to agree with the host on both.
pub const fn interpreter_target() -> &'static str {
    if cfg!(target_endian = "big") {
        if cfg!(target_pointer_width = "64") {
            "pulley64be"
        } else {
            "pulley32be"
        }
    } else if cfg!(target_pointer_width = "64") {
        "pulley64"
    } else {
        "pulley32"
    }
}

/// Thread-safe WebAssembly engine wrapper.
///
/// Guest code is translated to Pulley bytecode and executed by Wasmtime's
/// interpreter. No executable memory is ever mapped for guest code paths.
///
/// # Example
///
/// ```ignore
/// use keystone_common::SandboxConfig;
/// use keystone_core::SandboxEngine;
///
/// let engine = SandboxEngine::new(&SandboxConfig::default())?;
/// assert!(engine.target().starts_with("pulley"));
/// ```
#[derive(Clone)]
pub struct SandboxEngine {
    engine: Engine,
    config: SandboxConfig,
    target: &'static str,
}

impl SandboxEngine {
    /// Create a new interpreter-only engine.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The sandbox configuration is invalid
    /// - Wasmtime was built without interpreter support
    pub fn new(config: &SandboxConfig) -> Result<Self, KeystoneError> {
        config.validate()?;

        let target = interpreter_target();
        let mut wasmtime_config = Config::new();

        wasmtime_config.target(target).map_err(|e| {
            KeystoneError::invalid_config(format!("Interpreter target {target} unavailable: {e}"))
        })?;

        // Bytecode is still optimized before interpretation
        wasmtime_config.cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            KeystoneError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            target,
            max_memory_mb = config.max_memory_mb,
            "Interpreter engine initialized"
        );

        Ok(Self {
            engine,
            config: config.clone(),
            target,
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the sandbox configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The compilation target guest code is lowered to.
    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl std::fmt::Debug for SandboxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEngine")
            .field("target", &self.target)
            .field("max_memory_mb", &self.config.max_memory_mb)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_target() {
        let target = interpreter_target();
        assert!(target.starts_with("pulley"));
        if cfg!(target_pointer_width = "64") {
            assert!(target.starts_with("pulley64"));
        }
    }

    #[test]
    fn test_engine_creation_default() {
        let engine = SandboxEngine::new(&SandboxConfig::default()).unwrap();

        assert_eq!(engine.target(), interpreter_target());
        assert_eq!(engine.config().max_memory_mb, 256);
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let config = SandboxConfig {
            max_string_len: 0,
            ..Default::default()
        };
        let result = SandboxEngine::new(&config);

        assert!(matches!(result, Err(KeystoneError::InvalidConfig { .. })));
    }

    #[test]
    fn test_engine_debug() {
        let engine = SandboxEngine::new(&SandboxConfig::default()).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("SandboxEngine"));
        assert!(debug_str.contains("pulley"));
    }
}
