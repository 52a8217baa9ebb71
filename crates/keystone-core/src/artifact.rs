//! Guest artifact embedding and compilation.
//!
//! This module provides [`CompiledArtifact`], a wrapper around Wasmtime's
//! [`Module`] compiled for the interpreter, together with access to the
//! artifact bytes embedded at build time.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::Module;

use keystone_common::KeystoneError;

use crate::SandboxEngine;

/// Guest artifact bytes embedded by the build script.
static EMBEDDED: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/keystone.wasm"));

/// The guest artifact embedded in this binary.
///
/// Empty when the crate was built without an artifact.
pub fn embedded_artifact() -> &'static [u8] {
    EMBEDDED
}

/// Returns `true` if a guest artifact was embedded at build time.
pub fn has_embedded_artifact() -> bool {
    !EMBEDDED.is_empty()
}

/// A compiled guest artifact.
///
/// Cloning is cheap; clones share the compiled code.
#[derive(Clone)]
pub struct CompiledArtifact {
    /// The compiled Wasmtime module (Pulley bytecode).
    module: Module,

    /// Hash of the source Wasm bytes.
    content_hash: String,

    /// When this artifact was compiled.
    compiled_at: Instant,
}

impl CompiledArtifact {
    /// Compile the artifact embedded at build time.
    ///
    /// # Errors
    ///
    /// Returns an error if no artifact was embedded or compilation fails.
    pub fn embedded(engine: &SandboxEngine) -> Result<Self, KeystoneError> {
        if !has_embedded_artifact() {
            return Err(KeystoneError::instantiation(
                "Guest artifact not embedded (set KEYSTONE_WASM at build time)",
            ));
        }
        Self::from_bytes(engine, EMBEDDED)
    }

    /// Compile a guest artifact from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &SandboxEngine, bytes: &[u8]) -> Result<Self, KeystoneError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::from_binary(engine.inner(), bytes).map_err(|e| {
            KeystoneError::instantiation(format!("Guest artifact compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            target = engine.target(),
            duration_ms = start.elapsed().as_millis(),
            "Guest artifact compiled"
        );

        Ok(Self {
            module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a guest from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &SandboxEngine, wat: &str) -> Result<Self, KeystoneError> {
        let module = Module::new(engine.inner(), wat)
            .map_err(|e| KeystoneError::instantiation(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(content_hash = %content_hash, "WAT guest compiled");

        Ok(Self {
            module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Get the compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Get the content hash of the source Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this artifact was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), KeystoneError> {
        if bytes.len() < 8 {
            return Err(KeystoneError::instantiation("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(KeystoneError::instantiation("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
