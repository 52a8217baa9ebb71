//! Guest runtime: compile once, instantiate many.
//!
//! A [`GuestRuntime`] holds the interpreter engine, the compiled guest
//! artifact and a pre-linked instance template. Each call to
//! [`GuestRuntime::load`] produces a fresh, fully independent
//! [`RuntimeInstance`].

use std::sync::OnceLock;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::InstancePre;

use keystone_common::{KeystoneError, SandboxConfig};
use keystone_core::{CompiledArtifact, GuestContext, RuntimeInstance, SandboxEngine};
use keystone_host::link_guest;

static SHARED: OnceLock<GuestRuntime> = OnceLock::new();

/// Compiled guest artifact ready for instantiation.
pub struct GuestRuntime {
    engine: SandboxEngine,
    artifact: CompiledArtifact,
    pre: InstancePre<GuestContext>,
}

impl GuestRuntime {
    /// Build a runtime around the artifact embedded at build time.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::Instantiation`] if no artifact was embedded,
    /// it fails to compile, or its imports do not match the stub table.
    pub fn new(config: &SandboxConfig) -> Result<Self, KeystoneError> {
        let engine = SandboxEngine::new(config)?;
        let artifact = CompiledArtifact::embedded(&engine)?;
        Self::link(engine, artifact)
    }

    /// Build a runtime around caller-supplied WebAssembly bytes.
    pub fn with_artifact(config: &SandboxConfig, bytes: &[u8]) -> Result<Self, KeystoneError> {
        let engine = SandboxEngine::new(config)?;
        let artifact = CompiledArtifact::from_bytes(&engine, bytes)?;
        Self::link(engine, artifact)
    }

    /// Build a runtime around a guest written in WebAssembly text.
    pub fn from_wat(config: &SandboxConfig, wat: &str) -> Result<Self, KeystoneError> {
        let engine = SandboxEngine::new(config)?;
        let artifact = CompiledArtifact::from_wat(&engine, wat)?;
        Self::link(engine, artifact)
    }

    /// The process-wide runtime over the embedded artifact.
    ///
    /// Built with the default sandbox configuration on first use.
    pub fn shared() -> Result<&'static Self, KeystoneError> {
        if let Some(runtime) = SHARED.get() {
            return Ok(runtime);
        }

        let runtime = Self::new(&SandboxConfig::default())?;
        // A concurrent first call may win the race; either runtime is equivalent.
        let _ = SHARED.set(runtime);
        SHARED
            .get()
            .ok_or_else(|| KeystoneError::instantiation("Shared runtime unavailable"))
    }

    fn link(engine: SandboxEngine, artifact: CompiledArtifact) -> Result<Self, KeystoneError> {
        let start = Instant::now();
        let linker = link_guest(
            engine.inner(),
            artifact.module(),
            engine.config().strict_imports,
        )?;

        let pre = linker
            .instantiate_pre(artifact.module())
            .map_err(|e| KeystoneError::instantiation(format!("Failed to link guest: {e}")))?;

        info!(
            content_hash = artifact.content_hash(),
            strict_imports = engine.config().strict_imports,
            duration_us = start.elapsed().as_micros(),
            "Guest runtime ready"
        );

        Ok(Self {
            engine,
            artifact,
            pre,
        })
    }

    /// Instantiate a fresh [`RuntimeInstance`].
    ///
    /// A failed attempt leaves nothing behind; calling `load` again retries.
    #[instrument(skip(self), fields(content_hash = self.artifact.content_hash()))]
    pub fn load(&self) -> Result<RuntimeInstance, KeystoneError> {
        let instance = RuntimeInstance::instantiate(&self.engine, &self.pre)?;
        debug!(instance_id = instance.id(), "Runtime instance loaded");
        Ok(instance)
    }

    /// The interpreter engine.
    pub fn engine(&self) -> &SandboxEngine {
        &self.engine
    }

    /// The compiled guest artifact.
    pub fn artifact(&self) -> &CompiledArtifact {
        &self.artifact
    }
}

impl std::fmt::Debug for GuestRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestRuntime")
            .field("engine", &self.engine)
            .field("artifact", &self.artifact)
            .finish_non_exhaustive()
    }
}
