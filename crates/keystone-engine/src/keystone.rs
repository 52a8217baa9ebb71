//! The assembler handle.
//!
//! [`Keystone`] owns one [`RuntimeInstance`] and the engine handle opened in
//! it. Closing releases the handle and then drops the instance together with
//! its store and linear memory, whatever the guest reported. Dropping an open
//! `Keystone` closes it.

use tracing::{debug, info, instrument, warn};

use keystone_common::{
    Architecture, ErrorCode, KeystoneError, Mode, OptionType, OptionValue, Syntax,
};
use keystone_core::{InstanceStats, RuntimeInstance};

use crate::protocol::{self, Assembly, EngineHandle, Version};
use crate::runtime::GuestRuntime;

/// An open Keystone engine running inside its own sandbox instance.
///
/// Calls block until the guest returns. A `Keystone` is `Send` but not
/// `Sync`: use one per thread, or wrap it in
/// [`SharedKeystone`](crate::SharedKeystone).
///
/// # Example
///
/// ```ignore
/// use keystone_common::{Architecture, Mode};
/// use keystone_engine::Keystone;
///
/// let mut ks = Keystone::new(Architecture::X86, Mode::MODE_32)?;
/// let code = ks.assemble("xor eax, eax\nret\n", 0)?;
/// assert_eq!(code, [0x31, 0xC0, 0xC3]);
/// ks.close()?;
/// ```
pub struct Keystone {
    live: Option<Live>,
    instance_id: String,
    // Counters as they stood when the instance was torn down.
    final_stats: InstanceStats,
    arch: Architecture,
    mode: Mode,
}

struct Live {
    instance: RuntimeInstance,
    handle: EngineHandle,
}

impl Keystone {
    /// Open an engine in a fresh instance of the shared runtime.
    pub fn new(arch: Architecture, mode: Mode) -> Result<Self, KeystoneError> {
        Self::open(GuestRuntime::shared()?, arch, mode)
    }

    /// Open an engine in a fresh instance of `runtime`.
    ///
    /// # Errors
    ///
    /// Fails if the instance cannot be loaded or the guest rejects the
    /// architecture and mode pair.
    #[instrument(skip(runtime))]
    pub fn open(runtime: &GuestRuntime, arch: Architecture, mode: Mode) -> Result<Self, KeystoneError> {
        let mut instance = runtime.load()?;
        let handle = protocol::open(&mut instance, arch, mode)?;

        info!(instance_id = instance.id(), %arch, %mode, "Keystone engine opened");

        Ok(Self {
            instance_id: instance.id().to_string(),
            live: Some(Live { instance, handle }),
            final_stats: InstanceStats::default(),
            arch,
            mode,
        })
    }

    fn parts(&mut self) -> Result<(&mut RuntimeInstance, &EngineHandle), KeystoneError> {
        match &mut self.live {
            Some(live) => Ok((&mut live.instance, &live.handle)),
            None => Err(KeystoneError::Closed),
        }
    }

    /// Set a raw engine option.
    pub fn set_option(&mut self, option: OptionType, value: OptionValue) -> Result<(), KeystoneError> {
        let (instance, handle) = self.parts()?;
        protocol::set_option(instance, handle, option, value)
    }

    /// Select the input syntax.
    pub fn set_syntax(&mut self, syntax: Syntax) -> Result<(), KeystoneError> {
        self.set_option(OptionType::SYNTAX, syntax.value())
    }

    /// Assemble `source` at base `address` and return the machine code.
    pub fn assemble(&mut self, source: &str, address: u64) -> Result<Vec<u8>, KeystoneError> {
        self.assemble_detailed(source, address).map(|asm| asm.bytes)
    }

    /// Assemble and also return the statement count.
    pub fn assemble_detailed(&mut self, source: &str, address: u64) -> Result<Assembly, KeystoneError> {
        let (instance, handle) = self.parts()?;
        protocol::assemble(instance, handle, source, address)
    }

    /// Last status code recorded by the guest for this engine.
    pub fn last_error(&mut self) -> Result<ErrorCode, KeystoneError> {
        let (instance, handle) = self.parts()?;
        protocol::last_error(instance, handle)
    }

    /// API version of the guest library.
    pub fn version(&mut self) -> Result<Version, KeystoneError> {
        let (instance, _) = self.parts()?;
        protocol::version(instance)
    }

    /// Whether the guest was built with support for `arch`.
    pub fn arch_supported(&mut self, arch: Architecture) -> Result<bool, KeystoneError> {
        let (instance, _) = self.parts()?;
        instance.ks_arch_supported(arch)
    }

    /// Close the engine and tear down its instance.
    ///
    /// Closing twice is a no-op. The instance is dropped even when the guest
    /// reports an error or the instance was poisoned.
    pub fn close(&mut self) -> Result<(), KeystoneError> {
        let Some(Live { mut instance, handle }) = self.live.take() else {
            return Ok(());
        };
        let result = protocol::close(&mut instance, handle);
        self.final_stats = instance.stats().clone();
        drop(instance);

        debug!(instance_id = %self.instance_id, "Runtime instance released");
        result
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.live.is_none()
    }

    /// The live runtime instance, `None` after close.
    pub fn instance(&self) -> Option<&RuntimeInstance> {
        self.live.as_ref().map(|live| &live.instance)
    }

    /// Architecture the engine was opened for.
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Mode the engine was opened with.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Identifier of the underlying runtime instance.
    ///
    /// Stays available after close for log correlation.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Traffic counters of the underlying runtime instance.
    ///
    /// After close these are the final counters of the released instance.
    pub fn stats(&self) -> &InstanceStats {
        match &self.live {
            Some(live) => live.instance.stats(),
            None => &self.final_stats,
        }
    }
}

impl Drop for Keystone {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(instance_id = %self.instance_id, error = %e, "Failed to close keystone engine");
        }
    }
}

impl std::fmt::Debug for Keystone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystone")
            .field("instance_id", &self.instance_id)
            .field("arch", &self.arch)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
