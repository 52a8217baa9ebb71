//! Runtime instance lifecycle and the guest export table.
//!
//! A [`RuntimeInstance`] owns one instantiation of the guest artifact: its
//! store, its linear memory and the typed handles of every export the host
//! consumes. Instances share no mutable state and can run on different
//! threads in parallel; a single instance must not be entered concurrently.
//!
//! Any failure of the sandbox while executing an export poisons the
//! instance. Poisoned instances refuse further calls and must be dropped.

use std::time::Instant;

use tracing::{Span, debug, error, instrument};
use wasmtime::{
    Instance, InstancePre, Memory, Store, Trap, TypedFunc, WasmParams, WasmResults,
};

use keystone_common::{Architecture, ErrorCode, KeystoneError, Mode, OptionType, OptionValue};

use crate::SandboxEngine;
use crate::store::{GuestContext, InstanceStats, create_store};

/// A 32-bit offset into guest linear memory.
pub type GuestPtr = u32;

/// Exact names of the guest exports consumed by the host.
pub mod exports {
    pub const MEMORY: &str = "memory";
    pub const MALLOC: &str = "malloc";
    pub const FREE: &str = "free";
    pub const KS_OPEN: &str = "ks_open";
    pub const KS_OPTION: &str = "ks_option";
    pub const KS_ASM: &str = "ks_asm";
    pub const KS_FREE: &str = "ks_free";
    pub const KS_CLOSE: &str = "ks_close";
    pub const KS_ERRNO: &str = "ks_errno";
    pub const KS_STRERROR: &str = "ks_strerror";
    pub const KS_VERSION: &str = "ks_version";
    pub const KS_ARCH_SUPPORTED: &str = "ks_arch_supported";

    /// Reactor-style initializers, run once after instantiation when present.
    pub const INITIALIZERS: [&str; 2] = ["_initialize", "__wasm_call_ctors"];
}

/// Typed handles to the guest exports.
pub(crate) struct GuestExports {
    pub(crate) malloc: TypedFunc<u32, u32>,
    pub(crate) free: TypedFunc<u32, ()>,
    ks_open: TypedFunc<(u32, u32, u32), u32>,
    ks_option: TypedFunc<(u32, u32, u32), u32>,
    ks_asm: TypedFunc<(u32, u32, u64, u32, u32, u32), u32>,
    ks_free: TypedFunc<u32, ()>,
    ks_close: TypedFunc<u32, u32>,
    ks_errno: TypedFunc<u32, u32>,
    ks_strerror: TypedFunc<u32, u32>,
    ks_version: TypedFunc<(u32, u32), u32>,
    ks_arch_supported: TypedFunc<u32, u32>,
}

impl GuestExports {
    /// Resolve every export by exact name and signature.
    fn resolve(
        instance: &Instance,
        store: &mut Store<GuestContext>,
    ) -> Result<Self, KeystoneError> {
        Ok(Self {
            malloc: typed(instance, store, exports::MALLOC)?,
            free: typed(instance, store, exports::FREE)?,
            ks_open: typed(instance, store, exports::KS_OPEN)?,
            ks_option: typed(instance, store, exports::KS_OPTION)?,
            ks_asm: typed(instance, store, exports::KS_ASM)?,
            ks_free: typed(instance, store, exports::KS_FREE)?,
            ks_close: typed(instance, store, exports::KS_CLOSE)?,
            ks_errno: typed(instance, store, exports::KS_ERRNO)?,
            ks_strerror: typed(instance, store, exports::KS_STRERROR)?,
            ks_version: typed(instance, store, exports::KS_VERSION)?,
            ks_arch_supported: typed(instance, store, exports::KS_ARCH_SUPPORTED)?,
        })
    }
}

fn typed<P, R>(
    instance: &Instance,
    store: &mut Store<GuestContext>,
    name: &str,
) -> Result<TypedFunc<P, R>, KeystoneError>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| {
            KeystoneError::instantiation(format!("Guest export `{name}` missing or mistyped: {e}"))
        })
}

/// One live instantiation of the guest artifact.
pub struct RuntimeInstance {
    id: String,
    instance: Instance,
    pub(crate) store: Store<GuestContext>,
    pub(crate) memory: Memory,
    pub(crate) exports: GuestExports,
    pub(crate) max_string_len: usize,
    poisoned: bool,
}

impl RuntimeInstance {
    /// Instantiate a pre-linked guest in a fresh store.
    ///
    /// No partially initialized instance is ever returned: a missing export,
    /// a missing memory or a trapping initializer fails the whole attempt.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::Instantiation`] on any failure.
    #[instrument(skip(engine, pre), fields(instance_id))]
    pub fn instantiate(
        engine: &SandboxEngine,
        pre: &InstancePre<GuestContext>,
    ) -> Result<Self, KeystoneError> {
        let start = Instant::now();
        let id = uuid::Uuid::new_v4().to_string();
        Span::current().record("instance_id", id.as_str());

        let mut store = create_store(engine, id.clone());

        let instance = pre
            .instantiate(&mut store)
            .map_err(|e| KeystoneError::instantiation(format!("Instantiation failed: {e}")))?;

        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or_else(|| KeystoneError::instantiation("Guest does not export `memory`"))?;

        let guest_exports = GuestExports::resolve(&instance, &mut store)?;

        for name in exports::INITIALIZERS {
            let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, name) else {
                continue;
            };
            debug!(initializer = name, "Running guest initializer");
            init.call(&mut store, ()).map_err(|e| {
                KeystoneError::instantiation(format!(
                    "Guest initializer `{name}` failed: {}",
                    describe_trap(&e)
                ))
            })?;
            break;
        }

        debug!(
            duration_us = start.elapsed().as_micros(),
            memory_bytes = memory.data_size(&store),
            "Runtime instance ready"
        );

        Ok(Self {
            id,
            instance,
            store,
            memory,
            exports: guest_exports,
            max_string_len: engine.config().max_string_len,
            poisoned: false,
        })
    }

    /// Unique identifier of this instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Traffic counters for this instance.
    pub fn stats(&self) -> &InstanceStats {
        &self.store.data().stats
    }

    /// Exit status reported by the guest through the process-exit hook.
    pub fn exit_code(&self) -> Option<i32> {
        self.store.data().exit_code
    }

    /// Returns `true` once a sandbox-level failure has occurred.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Names of every export of the guest, in module order.
    pub fn export_names(&mut self) -> Vec<String> {
        self.instance
            .exports(&mut self.store)
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Current size of the guest linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Call a guest export, poisoning the instance on failure.
    pub(crate) fn invoke<P, R>(
        &mut self,
        export: &'static str,
        select: fn(&GuestExports) -> &TypedFunc<P, R>,
        params: P,
    ) -> Result<R, KeystoneError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        if self.poisoned {
            return Err(KeystoneError::InstancePoisoned {
                instance_id: self.id.clone(),
            });
        }

        let func = select(&self.exports).clone();
        let start = Instant::now();

        match func.call(&mut self.store, params) {
            Ok(results) => {
                debug!(
                    instance_id = %self.id,
                    export,
                    duration_us = start.elapsed().as_micros(),
                    "Guest call returned"
                );
                Ok(results)
            }
            Err(e) => {
                self.poisoned = true;
                let message = describe_trap(&e);
                error!(
                    instance_id = %self.id,
                    export,
                    trap_message = %message,
                    "Guest call failed; instance poisoned"
                );
                Err(KeystoneError::host_call(export, message))
            }
        }
    }

    /// `ks_open(arch, mode, &engine)`.
    pub fn ks_open(
        &mut self,
        arch: Architecture,
        mode: Mode,
        handle_cell: GuestPtr,
    ) -> Result<ErrorCode, KeystoneError> {
        self.invoke(exports::KS_OPEN, |e| &e.ks_open, (arch.0, mode.0, handle_cell))
            .map(ErrorCode)
    }

    /// `ks_option(engine, type, value)`.
    pub fn ks_option(
        &mut self,
        engine: u32,
        option: OptionType,
        value: OptionValue,
    ) -> Result<ErrorCode, KeystoneError> {
        self.invoke(exports::KS_OPTION, |e| &e.ks_option, (engine, option.0, value.0))
            .map(ErrorCode)
    }

    /// `ks_asm(engine, source, address, &encoding, &size, &stat_count)`.
    pub fn ks_asm(
        &mut self,
        engine: u32,
        source: GuestPtr,
        address: u64,
        encoding_cell: GuestPtr,
        size_cell: GuestPtr,
        count_cell: GuestPtr,
    ) -> Result<ErrorCode, KeystoneError> {
        self.invoke(
            exports::KS_ASM,
            |e| &e.ks_asm,
            (engine, source, address, encoding_cell, size_cell, count_cell),
        )
        .map(ErrorCode)
    }

    /// `ks_free(encoding)`: return an output buffer to the guest.
    pub fn ks_free(&mut self, encoding: GuestPtr) -> Result<(), KeystoneError> {
        self.invoke(exports::KS_FREE, |e| &e.ks_free, encoding)?;
        self.store.data_mut().stats.outputs_freed += 1;
        Ok(())
    }

    /// `ks_close(engine)`.
    pub fn ks_close(&mut self, engine: u32) -> Result<ErrorCode, KeystoneError> {
        self.invoke(exports::KS_CLOSE, |e| &e.ks_close, engine)
            .map(ErrorCode)
    }

    /// `ks_errno(engine)`: the last error recorded on a handle.
    pub fn ks_errno(&mut self, engine: u32) -> Result<ErrorCode, KeystoneError> {
        self.invoke(exports::KS_ERRNO, |e| &e.ks_errno, engine)
            .map(ErrorCode)
    }

    /// `ks_strerror(code)`: pointer to a static NUL-terminated description.
    pub fn ks_strerror(&mut self, code: u32) -> Result<GuestPtr, KeystoneError> {
        self.invoke(exports::KS_STRERROR, |e| &e.ks_strerror, code)
    }

    /// `ks_version(&major, &minor)`: returns `(major << 8) | minor`.
    pub fn ks_version(
        &mut self,
        major_cell: GuestPtr,
        minor_cell: GuestPtr,
    ) -> Result<u32, KeystoneError> {
        self.invoke(exports::KS_VERSION, |e| &e.ks_version, (major_cell, minor_cell))
    }

    /// `ks_arch_supported(arch)`.
    pub fn ks_arch_supported(&mut self, arch: Architecture) -> Result<bool, KeystoneError> {
        self.invoke(exports::KS_ARCH_SUPPORTED, |e| &e.ks_arch_supported, arch.0)
            .map(|supported| supported != 0)
    }
}

impl std::fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("id", &self.id)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

/// Extract human-readable trap information.
fn describe_trap(error: &wasmtime::Error) -> String {
    let message = error.to_string();
    match error.downcast_ref::<Trap>() {
        Some(trap) => format!("{message} ({trap:?})"),
        None => message,
    }
}
