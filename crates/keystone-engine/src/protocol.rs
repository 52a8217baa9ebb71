//! The guest call protocol.
//!
//! Sequences `ks_open`, `ks_option`, `ks_asm` and `ks_close` against one
//! [`RuntimeInstance`]. Every pointer argument and out-parameter lives in a
//! [`ScratchFrame`](keystone_core::ScratchFrame) scoped to the call, so all
//! scratch memory is released before each function returns.

use tracing::{debug, instrument};

use keystone_common::{
    Architecture, ErrorCode, KeystoneError, Mode, Operation, OptionType, OptionValue,
};
use keystone_core::{GuestPtr, RuntimeInstance};

use crate::translate::engine_error;

/// Opaque engine handle returned by `ks_open`.
///
/// The value is an address inside the owning instance's linear memory. It is
/// never dereferenced by the host and only ever passed back to the instance
/// that produced it.
#[derive(Debug, PartialEq, Eq)]
pub struct EngineHandle {
    raw: u32,
    owner: String,
}

impl EngineHandle {
    /// Identifier of the runtime instance that opened this handle.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn raw_for(&self, instance: &RuntimeInstance) -> Result<u32, KeystoneError> {
        if self.owner != instance.id() {
            return Err(KeystoneError::ForeignHandle {
                owner: self.owner.clone(),
                instance_id: instance.id().to_string(),
            });
        }
        Ok(self.raw)
    }
}

/// Output of a successful `ks_asm` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assembly {
    /// Machine code, copied out of guest memory.
    pub bytes: Vec<u8>,
    /// Number of statements the guest processed.
    pub statements: u32,
}

/// Guest API version reported by `ks_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Open an engine for `arch` and `mode`.
///
/// # Errors
///
/// Returns [`KeystoneError::Engine`] if the guest rejects the pair.
#[instrument(skip(instance), fields(instance_id = instance.id()))]
pub fn open(
    instance: &mut RuntimeInstance,
    arch: Architecture,
    mode: Mode,
) -> Result<EngineHandle, KeystoneError> {
    let raw = {
        let mut frame = instance.scratch();
        let cell = frame.alloc_cell()?;
        let status = frame.instance().ks_open(arch, mode, cell.ptr)?;
        if let Some(code) = status.non_zero() {
            return Err(engine_error(frame.instance(), Operation::Open, code));
        }
        frame.instance().read_u32_le(cell.ptr)?
    };

    debug!(handle = raw, "Engine opened");
    Ok(EngineHandle {
        raw,
        owner: instance.id().to_string(),
    })
}

/// Set an engine option. The handle stays usable whatever the outcome.
#[instrument(skip(instance, handle), fields(instance_id = instance.id()))]
pub fn set_option(
    instance: &mut RuntimeInstance,
    handle: &EngineHandle,
    option: OptionType,
    value: OptionValue,
) -> Result<(), KeystoneError> {
    let raw = handle.raw_for(instance)?;
    let status = instance.ks_option(raw, option, value)?;
    if let Some(code) = status.non_zero() {
        return Err(engine_error(instance, Operation::SetOption, code));
    }
    Ok(())
}

/// Assemble `source` at base `address`.
///
/// The output buffer is copied to the host before it is returned to the
/// guest with `ks_free`. A failed call leaves the handle usable.
#[instrument(
    skip(instance, handle, source),
    fields(instance_id = instance.id(), source_len = source.len())
)]
pub fn assemble(
    instance: &mut RuntimeInstance,
    handle: &EngineHandle,
    source: &str,
    address: u64,
) -> Result<Assembly, KeystoneError> {
    let raw = handle.raw_for(instance)?;

    let mut frame = instance.scratch();
    let text = frame.alloc_c_string(source)?;
    let encoding = frame.alloc_cell()?;
    let size = frame.alloc_cell()?;
    let count = frame.alloc_cell()?;

    let inst = frame.instance();
    let status = inst.ks_asm(raw, text.ptr, address, encoding.ptr, size.ptr, count.ptr)?;
    if !status.is_ok() {
        // `ks_asm` reports failure as -1; the reason is in the handle's errno.
        let errno = inst.ks_errno(raw)?;
        let code = errno.non_zero().or(status.non_zero());
        if let Some(code) = code {
            return Err(engine_error(inst, Operation::Assemble, code));
        }
    }

    let output = inst.read_u32_le(encoding.ptr)?;
    let copied = copy_output(inst, output, size.ptr, count.ptr);
    if output != 0 {
        inst.ks_free(output)?;
    }
    let assembly = copied?;

    debug!(output_len = assembly.bytes.len(), statements = assembly.statements, "Assembled");
    Ok(assembly)
}

/// Copy the guest output buffer out before it is handed back to `ks_free`.
fn copy_output(
    instance: &RuntimeInstance,
    output: GuestPtr,
    size: GuestPtr,
    count: GuestPtr,
) -> Result<Assembly, KeystoneError> {
    let len = instance.read_u32_le(size)?;
    let statements = instance.read_u32_le(count)?;
    let bytes = instance.read_bytes(output, len)?;
    Ok(Assembly { bytes, statements })
}

/// Close the engine, consuming the handle.
#[instrument(skip(instance, handle), fields(instance_id = instance.id()))]
pub fn close(instance: &mut RuntimeInstance, handle: EngineHandle) -> Result<(), KeystoneError> {
    let raw = handle.raw_for(instance)?;
    let status = instance.ks_close(raw)?;
    if let Some(code) = status.non_zero() {
        return Err(engine_error(instance, Operation::Close, code));
    }
    debug!(handle = raw, "Engine closed");
    Ok(())
}

/// Last status code recorded on the handle.
pub fn last_error(
    instance: &mut RuntimeInstance,
    handle: &EngineHandle,
) -> Result<ErrorCode, KeystoneError> {
    let raw = handle.raw_for(instance)?;
    instance.ks_errno(raw)
}

/// Query the guest API version.
pub fn version(instance: &mut RuntimeInstance) -> Result<Version, KeystoneError> {
    let mut frame = instance.scratch();
    let major = frame.alloc_cell()?;
    let minor = frame.alloc_cell()?;

    let inst = frame.instance();
    inst.ks_version(major.ptr, minor.ptr)?;
    Ok(Version {
        major: inst.read_u32_le(major.ptr)?,
        minor: inst.read_u32_le(minor.ptr)?,
    })
}
