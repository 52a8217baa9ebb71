//! Stub registration for Wasmtime linkers.
//!
//! This module turns [`SHIM_TABLE`] into host functions on a
//! [`Linker<GuestContext>`] and prepares a linker for one compiled artifact.

use keystone_common::KeystoneError;
use keystone_core::GuestContext;
use tracing::{debug, warn};
use wasmtime::{Caller, Engine, Linker, Module, Val};

use crate::shim::{IMPORT_NAMESPACE, ImportMismatch, SHIM_TABLE, ShimEntry, StubBehavior, verify_imports};

/// Register every stub of [`SHIM_TABLE`] on a linker.
///
/// # Errors
///
/// Returns an error if a stub is already defined on the linker.
pub fn register_all(linker: &mut Linker<GuestContext>) -> Result<(), KeystoneError> {
    for entry in &SHIM_TABLE {
        register_stub(linker, entry)?;
    }
    Ok(())
}

/// Register a single stub.
///
/// Each invocation is counted on the calling instance's context and logged.
pub fn register_stub(
    linker: &mut Linker<GuestContext>,
    entry: &'static ShimEntry,
) -> Result<(), KeystoneError> {
    let ty = entry.func_type(linker.engine());

    linker
        .func_new(
            IMPORT_NAMESPACE,
            entry.name,
            ty,
            move |mut caller: Caller<'_, GuestContext>, params: &[Val], results: &mut [Val]| {
                let ctx = caller.data_mut();
                ctx.record_shim_call(entry.name);

                if entry.behavior.is_fatal_path() {
                    warn!(
                        instance_id = %ctx.instance_id,
                        stub = entry.name,
                        "Guest reached an unsupported hook; a trap follows"
                    );
                } else {
                    debug!(instance_id = %ctx.instance_id, stub = entry.name, "Import stub called");
                }

                match entry.behavior {
                    StubBehavior::Status(status) => {
                        if let Some(slot) = results.first_mut() {
                            *slot = Val::I32(status);
                        }
                    }
                    StubBehavior::Exit => {
                        let code = params.first().and_then(Val::i32);
                        ctx.exit_code = code;
                        debug!(instance_id = %ctx.instance_id, ?code, "Guest requested exit");
                    }
                    StubBehavior::Throw | StubBehavior::Abort => {}
                }

                Ok(())
            },
        )
        .map_err(|e| {
            KeystoneError::instantiation(format!(
                "Failed to register import stub `{}`: {e}",
                entry.name
            ))
        })?;

    Ok(())
}

/// Build a linker that satisfies every import of `module`.
///
/// In strict mode any [`ImportMismatch`] fails. In lenient mode imports
/// missing from the table are linked to stubs that trap when called; other
/// mismatches still fail.
///
/// # Errors
///
/// Returns [`KeystoneError::Instantiation`] listing the offending imports.
pub fn link_guest(
    engine: &Engine,
    module: &Module,
    strict: bool,
) -> Result<Linker<GuestContext>, KeystoneError> {
    let mut linker = Linker::new(engine);
    register_all(&mut linker)?;

    let mismatches = verify_imports(module);
    let fatal: Vec<&ImportMismatch> = mismatches
        .iter()
        .filter(|m| strict || !m.is_trappable())
        .collect();

    if !fatal.is_empty() {
        let listed = fatal
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(KeystoneError::instantiation(format!(
            "Guest imports do not match the stub table: {listed}"
        )));
    }

    if !mismatches.is_empty() {
        for mismatch in &mismatches {
            warn!(%mismatch, "Linking unknown import as a trap");
        }
        linker.define_unknown_imports_as_traps(module).map_err(|e| {
            KeystoneError::instantiation(format!("Failed to define trapping imports: {e}"))
        })?;
    }

    Ok(linker)
}
