//! Status code translation.
//!
//! The text for a status code is owned by the guest artifact and read back
//! through its `ks_strerror` export. Nothing here knows what a code means.

use std::num::NonZeroU32;

use tracing::debug;

use keystone_common::{EngineError, ErrorCode, KeystoneError, Operation};
use keystone_core::RuntimeInstance;

/// Ask the guest for the description of `code`.
///
/// A null pointer from the guest yields a generic description carrying the
/// number, so the result is never empty.
pub fn describe(instance: &mut RuntimeInstance, code: NonZeroU32) -> Result<String, KeystoneError> {
    let ptr = instance.ks_strerror(code.get())?;
    if ptr == 0 {
        return Ok(format!("unknown error code {code}"));
    }

    let text = instance.read_c_string(ptr)?;
    if text.is_empty() {
        return Ok(format!("unknown error code {code}"));
    }
    Ok(text)
}

/// Build the [`EngineError`] for a failed protocol step.
///
/// Translation itself can fail (trap, bad pointer); that failure is returned
/// instead of the engine error.
pub fn engine_error(
    instance: &mut RuntimeInstance,
    operation: Operation,
    code: NonZeroU32,
) -> KeystoneError {
    match describe(instance, code) {
        Ok(description) => {
            debug!(%operation, code = code.get(), %description, "Guest reported an error");
            KeystoneError::Engine(EngineError {
                operation,
                code: ErrorCode(code.get()),
                description,
            })
        }
        Err(e) => e,
    }
}
