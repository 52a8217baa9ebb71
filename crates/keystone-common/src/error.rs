//! Error types for wasm-keystone.
//!
//! This module defines the error taxonomy of the sandbox boundary using `thiserror`:
//! - [`KeystoneError`]: Top-level errors for loading and driving a guest instance
//! - [`EngineError`]: A non-zero status returned by the guest, with its translated text
//! - [`Operation`]: The protocol step that produced an [`EngineError`]

use std::fmt;

use thiserror::Error;

use crate::consts::ErrorCode;

/// Top-level errors.
///
/// These errors represent failures that can occur while bringing up the
/// sandbox and driving the guest through its open/option/assemble/close
/// protocol.
#[derive(Error, Debug)]
pub enum KeystoneError {
    /// The sandbox failed to compile or instantiate the guest artifact.
    ///
    /// Fatal for the load attempt; no partial instance is exposed.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the compile or instantiate failure.
        reason: String,
    },

    /// The sandbox failed to execute an exported call (trap, signature mismatch).
    ///
    /// Fatal for the owning runtime instance.
    #[error("Guest call `{export}` failed: {message}")]
    HostCall {
        /// Name of the guest export being called.
        export: String,
        /// Trap or interpreter failure description.
        message: String,
    },

    /// The runtime instance previously hit a [`KeystoneError::HostCall`] failure
    /// and refuses further calls.
    #[error("Runtime instance {instance_id} is poisoned and must be discarded")]
    InstancePoisoned {
        /// Identifier of the poisoned instance.
        instance_id: String,
    },

    /// The guest's own allocator returned a null pointer.
    #[error("Guest allocator returned null for {size} bytes")]
    AllocationFailed {
        /// Requested allocation size in bytes.
        size: u32,
    },

    /// A read or write fell outside the guest's linear memory.
    #[error("Linear memory access out of bounds: {len} bytes at {offset:#x}")]
    MemoryAccess {
        /// Guest pointer of the access.
        offset: u32,
        /// Number of bytes accessed.
        len: usize,
    },

    /// A guest string had no NUL terminator within the allowed length.
    #[error("Unterminated guest string at {offset:#x} (limit {limit} bytes)")]
    UnterminatedString {
        /// Guest pointer of the string.
        offset: u32,
        /// Maximum number of bytes scanned.
        limit: usize,
    },

    /// The guest returned a non-zero status code.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The engine handle has already been closed.
    #[error("Keystone engine is closed")]
    Closed,

    /// An engine handle was passed to a runtime instance that did not open it.
    #[error("Engine handle belongs to runtime instance {owner}, not {instance_id}")]
    ForeignHandle {
        /// Instance that opened the handle.
        owner: String,
        /// Instance the handle was used with.
        instance_id: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// A non-zero status code from `open`, `option`, `assemble` or `close`.
///
/// The description is the guest's own text for the code; this crate never
/// hardcodes it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to {operation}: {description}")]
pub struct EngineError {
    /// The protocol step that failed.
    pub operation: Operation,
    /// The raw status code.
    pub code: ErrorCode,
    /// Text returned by the guest's string-lookup export.
    pub description: String,
}

/// Protocol steps that return a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `ks_open`
    Open,
    /// `ks_option`
    SetOption,
    /// `ks_asm`
    Assemble,
    /// `ks_close`
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Open => write!(f, "open keystone engine"),
            Operation::SetOption => write!(f, "set keystone option"),
            Operation::Assemble => write!(f, "assemble"),
            Operation::Close => write!(f, "close keystone engine"),
        }
    }
}

impl KeystoneError {
    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `HostCall` error.
    pub fn host_call(export: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostCall {
            export: export.into(),
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the owning runtime instance must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HostCall { .. } | Self::InstancePoisoned { .. } | Self::Instantiation { .. }
        )
    }

    /// Returns `true` if the caller may retry on the same handle with
    /// different parameters.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns the guest status code if this is an [`EngineError`].
    pub fn engine_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Engine(err) => Some(err.code),
            _ => None,
        }
    }
}
