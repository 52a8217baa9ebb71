//! Common types, errors, and constant tables for wasm-keystone.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the sandbox and the assembler front-end
//! - Numeric constant tables (architectures, modes, options, error codes)

pub mod config;
pub mod config_file;
pub mod consts;
pub mod error;

pub use config::{AssemblerDefaults, RuntimeConfig, SandboxConfig};
pub use config_file::{ConfigFile, ConfigFileError};
pub use consts::{Architecture, ErrorCode, Mode, OptionType, OptionValue, Syntax};
pub use error::{EngineError, KeystoneError, Operation};
