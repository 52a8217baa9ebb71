//! Import stubs for the Keystone guest.
//!
//! The guest artifact was built for a host with a C library, a filesystem
//! and a growable heap. The sandbox provides none of these. This crate
//! supplies a fixed-result stub for every import the artifact declares.
//!
//! # Modules
//!
//! - [`shim`]: The versioned stub table and import verification
//! - [`linker`]: Registration of the stubs on a Wasmtime linker
//!
//! # Stub behavior
//!
//! 1. **Syscalls and file descriptors** return a fixed status; no real I/O
//!    is ever performed.
//! 2. **Heap growth** is refused.
//! 3. **Exit** records the requested code on the instance and returns.
//! 4. **Exception throw and abort** are logged; the guest traps right after,
//!    which poisons the instance.

pub mod linker;
pub mod shim;

pub use linker::{link_guest, register_all};
pub use shim::{
    IMPORT_NAMESPACE, ImportMismatch, SHIM_TABLE, SHIM_VERSION, ShimEntry, StubBehavior, Word,
    lookup, verify_imports,
};
