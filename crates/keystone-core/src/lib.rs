//! Interpreter-only Wasmtime sandbox for the Keystone guest.
//!
//! This crate provides the execution layer underneath the assembler API:
//! - [`SandboxEngine`]: Wasmtime engine targeting the Pulley interpreter
//! - [`CompiledArtifact`]: The guest module, embedded at build time
//! - [`GuestContext`]: Per-instance store state and counters
//! - [`RuntimeInstance`]: One isolated instantiation with typed exports
//! - [`ScratchFrame`]: Scoped guest allocations released on drop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    SandboxEngine                        │
//! │  (Shared by all instances, thread-safe)                 │
//! │  - Pulley interpreter target                            │
//! │  - Memory ceiling                                       │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  CompiledArtifact                       │
//! │  (Compiled once, shared across instances)               │
//! │  - Pulley bytecode                                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          Store<GuestContext> + RuntimeInstance          │
//! │  (Per engine handle, isolated)                          │
//! │  - Linear memory                                        │
//! │  - Typed guest exports                                  │
//! │  - Allocation and shim counters                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod engine;
pub mod instance;
pub mod memory;
pub mod store;

pub use artifact::{CompiledArtifact, embedded_artifact, has_embedded_artifact};
pub use engine::{SandboxEngine, interpreter_target};
pub use instance::{GuestPtr, RuntimeInstance, exports};
pub use memory::{CELL_SIZE, MemoryRegion, ScratchFrame};
pub use store::{GuestContext, InstanceStats, create_store};
