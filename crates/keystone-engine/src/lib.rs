//! Keystone assembler API over the sandboxed guest.
//!
//! This crate drives the Keystone guest through its open, option, assemble
//! and close protocol:
//! - [`GuestRuntime`]: Compiles the artifact once and loads instances
//! - [`protocol`]: The call sequences, with scoped scratch memory
//! - [`translate`]: Status codes to text, via the guest itself
//! - [`Keystone`]: Lifecycle wrapper owning one instance and one handle
//! - [`SharedKeystone`]: Opt-in lock around a [`Keystone`]
//!
//! # Example
//!
//! ```ignore
//! use keystone_common::{Architecture, Mode, Syntax};
//! use keystone_engine::Keystone;
//!
//! let mut ks = Keystone::new(Architecture::X86, Mode::MODE_64)?;
//! ks.set_syntax(Syntax::Intel)?;
//! let code = ks.assemble(".code64\nxor rax, rax\nret\n", 0)?;
//! assert_eq!(code, [0x48, 0x31, 0xC0, 0xC3]);
//! ```

pub mod keystone;
pub mod protocol;
pub mod runtime;
pub mod sync;
pub mod translate;

pub use keystone::Keystone;
pub use protocol::{Assembly, EngineHandle, Version};
pub use runtime::GuestRuntime;
pub use sync::SharedKeystone;
