//! Lock-serialized access to one engine.

use std::sync::Arc;

use parking_lot::Mutex;

use keystone_common::{ErrorCode, KeystoneError, OptionType, OptionValue, Syntax};

use crate::keystone::Keystone;
use crate::protocol::{Assembly, Version};

/// A [`Keystone`] behind one exclusive lock.
///
/// Clones share the same engine. Calls from different threads are executed
/// one at a time; the guest is never entered concurrently.
#[derive(Clone, Debug)]
pub struct SharedKeystone {
    inner: Arc<Mutex<Keystone>>,
}

impl SharedKeystone {
    pub fn new(keystone: Keystone) -> Self {
        Self {
            inner: Arc::new(Mutex::new(keystone)),
        }
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// Use this to keep a sequence of calls (for example an option change
    /// followed by an assemble) from interleaving with other threads.
    pub fn with<R>(&self, f: impl FnOnce(&mut Keystone) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn set_option(&self, option: OptionType, value: OptionValue) -> Result<(), KeystoneError> {
        self.with(|ks| ks.set_option(option, value))
    }

    pub fn set_syntax(&self, syntax: Syntax) -> Result<(), KeystoneError> {
        self.with(|ks| ks.set_syntax(syntax))
    }

    pub fn assemble(&self, source: &str, address: u64) -> Result<Vec<u8>, KeystoneError> {
        self.with(|ks| ks.assemble(source, address))
    }

    pub fn assemble_detailed(&self, source: &str, address: u64) -> Result<Assembly, KeystoneError> {
        self.with(|ks| ks.assemble_detailed(source, address))
    }

    pub fn last_error(&self) -> Result<ErrorCode, KeystoneError> {
        self.with(Keystone::last_error)
    }

    pub fn version(&self) -> Result<Version, KeystoneError> {
        self.with(Keystone::version)
    }

    /// Close the shared engine for every clone.
    pub fn close(&self) -> Result<(), KeystoneError> {
        self.with(Keystone::close)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }
}

impl From<Keystone> for SharedKeystone {
    fn from(keystone: Keystone) -> Self {
        Self::new(keystone)
    }
}
