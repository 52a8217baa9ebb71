//! Linear memory bridge.
//!
//! Helpers for moving data across the sandbox boundary. Guest memory is
//! allocated with the guest's own `malloc`/`free` exports; the host only
//! copies bytes in and out of regions it was handed.
//!
//! Every scratch region used by a protocol call is acquired through a
//! [`ScratchFrame`], which releases all of them when it goes out of scope,
//! whether the call succeeded, returned early with an error, or unwound.

use tracing::{trace, warn};

use keystone_common::KeystoneError;

use crate::instance::{GuestPtr, RuntimeInstance, exports};

/// Size of a 32-bit out-parameter cell.
pub const CELL_SIZE: u32 = 4;

/// A `(pointer, length)` pair inside guest linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Guest pointer to the first byte.
    pub ptr: GuestPtr,
    /// Length in bytes.
    pub len: u32,
}

impl RuntimeInstance {
    /// Allocate `size` bytes with the guest allocator.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::AllocationFailed`] if the guest returns null.
    pub fn allocate(&mut self, size: u32) -> Result<GuestPtr, KeystoneError> {
        let ptr = self.invoke(exports::MALLOC, |e| &e.malloc, size)?;
        if ptr == 0 {
            warn!(instance_id = %self.id(), size, "Guest allocator returned null");
            return Err(KeystoneError::AllocationFailed { size });
        }

        let stats = &mut self.store.data_mut().stats;
        stats.allocations += 1;
        stats.bytes_allocated += u64::from(size);

        trace!(ptr, size, "allocated");
        Ok(ptr)
    }

    /// Release a pointer with the guest deallocator.
    ///
    /// Best-effort: a failure is logged and otherwise ignored.
    pub fn release(&mut self, ptr: GuestPtr) {
        match self.invoke(exports::FREE, |e| &e.free, ptr) {
            Ok(()) => {
                self.store.data_mut().stats.releases += 1;
                trace!(ptr, "released");
            }
            Err(e) => {
                warn!(instance_id = %self.id(), ptr, error = %e, "Failed to release guest memory");
            }
        }
    }

    /// Copy `bytes` into guest memory at `ptr`.
    pub fn write_bytes(&mut self, ptr: GuestPtr, bytes: &[u8]) -> Result<(), KeystoneError> {
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|_| KeystoneError::MemoryAccess {
                offset: ptr,
                len: bytes.len(),
            })
    }

    /// Copy `len` bytes out of guest memory at `ptr`.
    ///
    /// The range is checked against the current memory size before any host
    /// buffer is allocated.
    pub fn read_bytes(&self, ptr: GuestPtr, len: u32) -> Result<Vec<u8>, KeystoneError> {
        let start = ptr as usize;
        let len = len as usize;
        start
            .checked_add(len)
            .and_then(|end| self.memory.data(&self.store).get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or(KeystoneError::MemoryAccess { offset: ptr, len })
    }

    /// Write a little-endian 32-bit word.
    pub fn write_u32_le(&mut self, ptr: GuestPtr, value: u32) -> Result<(), KeystoneError> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    /// Read a little-endian 32-bit word.
    pub fn read_u32_le(&self, ptr: GuestPtr) -> Result<u32, KeystoneError> {
        let mut word = [0u8; 4];
        self.memory
            .read(&self.store, ptr as usize, &mut word)
            .map_err(|_| KeystoneError::MemoryAccess {
                offset: ptr,
                len: word.len(),
            })?;
        Ok(u32::from_le_bytes(word))
    }

    /// Read a NUL-terminated string of at most the configured length.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn read_c_string(&self, ptr: GuestPtr) -> Result<String, KeystoneError> {
        let data = self.memory.data(&self.store);
        let start = ptr as usize;
        if start >= data.len() {
            return Err(KeystoneError::MemoryAccess { offset: ptr, len: 1 });
        }

        let end = start.saturating_add(self.max_string_len).min(data.len());
        let window = &data[start..end];
        let Some(nul) = window.iter().position(|&b| b == 0) else {
            return Err(KeystoneError::UnterminatedString {
                offset: ptr,
                limit: self.max_string_len,
            });
        };

        Ok(String::from_utf8_lossy(&window[..nul]).into_owned())
    }

    /// Open a scratch frame whose regions are released when it is dropped.
    pub fn scratch(&mut self) -> ScratchFrame<'_> {
        ScratchFrame {
            instance: self,
            regions: Vec::new(),
        }
    }
}

/// Scoped set of scratch allocations.
///
/// Regions are released in reverse acquisition order exactly once, when the
/// frame is dropped.
pub struct ScratchFrame<'a> {
    instance: &'a mut RuntimeInstance,
    regions: Vec<MemoryRegion>,
}

impl ScratchFrame<'_> {
    /// Allocate a region of `len` bytes.
    pub fn alloc(&mut self, len: u32) -> Result<MemoryRegion, KeystoneError> {
        let ptr = self.instance.allocate(len)?;
        let region = MemoryRegion { ptr, len };
        self.regions.push(region);
        Ok(region)
    }

    /// Allocate a zeroed 32-bit out-parameter cell.
    pub fn alloc_cell(&mut self) -> Result<MemoryRegion, KeystoneError> {
        let cell = self.alloc(CELL_SIZE)?;
        self.instance.write_u32_le(cell.ptr, 0)?;
        Ok(cell)
    }

    /// Allocate and fill a NUL-terminated copy of `text`.
    pub fn alloc_c_string(&mut self, text: &str) -> Result<MemoryRegion, KeystoneError> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);

        let len = u32::try_from(bytes.len()).map_err(|_| KeystoneError::AllocationFailed {
            size: u32::MAX,
        })?;
        let region = self.alloc(len)?;
        self.instance.write_bytes(region.ptr, &bytes)?;
        Ok(region)
    }

    /// The instance the frame allocates from.
    pub fn instance(&mut self) -> &mut RuntimeInstance {
        &mut *self.instance
    }

    /// Number of regions currently held by the frame.
    pub fn live(&self) -> usize {
        self.regions.len()
    }
}

impl Drop for ScratchFrame<'_> {
    fn drop(&mut self) {
        while let Some(region) = self.regions.pop() {
            self.instance.release(region.ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_common::SandboxConfig;
    use wasmtime::Linker;

    use crate::{CompiledArtifact, SandboxEngine};

    // Bump allocator that refuses requests above 0x8000 bytes.
    const BRIDGE_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (global $heap (mut i32) (i32.const 1024))
            (data (i32.const 16) "hello\00")
            (data (i32.const 32) "no terminator")
            (func (export "malloc") (param i32) (result i32)
                (local $p i32)
                (if (i32.gt_u (local.get 0) (i32.const 0x8000))
                    (then (return (i32.const 0))))
                (local.set $p (global.get $heap))
                (global.set $heap (i32.add (global.get $heap) (local.get 0)))
                (local.get $p))
            (func (export "free") (param i32))
            (func (export "ks_open") (param i32 i32 i32) (result i32) (i32.const 0))
            (func (export "ks_option") (param i32 i32 i32) (result i32) (i32.const 0))
            (func (export "ks_asm") (param i32 i32 i64 i32 i32 i32) (result i32) (i32.const 0))
            (func (export "ks_free") (param i32))
            (func (export "ks_close") (param i32) (result i32) (i32.const 0))
            (func (export "ks_errno") (param i32) (result i32) (i32.const 0))
            (func (export "ks_strerror") (param i32) (result i32) (i32.const 16))
            (func (export "ks_version") (param i32 i32) (result i32) (i32.const 9))
            (func (export "ks_arch_supported") (param i32) (result i32) (i32.const 1))
        )
    "#;

    fn instance_with(config: &SandboxConfig) -> RuntimeInstance {
        let engine = SandboxEngine::new(config).unwrap();
        let artifact = CompiledArtifact::from_wat(&engine, BRIDGE_WAT).unwrap();
        let linker = Linker::new(engine.inner());
        let pre = linker.instantiate_pre(artifact.module()).unwrap();
        RuntimeInstance::instantiate(&engine, &pre).unwrap()
    }

    fn instance() -> RuntimeInstance {
        instance_with(&SandboxConfig::default())
    }

    #[test]
    fn test_allocate_and_release_counted() {
        let mut instance = instance();

        let ptr = instance.allocate(64).unwrap();
        assert_eq!(ptr, 1024);
        instance.release(ptr);

        let stats = instance.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.bytes_allocated, 64);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn test_allocation_failed_on_null() {
        let mut instance = instance();

        let err = instance.allocate(0x10000).unwrap_err();
        assert!(matches!(err, KeystoneError::AllocationFailed { size: 0x10000 }));
        assert_eq!(instance.stats().allocations, 0);
        assert!(!instance.is_poisoned());
    }

    #[test]
    fn test_bytes_roundtrip_and_words() {
        let mut instance = instance();
        let ptr = instance.allocate(16).unwrap();

        instance.write_bytes(ptr, &[0x31, 0xC0, 0xC3]).unwrap();
        assert_eq!(instance.read_bytes(ptr, 3).unwrap(), vec![0x31, 0xC0, 0xC3]);

        instance.write_u32_le(ptr + 4, 0xDEAD_BEEF).unwrap();
        assert_eq!(instance.read_bytes(ptr + 4, 4).unwrap(), vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(instance.read_u32_le(ptr + 4).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut instance = instance();
        let end = u32::try_from(instance.memory_size()).unwrap();

        assert!(matches!(
            instance.read_bytes(end - 2, 4),
            Err(KeystoneError::MemoryAccess { .. })
        ));
        assert!(matches!(
            instance.write_u32_le(end, 1),
            Err(KeystoneError::MemoryAccess { .. })
        ));
        assert!(matches!(
            instance.read_c_string(end + 10),
            Err(KeystoneError::MemoryAccess { .. })
        ));
    }

    #[test]
    fn test_read_bytes_rejects_oversized_length() {
        let instance = instance();

        let err = instance.read_bytes(1024, u32::MAX).unwrap_err();
        assert!(matches!(
            err,
            KeystoneError::MemoryAccess { offset: 1024, len } if len == u32::MAX as usize
        ));
        assert!(matches!(
            instance.read_bytes(u32::MAX, 2),
            Err(KeystoneError::MemoryAccess { .. })
        ));
        assert!(instance.read_bytes(1024, 0).unwrap().is_empty());
    }

    #[test]
    fn test_read_c_string() {
        let instance = instance();

        assert_eq!(instance.read_c_string(16).unwrap(), "hello");
    }

    #[test]
    fn test_read_c_string_limit() {
        let config = SandboxConfig {
            max_string_len: 8,
            ..Default::default()
        };
        let instance = instance_with(&config);

        let err = instance.read_c_string(32).unwrap_err();
        assert!(matches!(
            err,
            KeystoneError::UnterminatedString { offset: 32, limit: 8 }
        ));
    }

    #[test]
    fn test_scratch_frame_releases_on_drop() {
        let mut instance = instance();

        {
            let mut frame = instance.scratch();
            let text = frame.alloc_c_string("ret").unwrap();
            let cell = frame.alloc_cell().unwrap();
            assert_eq!(frame.live(), 2);
            assert_eq!(text.len, 4);

            let inst = frame.instance();
            assert_eq!(inst.read_bytes(text.ptr, 4).unwrap(), b"ret\0");
            assert_eq!(inst.read_u32_le(cell.ptr).unwrap(), 0);
        }

        let stats = instance.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.releases, 2);
    }

    #[test]
    fn test_scratch_frame_releases_on_error_path() {
        fn failing_call(instance: &mut RuntimeInstance) -> Result<(), KeystoneError> {
            let mut frame = instance.scratch();
            frame.alloc_cell()?;
            frame.alloc_cell()?;
            frame.alloc(0x10000)?;
            unreachable!("allocation above must fail");
        }

        let mut instance = instance();
        let err = failing_call(&mut instance).unwrap_err();

        assert!(matches!(err, KeystoneError::AllocationFailed { .. }));
        assert_eq!(instance.stats().allocations, 2);
        assert_eq!(instance.stats().releases, 2);
    }
}
