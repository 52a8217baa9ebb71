//! Mock guest shared by the integration tests.
//!
//! The mock follows the Keystone calling convention exactly but "assembles"
//! by echoing: the output of `ks_asm` is the 8-byte little-endian base
//! address followed by the source text. Special inputs:
//! - a source starting with `!` fails with the mnemonic error code (514)
//! - a source starting with `#` calls `__cxa_throw` and traps
//! - a source starting with `~` succeeds but reports an output size past
//!   the end of linear memory
//!
//! Only x86 (4) with mode 16, 32 or 64 opens. The allocator is a bump
//! allocator that asks `emscripten_resize_heap` for more memory (always
//! refused) and returns null once its 8 pages are exhausted. The heap base
//! is set by `__wasm_call_ctors`, so the allocator only works after the
//! initializer has run.

#![allow(dead_code)]

use keystone_common::SandboxConfig;
use keystone_engine::GuestRuntime;

pub const MOCK_GUEST_WAT: &str = r#"
(module
    (import "env" "emscripten_resize_heap" (func $resize_heap (param i32) (result i32)))
    (import "env" "__cxa_throw" (func $throw (param i32 i32 i32)))

    (memory (export "memory") 8)
    (global $heap (mut i32) (i32.const 0))

    (data (i32.const 64) "OK (KS_ERR_OK)\00")
    (data (i32.const 128) "No memory available or memory not present (KS_ERR_NOMEM)\00")
    (data (i32.const 192) "Invalid/unsupported architecture (KS_ERR_ARCH)\00")
    (data (i32.const 256) "Invalid handle (KS_ERR_HANDLE)\00")
    (data (i32.const 320) "Invalid mode (KS_ERR_MODE)\00")
    (data (i32.const 384) "Invalid option (KS_ERR_OPT_INVALID)\00")
    (data (i32.const 448) "Invalid mnemonic (KS_ERR_ASM_MNEMONICFAIL)\00")
    (data (i32.const 512) "Unknown error code\00")

    (func (export "__wasm_call_ctors")
        (global.set $heap (i32.const 4096)))

    (func $malloc (export "malloc") (param $size i32) (result i32)
        (local $p i32)
        (local $end i32)
        (local.set $p (i32.and (i32.add (global.get $heap) (i32.const 7)) (i32.const -8)))
        (local.set $end (i32.add (local.get $p) (local.get $size)))
        (if (i32.or
                (i32.eqz (global.get $heap))
                (i32.or
                    (i32.gt_u (local.get $size) (i32.const 0x10000000))
                    (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const 65536)))))
            (then
                (drop (call $resize_heap (local.get $end)))
                (return (i32.const 0))))
        (global.set $heap (local.get $end))
        (local.get $p))

    (func (export "free") (param i32))

    (func $strlen (param $s i32) (result i32)
        (local $n i32)
        (block $done
            (loop $next
                (br_if $done (i32.eqz (i32.load8_u (i32.add (local.get $s) (local.get $n)))))
                (local.set $n (i32.add (local.get $n) (i32.const 1)))
                (br $next)))
        (local.get $n))

    (func $lines (param $s i32) (param $len i32) (result i32)
        (local $i i32)
        (local $n i32)
        (block $done
            (loop $next
                (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
                (if (i32.eq (i32.load8_u (i32.add (local.get $s) (local.get $i))) (i32.const 10))
                    (then (local.set $n (i32.add (local.get $n) (i32.const 1)))))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $next)))
        (local.get $n))

    ;; Handle layout: +0 errno, +4 syntax, +8 closed flag.
    (func (export "ks_open") (param $arch i32) (param $mode i32) (param $out i32) (result i32)
        (local $h i32)
        (if (i32.ne (local.get $arch) (i32.const 4))
            (then (return (i32.const 2))))
        (if (i32.eqz (i32.or
                (i32.eq (local.get $mode) (i32.const 2))
                (i32.or
                    (i32.eq (local.get $mode) (i32.const 4))
                    (i32.eq (local.get $mode) (i32.const 8)))))
            (then (return (i32.const 4))))
        (local.set $h (call $malloc (i32.const 16)))
        (if (i32.eqz (local.get $h))
            (then (return (i32.const 1))))
        (i32.store (local.get $h) (i32.const 0))
        (i32.store offset=4 (local.get $h) (i32.const 1))
        (i32.store offset=8 (local.get $h) (i32.const 0))
        (i32.store (local.get $out) (local.get $h))
        (i32.const 0))

    (func (export "ks_option") (param $h i32) (param $type i32) (param $value i32) (result i32)
        (if (i32.ne (local.get $type) (i32.const 1))
            (then
                (i32.store (local.get $h) (i32.const 6))
                (return (i32.const 6))))
        (if (i32.or
                (i32.ne (i32.popcnt (local.get $value)) (i32.const 1))
                (i32.gt_u (local.get $value) (i32.const 32)))
            (then
                (i32.store (local.get $h) (i32.const 6))
                (return (i32.const 6))))
        (i32.store offset=4 (local.get $h) (local.get $value))
        (i32.store (local.get $h) (i32.const 0))
        (i32.const 0))

    (func (export "ks_asm")
        (param $h i32) (param $src i32) (param $addr i64)
        (param $enc i32) (param $size i32) (param $count i32)
        (result i32)
        (local $len i32)
        (local $first i32)
        (local $out i32)
        (local.set $len (call $strlen (local.get $src)))
        (local.set $first (i32.load8_u (local.get $src)))
        (if (i32.eq (local.get $first) (i32.const 33))
            (then
                (i32.store (local.get $h) (i32.const 514))
                (return (i32.const -1))))
        (if (i32.eq (local.get $first) (i32.const 35))
            (then
                (call $throw (i32.const 0) (i32.const 0) (i32.const 0))
                (unreachable)))
        (local.set $out (call $malloc (i32.add (local.get $len) (i32.const 8))))
        (if (i32.eqz (local.get $out))
            (then
                (i32.store (local.get $h) (i32.const 1))
                (return (i32.const -1))))
        (i64.store (local.get $out) (local.get $addr))
        (memory.copy
            (i32.add (local.get $out) (i32.const 8))
            (local.get $src)
            (local.get $len))
        (i32.store (local.get $enc) (local.get $out))
        (i32.store (local.get $size) (i32.add (local.get $len) (i32.const 8)))
        (if (i32.eq (local.get $first) (i32.const 126))
            (then (i32.store (local.get $size) (i32.const -16))))
        (i32.store (local.get $count) (call $lines (local.get $src) (local.get $len)))
        (i32.store (local.get $h) (i32.const 0))
        (i32.const 0))

    (func (export "ks_free") (param i32))

    (func (export "ks_close") (param $h i32) (result i32)
        (if (i32.eqz (local.get $h))
            (then (return (i32.const 3))))
        (if (i32.load offset=8 (local.get $h))
            (then (return (i32.const 3))))
        (i32.store offset=8 (local.get $h) (i32.const 1))
        (i32.const 0))

    (func (export "ks_errno") (param $h i32) (result i32)
        (if (i32.eqz (local.get $h))
            (then (return (i32.const 3))))
        (i32.load (local.get $h)))

    (func (export "ks_strerror") (param $code i32) (result i32)
        (if (i32.eqz (local.get $code)) (then (return (i32.const 64))))
        (if (i32.eq (local.get $code) (i32.const 1)) (then (return (i32.const 128))))
        (if (i32.eq (local.get $code) (i32.const 2)) (then (return (i32.const 192))))
        (if (i32.eq (local.get $code) (i32.const 3)) (then (return (i32.const 256))))
        (if (i32.eq (local.get $code) (i32.const 4)) (then (return (i32.const 320))))
        (if (i32.eq (local.get $code) (i32.const 6)) (then (return (i32.const 384))))
        (if (i32.eq (local.get $code) (i32.const 514)) (then (return (i32.const 448))))
        (i32.const 512))

    (func (export "ks_version") (param $major i32) (param $minor i32) (result i32)
        (i32.store (local.get $major) (i32.const 0))
        (i32.store (local.get $minor) (i32.const 9))
        (i32.const 9))

    (func (export "ks_arch_supported") (param $arch i32) (result i32)
        (i32.eq (local.get $arch) (i32.const 4)))
)
"#;

/// Runtime over the mock guest with the default sandbox configuration.
pub fn mock_runtime() -> GuestRuntime {
    GuestRuntime::from_wat(&SandboxConfig::default(), MOCK_GUEST_WAT).unwrap()
}

/// What the mock returns for `source` assembled at `address`.
pub fn echo(source: &str, address: u64) -> Vec<u8> {
    let mut expected = address.to_le_bytes().to_vec();
    expected.extend_from_slice(source.as_bytes());
    expected
}
