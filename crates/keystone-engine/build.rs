//! Sets `cfg(keystone_artifact)` when the guest artifact that
//! `keystone-core` embeds is present, so the scenarios that need it are
//! reported as ignored instead of passing vacuously.

use std::path::PathBuf;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(keystone_artifact)");
    println!("cargo::rerun-if-env-changed=KEYSTONE_WASM");
    println!("cargo::rerun-if-changed=../keystone-core/assets/keystone.wasm");

    let source = std::env::var_os("KEYSTONE_WASM")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("../keystone-core/assets/keystone.wasm"));

    if source.is_file() {
        println!("cargo::rustc-cfg=keystone_artifact");
    }
}
