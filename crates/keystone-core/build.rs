//! Embeds the Keystone guest artifact.
//!
//! The artifact is taken from `$KEYSTONE_WASM` when set, otherwise from
//! `assets/keystone.wasm`. Without either an empty artifact is embedded and
//! loading fails at runtime with an instantiation error.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=KEYSTONE_WASM");
    println!("cargo:rerun-if-changed=assets/keystone.wasm");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let target = out_dir.join("keystone.wasm");

    let source = std::env::var_os("KEYSTONE_WASM")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("assets/keystone.wasm"));

    if source.is_file() {
        println!("cargo:rerun-if-changed={}", source.display());
        std::fs::copy(&source, &target)?;
    } else {
        println!(
            "cargo:warning=keystone guest artifact not found at {}; embedding an empty artifact",
            source.display()
        );
        std::fs::write(&target, b"")?;
    }

    Ok(())
}
