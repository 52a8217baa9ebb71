//! wasm-keystone CLI entry point.
//!
//! Assembles a source file with the Keystone guest running inside the
//! interpreter-only sandbox and writes the machine code to a file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keystone_common::{ConfigFile, RuntimeConfig, consts::supported_table};
use keystone_engine::{GuestRuntime, Keystone};

#[derive(Parser, Debug)]
#[command(name = "wasm-keystone", version)]
#[command(about = "Assemble source files with the sandboxed Keystone engine")]
#[command(after_long_help = long_help())]
struct Cli {
    /// Target architecture
    #[arg(long, env = "KEYSTONE_ARCH")]
    arch: Option<String>,

    /// Target mode; combine flags with '+', e.g. "32+be"
    #[arg(long, env = "KEYSTONE_MODE")]
    mode: Option<String>,

    /// Assembly syntax
    #[arg(long, env = "KEYSTONE_SYNTAX")]
    syntax: Option<String>,

    /// Base address, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_address)]
    addr: Option<u64>,

    /// Path to the source file
    #[arg(long, value_name = "PATH", required_unless_present = "guest_version")]
    src: Option<PathBuf>,

    /// Path of the output file
    #[arg(long, value_name = "PATH", required_unless_present = "guest_version")]
    out: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH", env = "KEYSTONE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the guest library version and exit
    #[arg(long)]
    guest_version: bool,
}

fn long_help() -> String {
    format!("Supported names:\n{}", supported_table())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let defaults = &config.assembler;

    let arch = defaults.architecture()?;
    let mode = defaults.target_mode()?;
    let syntax = defaults.syntax_dialect()?;

    let runtime = GuestRuntime::new(&config.sandbox).context("failed to load keystone guest")?;
    let mut ks = Keystone::open(&runtime, arch, mode)?;

    if cli.guest_version {
        println!("{}", ks.version()?);
        return Ok(());
    }

    let (Some(src), Some(out)) = (&cli.src, &cli.out) else {
        return Err(anyhow!("both --src and --out must be specified"));
    };

    ks.set_syntax(syntax)?;

    let source = std::fs::read_to_string(src)
        .with_context(|| format!("failed to read source file {}", src.display()))?;

    let asm = ks.assemble_detailed(&source, defaults.address)?;
    ks.close()?;

    atomic_write(out, &asm.bytes)?;

    info!(
        src = %src.display(),
        out = %out.display(),
        bytes = asm.bytes.len(),
        statements = asm.statements,
        "Assembled"
    );
    Ok(())
}

/// File values first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?.into_runtime(),
        None => RuntimeConfig::default(),
    };

    let assembler = &mut config.assembler;
    if let Some(arch) = &cli.arch {
        assembler.arch.clone_from(arch);
    }
    if let Some(mode) = &cli.mode {
        assembler.mode.clone_from(mode);
    }
    if let Some(syntax) = &cli.syntax {
        assembler.syntax.clone_from(syntax);
    }
    if let Some(addr) = cli.addr {
        assembler.address = addr;
    }

    config.sandbox.validate()?;
    debug!(?config, "Configuration loaded");
    Ok(config)
}

fn parse_address(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

/// Write to a sibling temporary file, then rename over `path`.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("output path {} has no file name", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, contents)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| {
            format!("failed to rename {} to {}", tmp_path.display(), path.display())
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0").unwrap(), 0);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("0XFFFF0000").unwrap(), 0xFFFF_0000);
        assert!(parse_address("0x").is_err());
        assert!(parse_address("12ab").is_err());
        assert!(parse_address("-1").is_err());
    }

    #[test]
    fn test_src_and_out_required() {
        assert!(Cli::try_parse_from(["wasm-keystone", "--src", "a.s"]).is_err());
        assert!(Cli::try_parse_from(["wasm-keystone", "--src", "a.s", "--out", "a.bin"]).is_ok());
        assert!(Cli::try_parse_from(["wasm-keystone", "--guest-version"]).is_ok());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystone.toml");
        std::fs::write(
            &path,
            "[assembler]\narch = \"arm\"\nmode = \"thumb\"\naddress = 16\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "wasm-keystone",
            "--config",
            path.to_str().unwrap(),
            "--mode",
            "arm",
            "--addr",
            "0x20",
            "--src",
            "a.s",
            "--out",
            "a.bin",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.assembler.arch, "arm");
        assert_eq!(config.assembler.mode, "arm");
        assert_eq!(config.assembler.syntax, "intel");
        assert_eq!(config.assembler.address, 0x20);
    }

    #[test]
    fn test_missing_config_file() {
        let cli = Cli::try_parse_from([
            "wasm-keystone",
            "--config",
            "/nonexistent/keystone.toml",
            "--guest-version",
        ])
        .unwrap();

        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"old").unwrap();

        atomic_write(&path, &[0x31, 0xC0, 0xC3]).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), [0x31, 0xC0, 0xC3]);
        assert!(!dir.path().join("out.bin.tmp").exists());
    }

    #[test]
    fn test_atomic_write_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.bin");

        assert!(atomic_write(&path, b"x").is_err());
        assert!(!path.exists());
    }
}
