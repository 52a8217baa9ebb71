//! Numeric constant tables understood by the Keystone guest.
//!
//! The guest only ever sees plain integers. These newtypes keep the
//! integer spaces apart on the host side and provide the name tables used
//! by front-ends (`x86`, `32`, `intel`, ...). Names are matched
//! case-insensitively.

use std::fmt;
use std::num::NonZeroU32;
use std::ops::BitOr;
use std::str::FromStr;

use thiserror::Error;

/// API version (major, minor) the host bindings are written against.
pub const API_VERSION: (u32, u32) = (0, 9);

/// A name that does not appear in a constant table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} `{name}` (expected one of: {expected})")]
pub struct UnknownName {
    /// Which table was searched.
    pub kind: &'static str,
    /// The rejected input.
    pub name: String,
    /// Comma-separated list of accepted names.
    pub expected: String,
}

fn lookup<T: Copy>(
    table: &[(&'static str, T)],
    kind: &'static str,
    name: &str,
) -> Result<T, UnknownName> {
    let needle = name.trim();
    table
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(needle))
        .map(|(_, value)| *value)
        .ok_or_else(|| UnknownName {
            kind,
            name: name.to_string(),
            expected: table
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Target architecture (`ks_arch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Architecture(pub u32);

impl Architecture {
    pub const ARM: Self = Self(1);
    pub const ARM64: Self = Self(2);
    pub const MIPS: Self = Self(3);
    pub const X86: Self = Self(4);
    pub const PPC: Self = Self(5);
    pub const SPARC: Self = Self(6);
    pub const SYSTEMZ: Self = Self(7);
    pub const HEXAGON: Self = Self(8);
    pub const EVM: Self = Self(9);
    pub const RISCV: Self = Self(10);
    pub const MAX: Self = Self(11);

    const NAMES: &'static [(&'static str, Self)] = &[
        ("arm", Self::ARM),
        ("arm64", Self::ARM64),
        ("mips", Self::MIPS),
        ("x86", Self::X86),
        ("ppc", Self::PPC),
        ("sparc", Self::SPARC),
        ("systemz", Self::SYSTEMZ),
        ("hexagon", Self::HEXAGON),
        ("evm", Self::EVM),
        ("riscv", Self::RISCV),
        ("max", Self::MAX),
    ];

    /// All accepted architecture names, in table order.
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::NAMES.iter().map(|(name, _)| *name)
    }

    /// The table name of this architecture, if it has one.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(_, value)| *value == self)
            .map(|(name, _)| *name)
    }
}

impl FromStr for Architecture {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::NAMES, "architecture", s)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "arch({})", self.0),
        }
    }
}

/// Target mode (`ks_mode`): bit width, endianness or sub-variant flags.
///
/// Several names share a value across architectures (`32`, `mips32`,
/// `ppc32`, ...), so modes display as raw flags. Flags combine with `|`
/// or, when parsing, with `+` (`32+be`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(pub u32);

impl Mode {
    pub const LITTLE_ENDIAN: Self = Self(0);
    pub const BIG_ENDIAN: Self = Self(1 << 30);
    // arm / arm64
    pub const ARM: Self = Self(1 << 0);
    pub const THUMB: Self = Self(1 << 4);
    pub const V8: Self = Self(1 << 6);
    // mips
    pub const MICRO: Self = Self(1 << 4);
    pub const MIPS3: Self = Self(1 << 5);
    pub const MIPS32R6: Self = Self(1 << 6);
    pub const MIPS32: Self = Self(1 << 2);
    pub const MIPS64: Self = Self(1 << 3);
    // x86
    pub const MODE_16: Self = Self(1 << 1);
    pub const MODE_32: Self = Self(1 << 2);
    pub const MODE_64: Self = Self(1 << 3);
    // ppc
    pub const PPC32: Self = Self(1 << 2);
    pub const PPC64: Self = Self(1 << 3);
    pub const QPX: Self = Self(1 << 4);
    // riscv
    pub const RISCV32: Self = Self(1 << 2);
    pub const RISCV64: Self = Self(1 << 3);
    // sparc
    pub const SPARC32: Self = Self(1 << 2);
    pub const SPARC64: Self = Self(1 << 3);
    pub const V9: Self = Self(1 << 4);

    const NAMES: &'static [(&'static str, Self)] = &[
        ("le", Self::LITTLE_ENDIAN),
        ("be", Self::BIG_ENDIAN),
        ("arm", Self::ARM),
        ("thumb", Self::THUMB),
        ("v8", Self::V8),
        ("micro", Self::MICRO),
        ("mips3", Self::MIPS3),
        ("mips32r6", Self::MIPS32R6),
        ("mips32", Self::MIPS32),
        ("mips64", Self::MIPS64),
        ("16", Self::MODE_16),
        ("32", Self::MODE_32),
        ("64", Self::MODE_64),
        ("ppc32", Self::PPC32),
        ("ppc64", Self::PPC64),
        ("qpx", Self::QPX),
        ("riscv32", Self::RISCV32),
        ("riscv64", Self::RISCV64),
        ("sparc32", Self::SPARC32),
        ("sparc64", Self::SPARC64),
        ("v9", Self::V9),
    ];

    /// All accepted mode names, in table order.
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::NAMES.iter().map(|(name, _)| *name)
    }
}

impl BitOr for Mode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromStr for Mode {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('+').try_fold(Self::LITTLE_ENDIAN, |acc, part| {
            lookup(Self::NAMES, "mode", part).map(|mode| acc | mode)
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Option type for `ks_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionType(pub u32);

impl OptionType {
    /// Select the input assembly syntax.
    pub const SYNTAX: Self = Self(1);
    /// Install a symbol resolver callback.
    pub const SYM_RESOLVER: Self = Self(2);
}

/// Option value for `ks_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionValue(pub u32);

/// Assembly syntax dialect, the values accepted for [`OptionType::SYNTAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syntax {
    Intel,
    Att,
    Nasm,
    Masm,
    Gas,
    Radix16,
}

impl Syntax {
    const NAMES: &'static [(&'static str, Self)] = &[
        ("intel", Self::Intel),
        ("att", Self::Att),
        ("nasm", Self::Nasm),
        ("masm", Self::Masm),
        ("gas", Self::Gas),
        ("radix16", Self::Radix16),
    ];

    /// All accepted syntax names, in table order.
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::NAMES.iter().map(|(name, _)| *name)
    }

    /// Numeric option value passed to the guest.
    pub fn value(self) -> OptionValue {
        OptionValue(match self {
            Syntax::Intel => 1 << 0,
            Syntax::Att => 1 << 1,
            Syntax::Nasm => 1 << 2,
            Syntax::Masm => 1 << 3,
            Syntax::Gas => 1 << 4,
            Syntax::Radix16 => 1 << 5,
        })
    }
}

impl From<Syntax> for OptionValue {
    fn from(syntax: Syntax) -> Self {
        syntax.value()
    }
}

impl FromStr for Syntax {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::NAMES, "syntax", s)
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = Self::NAMES
            .iter()
            .find(|(_, value)| value == self)
            .map_or("?", |(name, _)| *name);
        f.write_str(name)
    }
}

/// Status code returned by guest calls (`ks_err`). Zero is success.
///
/// Only the numbers live here; the text for a code always comes from the
/// guest itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const OK: Self = Self(0);
    pub const NOMEM: Self = Self(1);
    pub const ARCH: Self = Self(2);
    pub const HANDLE: Self = Self(3);
    pub const MODE: Self = Self(4);
    pub const VERSION: Self = Self(5);
    pub const OPT_INVALID: Self = Self(6);
    /// First parser-level assembly error.
    pub const ASM: Self = Self(128);
    /// First architecture-specific assembly error.
    pub const ASM_ARCH: Self = Self(512);
    pub const ASM_INVALIDOPERAND: Self = Self(512);
    pub const ASM_MISSINGFEATURE: Self = Self(513);
    pub const ASM_MNEMONICFAIL: Self = Self(514);

    /// Returns `true` for the success code.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// The code as a non-zero value, or `None` for success.
    pub fn non_zero(self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.0)
    }

    /// Returns `true` if the code reports a problem in the assembly input
    /// rather than in the engine configuration.
    pub fn is_assembly_error(self) -> bool {
        self >= Self::ASM
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn cell(column: &[&'static str], row: usize) -> &'static str {
    column.get(row).copied().unwrap_or("")
}

/// Render the supported name table shown in front-end help output.
pub fn supported_table() -> String {
    let arch: Vec<_> = Architecture::names().collect();
    let mode: Vec<_> = Mode::names().collect();
    let syntax: Vec<_> = Syntax::names().collect();
    let rows = arch.len().max(mode.len()).max(syntax.len());

    let border = "+---------+----------+---------+";

    let mut out = String::new();
    out.push_str(border);
    out.push('\n');
    out.push_str("|  arch   |   mode   | syntax  |\n");
    out.push_str(border);
    out.push('\n');
    for row in 0..rows {
        out.push_str(&format!(
            "| {:<7} | {:<8} | {:<7} |\n",
            cell(&arch, row),
            cell(&mode, row),
            cell(&syntax, row)
        ));
    }
    out.push_str(border);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_from_str() {
        assert_eq!("x86".parse::<Architecture>().unwrap(), Architecture::X86);
        assert_eq!("ARM64".parse::<Architecture>().unwrap(), Architecture::ARM64);
        assert_eq!(" riscv ".parse::<Architecture>().unwrap(), Architecture::RISCV);
    }

    #[test]
    fn test_architecture_unknown() {
        let err = "z80".parse::<Architecture>().unwrap_err();
        assert_eq!(err.kind, "architecture");
        assert_eq!(err.name, "z80");
        assert!(err.expected.contains("x86"));
        assert!(err.to_string().starts_with("unknown architecture `z80`"));
    }

    #[test]
    fn test_architecture_display() {
        assert_eq!(Architecture::X86.to_string(), "x86");
        assert_eq!(Architecture(99).to_string(), "arch(99)");
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("32".parse::<Mode>().unwrap(), Mode::MODE_32);
        assert_eq!("64".parse::<Mode>().unwrap(), Mode(8));
        assert_eq!("le".parse::<Mode>().unwrap(), Mode::LITTLE_ENDIAN);
        assert_eq!("thumb".parse::<Mode>().unwrap(), Mode::THUMB);
    }

    #[test]
    fn test_mode_combination() {
        let mode: Mode = "mips32+be".parse().unwrap();
        assert_eq!(mode, Mode::MIPS32 | Mode::BIG_ENDIAN);
        assert_eq!(mode.0, (1 << 2) | (1 << 30));

        assert!("32+nope".parse::<Mode>().is_err());
    }

    #[test]
    fn test_syntax_values() {
        assert_eq!(Syntax::Intel.value(), OptionValue(1));
        assert_eq!(Syntax::Att.value(), OptionValue(2));
        assert_eq!(Syntax::Radix16.value(), OptionValue(32));
        assert_eq!("NASM".parse::<Syntax>().unwrap(), Syntax::Nasm);
        assert_eq!(Syntax::Gas.to_string(), "gas");
    }

    #[test]
    fn test_error_code() {
        assert!(ErrorCode::OK.is_ok());
        assert!(ErrorCode::OK.non_zero().is_none());
        assert_eq!(ErrorCode::OPT_INVALID.non_zero().map(NonZeroU32::get), Some(6));
        assert!(ErrorCode::ASM_MNEMONICFAIL.is_assembly_error());
        assert!(!ErrorCode::MODE.is_assembly_error());
    }

    #[test]
    fn test_supported_table() {
        let table = supported_table();
        assert!(table.contains("| x86     |"));
        assert!(table.contains("radix16"));
        assert!(table.contains("sparc64"));
        // one row per mode name plus three border lines and the header
        assert_eq!(table.lines().count(), Mode::names().count() + 4);
    }

    #[test]
    fn test_cell_pads_short_columns() {
        let column = ["intel", "att"];
        assert_eq!(cell(&column, 1), "att");
        assert_eq!(cell(&column, 2), "");
        assert_eq!(cell(&[], 0), "");
    }
}
