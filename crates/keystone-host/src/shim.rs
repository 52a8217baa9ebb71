//! The import stub table.
//!
//! The guest artifact is produced by a toolchain that expects a libc-style
//! host. None of those services exist inside the sandbox, so every symbol
//! the artifact imports is satisfied by a stub with a fixed result.
//!
//! The table below is tied to one build of the artifact. A rebuilt artifact
//! may import a different set; run [`verify_imports`] against it and update
//! the table (and [`SHIM_VERSION`]) accordingly.

use std::fmt;

use wasmtime::{Engine, ExternType, FuncType, Module, ValType};

/// Import namespace the guest artifact resolves its imports from.
pub const IMPORT_NAMESPACE: &str = "env";

/// Revision of [`SHIM_TABLE`]. Bump whenever an entry changes.
pub const SHIM_VERSION: u32 = 1;

/// Value type of one stub parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    I32,
    I64,
}

impl Word {
    fn val_type(self) -> ValType {
        match self {
            Self::I32 => ValType::I32,
            Self::I64 => ValType::I64,
        }
    }

    fn from_val_type(ty: &ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(Self::I32),
            ValType::I64 => Some(Self::I64),
            _ => None,
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
        }
    }
}

/// What a stub does when the guest calls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Return a fixed status.
    Status(i32),
    /// Process-exit hook: record the code and return.
    Exit,
    /// Native exception throw. Unsupported; the guest traps right after.
    Throw,
    /// Abort hook. The guest traps right after.
    Abort,
}

impl StubBehavior {
    /// Returns `true` for hooks that precede a fatal guest trap.
    pub fn is_fatal_path(self) -> bool {
        matches!(self, Self::Throw | Self::Abort)
    }
}

/// One entry of the stub table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShimEntry {
    pub name: &'static str,
    pub params: &'static [Word],
    pub results: &'static [Word],
    pub behavior: StubBehavior,
}

impl ShimEntry {
    /// Wasmtime function type of this stub.
    pub fn func_type(&self, engine: &Engine) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|w| w.val_type()),
            self.results.iter().map(|w| w.val_type()),
        )
    }

    /// Returns `true` if `ty` has exactly this entry's signature.
    pub fn matches(&self, ty: &FuncType) -> bool {
        words_match(self.params, ty.params()) && words_match(self.results, ty.results())
    }

    /// Signature in `(params) -> (results)` form.
    pub fn signature(&self) -> String {
        format!("({}) -> ({})", join(self.params), join(self.results))
    }
}

fn words_match(expected: &[Word], actual: impl ExactSizeIterator<Item = ValType>) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    expected
        .iter()
        .zip(actual)
        .all(|(w, ty)| Word::from_val_type(&ty) == Some(*w))
}

fn join(words: &[Word]) -> String {
    words.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn describe_func_type(ty: &FuncType) -> String {
    format!(
        "({}) -> ({})",
        render_types(ty.params()),
        render_types(ty.results())
    )
}

fn render_types(types: impl Iterator<Item = ValType>) -> String {
    types
        .map(|ty| Word::from_val_type(&ty).map_or_else(|| format!("{ty:?}"), |w| w.to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

use StubBehavior::{Abort, Exit, Status, Throw};
use Word::{I32, I64};

const fn entry(
    name: &'static str,
    params: &'static [Word],
    results: &'static [Word],
    behavior: StubBehavior,
) -> ShimEntry {
    ShimEntry {
        name,
        params,
        results,
        behavior,
    }
}

/// Every import of the supported artifact build, in namespace [`IMPORT_NAMESPACE`].
pub static SHIM_TABLE: [ShimEntry; 20] = [
    entry("__cxa_throw", &[I32, I32, I32], &[], Throw),
    entry("__syscall_fstat64", &[I32, I32], &[I32], Status(0)),
    entry("__syscall_getcwd", &[I32, I32], &[I32], Status(1)),
    entry("__syscall_lstat64", &[I32, I32], &[I32], Status(0)),
    entry("__syscall_newfstatat", &[I32, I32, I32, I32], &[I32], Status(0)),
    entry("__syscall_openat", &[I32, I32, I32, I32], &[I32], Status(0)),
    entry("__syscall_stat64", &[I32, I32], &[I32], Status(0)),
    entry("_abort_js", &[], &[], Abort),
    entry("_mmap_js", &[I32, I32, I32, I32, I64, I32, I32], &[I32], Status(1)),
    entry("_munmap_js", &[I32, I32, I32, I32, I32, I64], &[I32], Status(1)),
    // Growth refused: the guest must live within its pre-sized heap.
    entry("emscripten_resize_heap", &[I32], &[I32], Status(0)),
    entry("environ_get", &[I32, I32], &[I32], Status(1)),
    entry("environ_sizes_get", &[I32, I32], &[I32], Status(1)),
    entry("exit", &[I32], &[], Exit),
    entry("fd_close", &[I32], &[I32], Status(1)),
    entry("fd_fdstat_get", &[I32, I32], &[I32], Status(1)),
    entry("fd_pread", &[I32, I32, I32, I64, I32], &[I32], Status(1)),
    entry("fd_read", &[I32, I32, I32, I32], &[I32], Status(1)),
    entry("fd_seek", &[I32, I64, I32, I32], &[I32], Status(1)),
    entry("fd_write", &[I32, I32, I32, I32], &[I32], Status(1)),
];

/// Look up a stub by import name.
pub fn lookup(name: &str) -> Option<&'static ShimEntry> {
    SHIM_TABLE.iter().find(|entry| entry.name == name)
}

/// An import of the guest that the stub table cannot satisfy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportMismatch {
    /// No stub with this name exists.
    #[error("import `{module}::{name}` has no stub")]
    Missing { module: String, name: String },

    /// A stub exists but its signature differs.
    #[error("import `{module}::{name}` expects {found}, stub provides {expected}")]
    Signature {
        module: String,
        name: String,
        expected: String,
        found: String,
    },

    /// The import is not a function (memory, table or global).
    #[error("import `{module}::{name}` is not a function")]
    NotAFunction { module: String, name: String },
}

impl ImportMismatch {
    /// Returns `true` if a trapping stub can stand in for the import.
    pub fn is_trappable(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// Check every import of `module` against the stub table.
///
/// Returns the imports that would fail to link; an empty list means the
/// artifact and the table agree.
pub fn verify_imports(module: &Module) -> Vec<ImportMismatch> {
    let mut mismatches = Vec::new();

    for import in module.imports() {
        let module_name = import.module().to_string();
        let name = import.name().to_string();

        let ExternType::Func(ty) = import.ty() else {
            mismatches.push(ImportMismatch::NotAFunction {
                module: module_name,
                name,
            });
            continue;
        };

        let stub = if module_name == IMPORT_NAMESPACE {
            lookup(&name)
        } else {
            None
        };

        match stub {
            None => mismatches.push(ImportMismatch::Missing {
                module: module_name,
                name,
            }),
            Some(stub) if !stub.matches(&ty) => mismatches.push(ImportMismatch::Signature {
                module: module_name,
                name,
                expected: stub.signature(),
                found: describe_func_type(&ty),
            }),
            Some(_) => {}
        }
    }

    mismatches
}
