//! The linked-program data model shared by linker, validator and interpreter.
//!
//! Everything is arena+index: module tables hold ranges into the shared
//! word/dword buffers, arena addresses for strings and globals, and function
//! indices. No raw pointers anywhere, so a partially built or dropped
//! [`ProgramContext`] can never dangle.

use crate::value::{DWord, Word};

/// Value-stack size in words. A call that would push its frame past this
/// limit is a fatal stack overflow.
pub const DEFAULT_STACK_WORDS: usize = 1 << 20;

/// The arena starts with this many zero bytes so address 0 is never a valid
/// reference target.
pub const ARENA_NULL_PAD: usize = 8;

/// Per-module pools, fully resolved at link time and immutable afterwards.
#[derive(Debug, Default, Clone)]
pub struct ModuleTable {
    /// Range of this module's word constants inside [`ProgramContext::words`].
    pub word_base: u32,
    pub word_count: u16,
    /// Range of this module's dword constants inside [`ProgramContext::dwords`].
    pub dword_base: u32,
    pub dword_count: u16,
    /// Arena address of each constant string (NUL-terminated in the arena).
    pub string_pool: Vec<u64>,
    /// Arena address of each global, internals first then resolved externals.
    pub global_pool: Vec<u64>,
    /// Function index of each pool entry, internals first then externals.
    pub function_pool: Vec<u32>,
}

/// One resolved function: frame shape plus a range into the flat code buffer.
#[derive(Debug, Clone)]
pub struct Function {
    /// Fully qualified `<module-path>.<name>` signature, kept for diagnostics.
    pub signature: String,
    /// Index of the owning module table.
    pub module: u32,
    /// Argument word count; the first `awc` locals are the arguments.
    pub awc: u16,
    /// Local word count; `awc <= lwc` is enforced by the validator.
    pub lwc: u16,
    /// Maximum operand-stack word count the validator proves.
    pub swc: u16,
    /// Return word count.
    pub rwc: u16,
    /// Byte offset of the body inside [`ProgramContext::code`] (8-byte aligned).
    pub code_start: u32,
    pub code_len: u32,
}

impl Function {
    #[inline]
    pub fn code_end(&self) -> u32 {
        self.code_start + self.code_len
    }
}

/// The fully linked program: every buffer the VM touches, exclusively owned.
///
/// Produced by [`crate::linker::link`]; the mirror teardown is `Drop`, which
/// releases the per-module pool vectors and then the flat buffers regardless
/// of how far construction got.
#[derive(Debug, Default)]
pub struct ProgramContext {
    /// All modules' word constants, back to back.
    pub words: Vec<Word>,
    /// All modules' dword constants, back to back.
    pub dwords: Vec<DWord>,
    /// All function bodies, each 8-byte aligned.
    pub code: Vec<u8>,
    /// The data arena: null pad, string bytes, aligned globals, then the
    /// runtime heap. References held by bytecode are byte addresses in here.
    pub arena: Vec<u8>,
    /// First heap byte; everything below is fixed at link time.
    pub heap_base: usize,
    pub modules: Vec<ModuleTable>,
    pub functions: Vec<Function>,
    /// Index of `<root>/Main.Main`.
    pub entry: u32,
    /// The value stack. Only the interpreter mutates it.
    pub stack: Vec<Word>,
}

impl ProgramContext {
    #[inline]
    pub fn function(&self, idx: u32) -> &Function {
        &self.functions[idx as usize]
    }

    #[inline]
    pub fn module(&self, idx: u32) -> &ModuleTable {
        &self.modules[idx as usize]
    }

    /// A function's bytecode body.
    #[inline]
    pub fn body(&self, func: &Function) -> &[u8] {
        &self.code[func.code_start as usize..func.code_end() as usize]
    }
}
