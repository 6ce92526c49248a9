//! Linking: turn a tree of parsed modules into a runnable [`ProgramContext`].
//!
//! The link runs in fixed phases over the module list:
//!
//! 1. place each module's word/dword constants in the shared flat buffers,
//! 2. copy string constants into the data arena (NUL-terminated),
//! 3. reserve arena space for internal globals, naturally aligned,
//! 4. copy function bodies into the flat code buffer, 8-byte aligned,
//! 5. register internal symbols, rejecting duplicates,
//! 6. resolve every module's external references against those symbols,
//! 7. locate the entry function and statically validate every body.
//!
//! Per-module pools keep internals first, externals after, in file order, so
//! the pool indices baked into bytecode line up without relocation.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::loader::{self, ModuleData};
use crate::program::{
    Function, ModuleTable, ProgramContext, ARENA_NULL_PAD, DEFAULT_STACK_WORDS,
};
use crate::validator::{self, ValidateError};
use crate::value::Word;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("incoherent module file {path}")]
    IncoherentFile { path: String },
    #[error("unresolved function {signature}")]
    FunctionNotFound { signature: String },
    #[error("unresolved global {signature}")]
    GlobalNotFound { signature: String },
    #[error("duplicate symbol {signature}")]
    DuplicateSymbol { signature: String },
    #[error("entry function {entry} not found")]
    NoMain { entry: String },
    #[error(transparent)]
    Validation(#[from] ValidateError),
}

/// Alignment for a global of the given byte size: natural up to 8.
fn global_align(size: u32) -> usize {
    match size {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

fn align_up(v: usize, align: usize) -> usize {
    (v + align - 1) & !(align - 1)
}

/// Loads and links the module tree rooted at `root`. The entry point is
/// `<root as given>/Main.Main`.
pub fn link(root: &Path) -> Result<ProgramContext, LinkError> {
    let modules = loader::load_tree(root)?;
    link_modules(&modules, &root.to_string_lossy())
}

/// Links already-parsed modules. `root_path` is only used to name the entry.
pub fn link_modules(
    modules: &[ModuleData],
    root_path: &str,
) -> Result<ProgramContext, LinkError> {
    let mut ctx = ProgramContext {
        arena: vec![0; ARENA_NULL_PAD],
        ..ProgramContext::default()
    };
    let mut func_map: HashMap<&str, u32> = HashMap::new();
    let mut glob_map: HashMap<&str, u64> = HashMap::new();

    // Phases 1-5: placement and internal symbol registration.
    for (mi, md) in modules.iter().enumerate() {
        let mut mt = ModuleTable {
            word_base: ctx.words.len() as u32,
            word_count: md.words.len() as u16,
            dword_base: ctx.dwords.len() as u32,
            dword_count: md.dwords.len() as u16,
            ..ModuleTable::default()
        };
        ctx.words.extend_from_slice(&md.words);
        ctx.dwords.extend_from_slice(&md.dwords);

        for s in &md.strings {
            mt.string_pool.push(ctx.arena.len() as u64);
            ctx.arena.extend_from_slice(s.as_bytes());
            ctx.arena.push(0);
        }

        for (sig, &size) in md.internal_globals.iter().zip(&md.global_sizes) {
            let at = align_up(ctx.arena.len(), global_align(size));
            ctx.arena.resize(at + size as usize, 0);
            if glob_map.insert(sig, at as u64).is_some() {
                return Err(LinkError::DuplicateSymbol {
                    signature: sig.clone(),
                });
            }
            mt.global_pool.push(at as u64);
        }

        for (sig, fd) in md.internal_functions.iter().zip(&md.functions) {
            let start = align_up(ctx.code.len(), 8);
            ctx.code.resize(start, 0);
            ctx.code.extend_from_slice(&fd.body);
            let idx = ctx.functions.len() as u32;
            if func_map.insert(sig, idx).is_some() {
                return Err(LinkError::DuplicateSymbol {
                    signature: sig.clone(),
                });
            }
            ctx.functions.push(Function {
                signature: sig.clone(),
                module: mi as u32,
                awc: fd.awc,
                lwc: fd.lwc,
                swc: fd.swc,
                rwc: fd.rwc,
                code_start: start as u32,
                code_len: fd.body.len() as u32,
            });
            mt.function_pool.push(idx);
        }

        ctx.modules.push(mt);
    }

    // Phase 6: append resolved externals to each module's pools.
    for (mi, md) in modules.iter().enumerate() {
        for sig in &md.external_globals {
            let addr = *glob_map
                .get(sig.as_str())
                .ok_or_else(|| LinkError::GlobalNotFound {
                    signature: sig.clone(),
                })?;
            ctx.modules[mi].global_pool.push(addr);
        }
        for sig in &md.external_functions {
            let idx = *func_map
                .get(sig.as_str())
                .ok_or_else(|| LinkError::FunctionNotFound {
                    signature: sig.clone(),
                })?;
            ctx.modules[mi].function_pool.push(idx);
        }
    }

    // Phase 7: entry lookup and the validation gate.
    let entry_sig = format!("{root_path}/Main.Main");
    ctx.entry = *func_map
        .get(entry_sig.as_str())
        .ok_or(LinkError::NoMain { entry: entry_sig })?;

    ctx.heap_base = align_up(ctx.arena.len(), 8);
    ctx.arena.resize(ctx.heap_base, 0);

    validator::validate(&ctx)?;

    ctx.stack = vec![Word::ZERO; DEFAULT_STACK_WORDS];
    Ok(ctx)
}
