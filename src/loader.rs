//! Module-tree loading and binary module parsing.
//!
//! Every regular file under the root directory is one module; subdirectories
//! are visited recursively in sorted name order so links are deterministic.
//! A module file is a run of length-prefixed little-endian sections:
//!
//! ```text
//! u16 wordCount;      Word[wordCount]
//! u16 dwordCount;     DWord[dwordCount]
//! u16 stringCount;    NUL-terminated strings
//! u16 globalSigCount; internal-names '&'0 external-names
//! u16 funcSigCount;   internal-names '&'0 external-names
//! u32 globalSizes[internalGlobalCount]
//! { u32 length; u8 blob[length] } functionDefs[internalFunctionCount]
//! ```
//!
//! Each function blob starts with the 8-byte frame-shape header (AWC, LWC,
//! SWC, RWC as u16) followed by raw bytecode. Every read is bounds-checked;
//! any short or malformed read surfaces as `LinkError::IncoherentFile` for
//! the offending path, and trailing bytes after the last section do too.

use std::fs;
use std::path::Path;

use crate::linker::LinkError;
use crate::value::{DWord, Word};

/// One parsed function definition, not yet placed in the code buffer.
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub awc: u16,
    pub lwc: u16,
    pub swc: u16,
    pub rwc: u16,
    pub body: Vec<u8>,
}

/// One parsed module file, the loader's output and the linker's input.
#[derive(Debug, Default, Clone)]
pub struct ModuleData {
    /// `<root>/<subdirs...>/<file>` as visited; the signature namespace.
    pub path: String,
    pub words: Vec<Word>,
    pub dwords: Vec<DWord>,
    pub strings: Vec<String>,
    /// Fully qualified internal global signatures, pool order.
    pub internal_globals: Vec<String>,
    pub external_globals: Vec<String>,
    /// Byte size of each internal global, same order.
    pub global_sizes: Vec<u32>,
    /// Fully qualified internal function signatures, pool order.
    pub internal_functions: Vec<String>,
    pub external_functions: Vec<String>,
    /// One definition per internal function, same order.
    pub functions: Vec<FunctionData>,
}

/// A bounds violation while decoding a module file.
struct Truncated;

/// Bounds-checked little-endian reader over a module file's bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Truncated> {
        if self.remaining() < n {
            return Err(Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, Truncated> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Truncated> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Truncated> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, Truncated> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Next byte without consuming it.
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// A NUL-terminated UTF-8 string; the terminator is consumed.
    fn cstr(&mut self) -> Result<&'a str, Truncated> {
        let rest = &self.buf[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(Truncated)?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| Truncated)?;
        self.pos += nul + 1;
        Ok(s)
    }
}

/// Reads the combined internal/external signature list: internal names come
/// first and are namespaced under `module_path`, a `'&', 0` sentinel (not
/// counted) switches to externals, and either run may be ended early by
/// exhausting `count`.
fn sig_lists(
    r: &mut Reader<'_>,
    count: u16,
    module_path: &str,
) -> Result<(Vec<String>, Vec<String>), Truncated> {
    let mut internal = Vec::new();
    let mut external = Vec::new();
    let mut read = 0u16;

    while read < count {
        if r.peek() == Some(b'&') {
            r.u8()?;
            if r.u8()? != 0 {
                return Err(Truncated);
            }
            break;
        }
        let name = r.cstr()?;
        internal.push(format!("{module_path}.{name}"));
        read += 1;
    }
    while read < count {
        external.push(r.cstr()?.to_string());
        read += 1;
    }
    Ok((internal, external))
}

fn parse(bytes: &[u8], module_path: &str) -> Result<ModuleData, Truncated> {
    let mut r = Reader::new(bytes);
    let mut md = ModuleData {
        path: module_path.to_string(),
        ..ModuleData::default()
    };

    let word_count = r.u16()?;
    md.words.reserve(word_count as usize);
    for _ in 0..word_count {
        md.words.push(Word(r.u32()?));
    }

    let dword_count = r.u16()?;
    md.dwords.reserve(dword_count as usize);
    for _ in 0..dword_count {
        md.dwords.push(DWord(r.u64()?));
    }

    let string_count = r.u16()?;
    md.strings.reserve(string_count as usize);
    for _ in 0..string_count {
        md.strings.push(r.cstr()?.to_string());
    }

    let global_sig_count = r.u16()?;
    (md.internal_globals, md.external_globals) = sig_lists(&mut r, global_sig_count, module_path)?;

    let func_sig_count = r.u16()?;
    (md.internal_functions, md.external_functions) = sig_lists(&mut r, func_sig_count, module_path)?;

    md.global_sizes.reserve(md.internal_globals.len());
    for _ in 0..md.internal_globals.len() {
        md.global_sizes.push(r.u32()?);
    }

    md.functions.reserve(md.internal_functions.len());
    for _ in 0..md.internal_functions.len() {
        let len = r.u32()? as usize;
        if len < 8 {
            return Err(Truncated);
        }
        let blob = r.take(len)?;
        md.functions.push(FunctionData {
            awc: u16::from_le_bytes([blob[0], blob[1]]),
            lwc: u16::from_le_bytes([blob[2], blob[3]]),
            swc: u16::from_le_bytes([blob[4], blob[5]]),
            rwc: u16::from_le_bytes([blob[6], blob[7]]),
            body: blob[8..].to_vec(),
        });
    }

    if r.remaining() != 0 {
        return Err(Truncated);
    }
    Ok(md)
}

/// Parses one module file's bytes under the given module path.
pub fn parse_module(bytes: &[u8], module_path: &str) -> Result<ModuleData, LinkError> {
    parse(bytes, module_path).map_err(|_| LinkError::IncoherentFile {
        path: module_path.to_string(),
    })
}

/// Loads every module under `root`, recursing into subdirectories.
/// Module paths are `<root as given>/<entry names...>` joined with `/`.
pub fn load_tree(root: &Path) -> Result<Vec<ModuleData>, LinkError> {
    let root_str = root.to_string_lossy().into_owned();
    let mut modules = Vec::new();
    visit(root, &root_str, &mut modules)?;
    Ok(modules)
}

fn visit(dir: &Path, dir_path: &str, out: &mut Vec<ModuleData>) -> Result<(), LinkError> {
    let read = fs::read_dir(dir).map_err(|source| LinkError::Io {
        path: dir_path.to_string(),
        source,
    })?;
    let mut entries: Vec<_> = read
        .collect::<Result<_, _>>()
        .map_err(|source| LinkError::Io {
            path: dir_path.to_string(),
            source,
        })?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let child_path = format!("{}/{}", dir_path, name.to_string_lossy());
        let file_type = entry.file_type().map_err(|source| LinkError::Io {
            path: child_path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            visit(&entry.path(), &child_path, out)?;
        } else if file_type.is_file() {
            let bytes = fs::read(entry.path()).map_err(|source| LinkError::Io {
                path: child_path.clone(),
                source,
            })?;
            out.push(parse_module(&bytes, &child_path)?);
        }
    }
    Ok(())
}
