//! Writes a small demonstration module tree to disk.
//!
//! Three modules: `Main` at the root, `Subdir/Subfile` exporting `PrintInt`
//! and `Print` plus a call counter, and `Subdir/Subfile2` exporting a
//! recursive `RecSum`. Running the tree prints the dword 7, then
//! `RecSum(5) = 15`, and exits with the counter value 2.
//!
//! External signatures embed the root path as given, so the tree must be
//! linked under the same path it was generated under.

use std::fs;
use std::io;
use std::path::Path;

use crate::emit::{Asm, ModuleFile};
use crate::opcode::*;

fn subfile() -> ModuleFile {
    let mut m = ModuleFile::new();
    m.internal_global("Counter", 8);

    // PrintInt(v: dword): Counter += 1, then print v.
    let mut a = Asm::new();
    a.op(OP_PUSH_GLOB_REF).u8(0);
    a.op(OP_PUSH_GLOB_REF).u8(0);
    a.op(OP_LOAD_DWORD);
    a.op(OP_PUSH_D1);
    a.op(OP_ADD_I64);
    a.op(OP_STORE_DWORD);
    a.op(OP_PUSH_DWORD_0);
    a.op(OP_SYSCALL).u8(SYS_PRINTI);
    a.op(OP_RET);
    m.function("PrintInt", 2, 2, 6, 0, a.finish());

    // Print(s: ref): write the string as is.
    m.function(
        "Print",
        2,
        2,
        2,
        0,
        vec![OP_PUSH_DWORD_0, OP_SYSCALL, SYS_PRINT, OP_RET],
    );
    m
}

fn subfile2() -> ModuleFile {
    // RecSum(n) = n <= 0 ? 0 : n + RecSum(n - 1)
    let mut a = Asm::new();
    let recurse = a.label();
    a.op(OP_PUSH_WORD_0);
    a.op(OP_PUSH_W0);
    a.op(OP_CMP_I32_GT);
    a.branch(OP_JMP_IF, recurse);
    a.op(OP_PUSH_W0);
    a.op(OP_RET);
    a.bind(recurse);
    a.op(OP_PUSH_WORD_0);
    a.op(OP_PUSH_WORD_0);
    a.op(OP_PUSH_I8_W).i8(1);
    a.op(OP_SUB_I32);
    a.op(OP_CALL).u16(0);
    a.op(OP_ADD_I32);
    a.op(OP_RET);

    let mut m = ModuleFile::new();
    m.function("RecSum", 1, 1, 3, 1, a.finish());
    m
}

fn main_module(root_str: &str) -> ModuleFile {
    let mut m = ModuleFile::new();
    m.string("RecSum(5) = ");
    // printi writes no newline, so the line break is a string constant.
    m.string("\n");
    m.external_global(&format!("{root_str}/Subdir/Subfile.Counter"));
    m.external_function(&format!("{root_str}/Subdir/Subfile.PrintInt"));
    m.external_function(&format!("{root_str}/Subdir/Subfile.Print"));
    m.external_function(&format!("{root_str}/Subdir/Subfile2.RecSum"));

    // Function pool: Main itself lands at 0, externals follow.
    let (print_int, print, rec_sum) = (1u16, 2u16, 3u16);
    let mut a = Asm::new();
    a.op(OP_PUSH_I8_D).i8(7);
    a.op(OP_CALL).u16(print_int);
    a.op(OP_PUSH_CONST_STR).u8(1);
    a.op(OP_CALL).u16(print);
    a.op(OP_PUSH_CONST_STR).u8(0);
    a.op(OP_CALL).u16(print);
    a.op(OP_PUSH_I8_W).i8(5);
    a.op(OP_CALL).u16(rec_sum);
    a.op(OP_I32_TO_I64);
    a.op(OP_CALL).u16(print_int);
    a.op(OP_PUSH_CONST_STR).u8(1);
    a.op(OP_CALL).u16(print);
    // Exit with the number of PrintInt calls.
    a.op(OP_PUSH_GLOB_REF).u8(0);
    a.op(OP_LOAD_DWORD);
    a.op(OP_I64_TO_I32);
    a.op(OP_SYSCALL).u8(SYS_EXIT);
    m.function("Main", 0, 0, 2, 0, a.finish());
    m
}

/// Writes the sample tree under `root`, creating directories as needed.
pub fn write_sample(root: &Path) -> io::Result<()> {
    let root_str = root.to_string_lossy();
    fs::create_dir_all(root.join("Subdir"))?;
    fs::write(root.join("Main"), main_module(&root_str).encode())?;
    fs::write(root.join("Subdir").join("Subfile"), subfile().encode())?;
    fs::write(root.join("Subdir").join("Subfile2"), subfile2().encode())?;
    Ok(())
}
