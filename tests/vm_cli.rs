use std::path::Path;
use std::process::Command;

use ravel::emit::{Asm, ModuleFile};
use ravel::opcode::*;
use ravel::value::DWord;

fn ravel() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ravel"))
}

fn write_module(path: &Path, m: &ModuleFile) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, m.encode()).unwrap();
}

// --- Sample project ---

#[test]
fn sample_project_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("sample_project");
    let out = ravel()
        .arg("--write-sample")
        .arg(&root)
        .output()
        .expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(2), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, ["7", "RecSum(5) = 15", "Program exited with code 2"]);
}

// --- Cross-module globals ---

#[test]
fn external_call_mutates_a_counter_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let root_str = root.to_string_lossy().into_owned();

    // Lib.Bump: Counter += 1, print Counter.
    let mut lib = ModuleFile::new();
    lib.internal_global("Counter", 8);
    let mut a = Asm::new();
    a.op(OP_PUSH_GLOB_REF).u8(0);
    a.op(OP_PUSH_GLOB_REF).u8(0);
    a.op(OP_LOAD_DWORD);
    a.op(OP_PUSH_D1);
    a.op(OP_ADD_I64);
    a.op(OP_STORE_DWORD);
    a.op(OP_PUSH_GLOB_REF).u8(0);
    a.op(OP_LOAD_DWORD);
    a.op(OP_SYSCALL).u8(SYS_PRINTI);
    a.op(OP_RET);
    lib.function("Bump", 0, 0, 6, 0, a.finish());

    let mut main = ModuleFile::new();
    main.external_function(&format!("{root_str}/Lib.Bump"));
    main.function(
        "Main",
        0,
        0,
        1,
        0,
        vec![OP_CALL, 1, 0, OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
    );
    write_module(&root.join("Lib"), &lib);
    write_module(&root.join("Main"), &main);

    let out = ravel().arg(&root).output().expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    // printi writes the counter with no newline of its own.
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout, "1Program exited with code 0\n");
}

// --- Print syscalls ---

#[test]
fn print_syscalls_write_no_trailing_newline() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");

    let mut m = ModuleFile::new();
    let half = m.dword(DWord::from_f64(1.5));
    let mut a = Asm::new();
    a.op(OP_PUSH_I8_D).i8(7);
    a.op(OP_SYSCALL).u8(SYS_PRINTI);
    a.op(OP_PUSH_I8_D).i8(7);
    a.op(OP_SYSCALL).u8(SYS_PRINTI);
    a.op(OP_PUSH_CONST_DWORD).u8(half as u8);
    a.op(OP_SYSCALL).u8(SYS_PRINTF);
    a.op(OP_PUSH_W0);
    a.op(OP_SYSCALL).u8(SYS_EXIT);
    m.function("Main", 0, 0, 2, 0, a.finish());
    write_module(&root.join("Main"), &m);

    let out = ravel().arg(&root).output().expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    // Integers concatenate; floats print with fixed six decimals.
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout, "771.500000Program exited with code 0\n");
}

// --- Timing ---

#[test]
fn timing_flag_reports_elapsed_micros() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let mut m = ModuleFile::new();
    m.function(
        "Main",
        0,
        0,
        1,
        0,
        vec![OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
    );
    write_module(&root.join("Main"), &m);

    let out = ravel()
        .arg(&root)
        .arg("--time")
        .output()
        .expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "stdout: {stdout}");
    assert!(
        lines[0].starts_with("Time elapsed : ") && lines[0].ends_with(" us"),
        "stdout: {stdout}"
    );
    assert_eq!(lines[1], "Program exited with code 0");
}

// --- Recursion ---

#[test]
fn recursive_sum_exits_with_fifteen() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let root_str = root.to_string_lossy().into_owned();

    let mut math = ModuleFile::new();
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
    math.function("RecSum", 1, 1, 3, 1, a.finish());

    let mut main = ModuleFile::new();
    main.external_function(&format!("{root_str}/Math.RecSum"));
    main.function(
        "Main",
        0,
        0,
        1,
        0,
        vec![OP_PUSH_I8_W, 5, OP_CALL, 1, 0, OP_SYSCALL, SYS_EXIT],
    );
    write_module(&root.join("Math"), &math);
    write_module(&root.join("Main"), &main);

    let out = ravel().arg(&root).output().expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(15), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout.trim(), "Program exited with code 15");
}

// --- Link failures ---

#[test]
fn truncated_module_file_fails_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let mut main = ModuleFile::new();
    main.string("a long string constant to cut through");
    main.function(
        "Main",
        0,
        0,
        1,
        0,
        vec![OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
    );
    let bytes = main.encode();
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("Main"), &bytes[..bytes.len() / 2]).unwrap();

    let out = ravel().arg(&root).output().expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("incoherent"), "stderr: {stderr}");
    assert!(String::from_utf8_lossy(&out.stdout).is_empty());
}

#[test]
fn missing_entry_point_fails_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let mut m = ModuleFile::new();
    m.function(
        "NotMain",
        0,
        0,
        1,
        0,
        vec![OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
    );
    write_module(&root.join("Main"), &m);

    let out = ravel().arg(&root).output().expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn validation_failure_aborts_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let mut m = ModuleFile::new();
    // Pushes two words against a declared SWC of 1.
    m.function(
        "Main",
        0,
        0,
        1,
        0,
        vec![OP_PUSH_W0, OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
    );
    write_module(&root.join("Main"), &m);

    let out = ravel().arg(&root).output().expect("failed to run ravel");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("stack depth"), "stderr: {stderr}");
    assert!(String::from_utf8_lossy(&out.stdout).is_empty());
}
