//! Bytecode execution.
//!
//! [`execute`] runs a linked program from its entry function until a
//! `syscall exit`, a return from the entry frame, or a fatal trap. Call
//! frames live directly on the value stack: a four-word header (return pc,
//! return frame pointer, return module, packed AWC/RWC) sits at the frame
//! base, the LWC local slots follow, and the operand stack grows above
//! them. The validator has already proven every operand stack stays inside
//! its declared SWC band, so the dispatch loop indexes the stack without
//! per-instruction checks; only the frame-granular overflow check at call
//! time remains.
//!
//! Arithmetic policy: integer opcodes use two's-complement wraparound,
//! integer division or remainder by zero traps, float opcodes follow IEEE
//! 754, and float-to-int casts saturate. Raw memory references are byte
//! addresses into the data arena and are bounds-checked; a bad address is a
//! trap, not undefined behavior.

use std::io::{self, BufRead, Write as _};
use std::time::Instant;

use thiserror::Error;

use crate::opcode::*;
use crate::program::{Function, ModuleTable, ProgramContext, ARENA_NULL_PAD};
use crate::value::{DWord, Word};

/// Words in a frame header: return pc, return fp, return module, AWC/RWC.
pub const FRAME_WORDS: usize = 4;

/// Return pc marking the entry frame; returning through it ends execution.
const RET_SENTINEL: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("unknown opcode {opcode:#04x} at pc {pc:#x}")]
    UnknownOpcode { opcode: u8, pc: u32 },
    #[error("unknown syscall {sys:#04x} at pc {pc:#x}")]
    UnknownSyscall { sys: u8, pc: u32 },
    #[error("stack overflow calling {signature}")]
    StackOverflow { signature: String },
    #[error("entry function {signature} expects arguments")]
    MissingArguments { signature: String },
    #[error("bad memory address {addr:#x}")]
    BadAddress { addr: u64 },
    #[error("bad function value {index}")]
    BadFunction { index: u64 },
    #[error("free of {addr:#x}, which no alloc returned")]
    BadFree { addr: u64 },
    #[error("division by zero at pc {pc:#x}")]
    DivisionByZero { pc: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Runs the program to completion and returns its exit code.
pub fn execute(ctx: &mut ProgramContext) -> Result<i32, VmError> {
    let ProgramContext {
        words,
        dwords,
        code,
        arena,
        heap_base,
        modules,
        functions,
        entry,
        stack,
    } = ctx;
    let mut vm = Vm {
        code: code.as_slice(),
        words: words.as_slice(),
        dwords: dwords.as_slice(),
        modules: modules.as_slice(),
        functions: functions.as_slice(),
        arena,
        heap_base: *heap_base,
        stack,
        free: Vec::new(),
        pc: RET_SENTINEL as usize,
        fp: 0,
        sp: 0,
        module: 0,
        started: Instant::now(),
    };
    vm.enter(*entry)?;
    vm.run()
}

struct Vm<'a> {
    code: &'a [u8],
    words: &'a [Word],
    dwords: &'a [DWord],
    modules: &'a [ModuleTable],
    functions: &'a [Function],
    arena: &'a mut Vec<u8>,
    heap_base: usize,
    stack: &'a mut Vec<Word>,
    /// Freed heap blocks as (header address, capacity), first fit.
    free: Vec<(usize, usize)>,
    pc: usize,
    fp: usize,
    sp: usize,
    module: usize,
    started: Instant,
}

fn pack_counts(awc: u16, rwc: u16) -> Word {
    Word::from_u32(awc as u32 | ((rwc as u32) << 16))
}

impl Vm<'_> {
    // ── Stack and locals ────────────────────────────────────────────

    #[inline]
    fn push_w(&mut self, w: Word) {
        self.stack[self.sp] = w;
        self.sp += 1;
    }

    #[inline]
    fn pop_w(&mut self) -> Word {
        self.sp -= 1;
        self.stack[self.sp]
    }

    #[inline]
    fn push_d(&mut self, d: DWord) {
        self.push_w(d.lo());
        self.push_w(d.hi());
    }

    #[inline]
    fn pop_d(&mut self) -> DWord {
        let hi = self.pop_w();
        let lo = self.pop_w();
        DWord::from_words(lo, hi)
    }

    #[inline]
    fn local(&self, i: usize) -> Word {
        self.stack[self.fp + FRAME_WORDS + i]
    }

    #[inline]
    fn set_local(&mut self, i: usize, w: Word) {
        self.stack[self.fp + FRAME_WORDS + i] = w;
    }

    #[inline]
    fn local_d(&self, i: usize) -> DWord {
        DWord::from_words(self.local(i), self.local(i + 1))
    }

    #[inline]
    fn set_local_d(&mut self, i: usize, d: DWord) {
        self.set_local(i, d.lo());
        self.set_local(i + 1, d.hi());
    }

    // ── Operand decoding ────────────────────────────────────────────

    #[inline]
    fn op_u8(&mut self) -> u8 {
        let v = self.code[self.pc];
        self.pc += 1;
        v
    }

    #[inline]
    fn op_i8(&mut self) -> i8 {
        self.op_u8() as i8
    }

    #[inline]
    fn op_u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.code[self.pc], self.code[self.pc + 1]]);
        self.pc += 2;
        v
    }

    #[inline]
    fn op_i16(&mut self) -> i16 {
        self.op_u16() as i16
    }

    #[inline]
    fn cur(&self) -> &ModuleTable {
        &self.modules[self.module]
    }

    // ── Arena access ────────────────────────────────────────────────

    fn mem(&self, addr: u64, len: usize) -> Result<&[u8], VmError> {
        let a = addr as usize;
        if addr < ARENA_NULL_PAD as u64
            || a.checked_add(len).map_or(true, |end| end > self.arena.len())
        {
            return Err(VmError::BadAddress { addr });
        }
        Ok(&self.arena[a..a + len])
    }

    fn mem_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], VmError> {
        let a = addr as usize;
        if addr < ARENA_NULL_PAD as u64
            || a.checked_add(len).map_or(true, |end| end > self.arena.len())
        {
            return Err(VmError::BadAddress { addr });
        }
        Ok(&mut self.arena[a..a + len])
    }

    fn load_u8(&self, addr: u64) -> Result<u8, VmError> {
        Ok(self.mem(addr, 1)?[0])
    }

    fn load_u16(&self, addr: u64) -> Result<u16, VmError> {
        let b = self.mem(addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn load_u32(&self, addr: u64) -> Result<u32, VmError> {
        let b = self.mem(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn load_u64(&self, addr: u64) -> Result<u64, VmError> {
        let b = self.mem(addr, 8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn store_u8(&mut self, addr: u64, v: u8) -> Result<(), VmError> {
        self.mem_mut(addr, 1)?[0] = v;
        Ok(())
    }

    fn store_u16(&mut self, addr: u64, v: u16) -> Result<(), VmError> {
        self.mem_mut(addr, 2)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn store_u32(&mut self, addr: u64, v: u32) -> Result<(), VmError> {
        self.mem_mut(addr, 4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn store_u64(&mut self, addr: u64, v: u64) -> Result<(), VmError> {
        self.mem_mut(addr, 8)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// The NUL-terminated string at `addr`, without the terminator.
    fn arena_cstr(&self, addr: u64) -> Result<&[u8], VmError> {
        let a = addr as usize;
        if addr < ARENA_NULL_PAD as u64 || a >= self.arena.len() {
            return Err(VmError::BadAddress { addr });
        }
        let rest = &self.arena[a..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(VmError::BadAddress { addr })?;
        Ok(&rest[..nul])
    }

    // ── Heap ────────────────────────────────────────────────────────

    /// First-fit over freed blocks, growing the arena when none fits.
    /// Blocks carry an 8-byte capacity header just below the returned
    /// address. Contents are not zeroed on reuse.
    fn alloc(&mut self, size: u32) -> u64 {
        let need = ((size as usize).max(1) + 7) & !7;
        if let Some(i) = self.free.iter().position(|&(_, cap)| cap >= need) {
            let (hdr, _) = self.free.swap_remove(i);
            return (hdr + 8) as u64;
        }
        let hdr = self.arena.len();
        self.arena.extend_from_slice(&(need as u64).to_le_bytes());
        self.arena.resize(hdr + 8 + need, 0);
        (hdr + 8) as u64
    }

    fn free_block(&mut self, addr: u64) -> Result<(), VmError> {
        let a = addr as usize;
        if a < self.heap_base + 8 || a > self.arena.len() {
            return Err(VmError::BadFree { addr });
        }
        let cap = self.load_u64(addr - 8)? as usize;
        if a.checked_add(cap).map_or(true, |end| end > self.arena.len()) {
            return Err(VmError::BadFree { addr });
        }
        self.free.push((a - 8, cap));
        Ok(())
    }

    // ── Frames ──────────────────────────────────────────────────────

    /// Pushes a frame for `fi` and transfers control to it. The top AWC
    /// words of the caller's operand stack become the first locals.
    fn enter(&mut self, fi: u32) -> Result<(), VmError> {
        let funcs = self.functions;
        let f = &funcs[fi as usize];
        let awc = f.awc as usize;
        let lwc = f.lwc as usize;
        let fb = self.sp;
        if fb < awc {
            return Err(VmError::MissingArguments {
                signature: f.signature.clone(),
            });
        }
        if fb + FRAME_WORDS + lwc + f.swc as usize > self.stack.len() {
            return Err(VmError::StackOverflow {
                signature: f.signature.clone(),
            });
        }
        self.stack.copy_within(fb - awc..fb, fb + FRAME_WORDS);
        self.stack[fb] = Word::from_u32(self.pc as u32);
        self.stack[fb + 1] = Word::from_u32(self.fp as u32);
        self.stack[fb + 2] = Word::from_u32(self.module as u32);
        self.stack[fb + 3] = pack_counts(f.awc, f.rwc);
        self.fp = fb;
        self.sp = fb + FRAME_WORDS + lwc;
        self.module = f.module as usize;
        self.pc = f.code_start as usize;
        Ok(())
    }

    /// Pops the current frame. The RWC return words land where the
    /// arguments began. `Some(code)` means the entry frame returned.
    fn leave(&mut self) -> Option<i32> {
        let fb = self.fp;
        let ret_pc = self.stack[fb].u32();
        let ret_fp = self.stack[fb + 1].u32() as usize;
        let ret_module = self.stack[fb + 2].u32() as usize;
        let packed = self.stack[fb + 3].u32();
        let awc = (packed & 0xFFFF) as usize;
        let rwc = (packed >> 16) as usize;

        self.stack.copy_within(self.sp - rwc..self.sp, fb - awc);
        self.sp = fb - awc + rwc;
        if ret_pc == RET_SENTINEL {
            return Some(0);
        }
        self.pc = ret_pc as usize;
        self.fp = ret_fp;
        self.module = ret_module;
        None
    }

    // ── Host I/O ────────────────────────────────────────────────────

    fn read_line(&self) -> Result<String, VmError> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }

    fn syscall(&mut self, sys: u8, at: usize) -> Result<Option<i32>, VmError> {
        match sys {
            SYS_EXIT => {
                let code = self.pop_w().i32();
                return Ok(Some(code));
            }
            SYS_PRINT => {
                let addr = self.pop_d().addr();
                let mut out = io::stdout().lock();
                out.write_all(self.arena_cstr(addr)?)?;
                out.flush()?;
            }
            SYS_PRINTI => {
                // No trailing newline; programs print one explicitly.
                let v = self.pop_d().i64();
                let mut out = io::stdout().lock();
                write!(out, "{v}")?;
                out.flush()?;
            }
            SYS_PRINTF => {
                // Fixed six decimals, no trailing newline.
                let v = self.pop_d().f64();
                let mut out = io::stdout().lock();
                write!(out, "{v:.6}")?;
                out.flush()?;
            }
            SYS_SCAN => {
                let max = self.pop_w().u32() as usize;
                let addr = self.pop_d().addr();
                let line = self.read_line()?;
                let trimmed = line.trim_end_matches(['\n', '\r']).as_bytes();
                let n = trimmed.len().min(max.saturating_sub(1));
                let dst = self.mem_mut(addr, n + 1)?;
                dst[..n].copy_from_slice(&trimmed[..n]);
                dst[n] = 0;
            }
            SYS_SCANI => {
                let v = self.read_line()?.trim().parse::<i64>().unwrap_or(0);
                self.push_d(DWord::from_i64(v));
            }
            SYS_SCANF => {
                let v = self.read_line()?.trim().parse::<f64>().unwrap_or(0.0);
                self.push_d(DWord::from_f64(v));
            }
            SYS_MEMMOV | SYS_MEMCPY => {
                let n = self.pop_w().u32() as usize;
                let src = self.pop_d().addr();
                let dst = self.pop_d().addr();
                self.mem(src, n)?;
                self.mem(dst, n)?;
                self.arena
                    .copy_within(src as usize..src as usize + n, dst as usize);
            }
            SYS_CLOCK => {
                let us = self.started.elapsed().as_micros() as u64;
                self.push_d(DWord::from_u64(us));
            }
            SYS_SQRT32 => {
                let v = self.pop_w().f32();
                self.push_w(Word::from_f32(v.sqrt()));
            }
            SYS_SQRT64 => {
                let v = self.pop_d().f64();
                self.push_d(DWord::from_f64(v.sqrt()));
            }
            SYS_EXP32 => {
                let v = self.pop_w().f32();
                self.push_w(Word::from_f32(v.exp()));
            }
            SYS_EXP64 => {
                let v = self.pop_d().f64();
                self.push_d(DWord::from_f64(v.exp()));
            }
            SYS_LOG32 => {
                let v = self.pop_w().f32();
                self.push_w(Word::from_f32(v.ln()));
            }
            SYS_LOG64 => {
                let v = self.pop_d().f64();
                self.push_d(DWord::from_f64(v.ln()));
            }
            _ => {
                return Err(VmError::UnknownSyscall {
                    sys,
                    pc: at as u32,
                });
            }
        }
        Ok(None)
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn run(&mut self) -> Result<i32, VmError> {
        macro_rules! binw {
            ($get:ident, $mk:path, $f:expr) => {{
                let b = self.pop_w().$get();
                let a = self.pop_w().$get();
                self.push_w($mk($f(a, b)));
            }};
        }
        macro_rules! bind {
            ($get:ident, $mk:path, $f:expr) => {{
                let b = self.pop_d().$get();
                let a = self.pop_d().$get();
                self.push_d($mk($f(a, b)));
            }};
        }
        macro_rules! divw {
            ($get:ident, $mk:path, $f:expr, $at:expr) => {{
                let b = self.pop_w().$get();
                let a = self.pop_w().$get();
                if b == 0 {
                    return Err(VmError::DivisionByZero { pc: $at as u32 });
                }
                self.push_w($mk($f(a, b)));
            }};
        }
        macro_rules! divd {
            ($get:ident, $mk:path, $f:expr, $at:expr) => {{
                let b = self.pop_d().$get();
                let a = self.pop_d().$get();
                if b == 0 {
                    return Err(VmError::DivisionByZero { pc: $at as u32 });
                }
                self.push_d($mk($f(a, b)));
            }};
        }
        macro_rules! cmpw {
            ($get:ident, $f:expr) => {{
                let b = self.pop_w().$get();
                let a = self.pop_w().$get();
                self.push_w(Word::from_u32($f(a, b) as u32));
            }};
        }
        macro_rules! cmpd {
            ($get:ident, $f:expr) => {{
                let b = self.pop_d().$get();
                let a = self.pop_d().$get();
                self.push_d(DWord::from_u64($f(a, b) as u64));
            }};
        }
        macro_rules! unw {
            ($get:ident, $mk:path, $f:expr) => {{
                let v = self.pop_w().$get();
                self.push_w($mk($f(v)));
            }};
        }
        macro_rules! und {
            ($get:ident, $mk:path, $f:expr) => {{
                let v = self.pop_d().$get();
                self.push_d($mk($f(v)));
            }};
        }

        loop {
            let at = self.pc;
            let op = self.op_u8();
            match op {
                // ── Local pushes ────────────────────────────────────
                OP_PUSH_BYTE_0..=OP_PUSH_BYTE_3 => {
                    let lane = (op - OP_PUSH_BYTE_0) as usize;
                    let l = self.op_u8() as usize;
                    let v = self.local(l).byte(lane);
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_PUSH_HWORD_0 | OP_PUSH_HWORD_1 => {
                    let lane = (op - OP_PUSH_HWORD_0) as usize;
                    let l = self.op_u8() as usize;
                    let v = self.local(l).hword(lane);
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_PUSH_WORD => {
                    let l = self.op_u8() as usize;
                    let w = self.local(l);
                    self.push_w(w);
                }
                OP_PUSH_WORD_0..=OP_PUSH_WORD_3 => {
                    let w = self.local((op - OP_PUSH_WORD_0) as usize);
                    self.push_w(w);
                }
                OP_PUSH_DWORD => {
                    let l = self.op_u8() as usize;
                    let d = self.local_d(l);
                    self.push_d(d);
                }
                OP_PUSH_DWORD_0..=OP_PUSH_DWORD_3 => {
                    let d = self.local_d((op - OP_PUSH_DWORD_0) as usize);
                    self.push_d(d);
                }
                OP_PUSH_WORDS => {
                    let l = self.op_u8() as usize;
                    let n = self.op_u8() as usize + 1;
                    for j in 0..n {
                        let w = self.local(l + j);
                        self.push_w(w);
                    }
                }

                // ── Immediate pushes ────────────────────────────────
                OP_PUSH_W0..=OP_PUSH_W2 => {
                    self.push_w(Word::from_u32((op - OP_PUSH_W0) as u32));
                }
                OP_PUSH_D0..=OP_PUSH_D2 => {
                    self.push_d(DWord::from_u64((op - OP_PUSH_D0) as u64));
                }
                OP_PUSH_F32_1 | OP_PUSH_F32_2 => {
                    self.push_w(Word::from_f32((op - OP_PUSH_F32_1) as f32 + 1.0));
                }
                OP_PUSH_F64_1 | OP_PUSH_F64_2 => {
                    self.push_d(DWord::from_f64((op - OP_PUSH_F64_1) as f64 + 1.0));
                }
                OP_PUSH_I8_W => {
                    let v = self.op_i8() as i32;
                    self.push_w(Word::from_i32(v));
                }
                OP_PUSH_I8_D => {
                    let v = self.op_i8() as i64;
                    self.push_d(DWord::from_i64(v));
                }

                // ── Pool constant pushes ────────────────────────────
                OP_PUSH_CONST_WORD | OP_PUSH_CONST_WORD_W => {
                    let idx = if op == OP_PUSH_CONST_WORD {
                        self.op_u8() as usize
                    } else {
                        self.op_u16() as usize
                    };
                    let w = self.words[self.cur().word_base as usize + idx];
                    self.push_w(w);
                }
                OP_PUSH_CONST_DWORD | OP_PUSH_CONST_DWORD_W => {
                    let idx = if op == OP_PUSH_CONST_DWORD {
                        self.op_u8() as usize
                    } else {
                        self.op_u16() as usize
                    };
                    let d = self.dwords[self.cur().dword_base as usize + idx];
                    self.push_d(d);
                }
                OP_PUSH_CONST_STR | OP_PUSH_CONST_STR_W => {
                    let idx = if op == OP_PUSH_CONST_STR {
                        self.op_u8() as usize
                    } else {
                        self.op_u16() as usize
                    };
                    let addr = self.cur().string_pool[idx];
                    self.push_d(DWord::from_addr(addr));
                }
                OP_PUSH_GLOB_REF | OP_PUSH_GLOB_REF_W => {
                    let idx = if op == OP_PUSH_GLOB_REF {
                        self.op_u8() as usize
                    } else {
                        self.op_u16() as usize
                    };
                    let addr = self.cur().global_pool[idx];
                    self.push_d(DWord::from_addr(addr));
                }
                OP_PUSH_FUNC => {
                    let idx = self.op_u16() as usize;
                    let fi = self.cur().function_pool[idx];
                    self.push_d(DWord::from_u64(fi as u64));
                }

                // ── Local pops ──────────────────────────────────────
                OP_POP_BYTE_0..=OP_POP_BYTE_3 => {
                    let lane = (op - OP_POP_BYTE_0) as usize;
                    let l = self.op_u8() as usize;
                    let v = self.pop_w().byte(0);
                    let w = self.local(l).set_byte(lane, v);
                    self.set_local(l, w);
                }
                OP_POP_HWORD_0 | OP_POP_HWORD_1 => {
                    let lane = (op - OP_POP_HWORD_0) as usize;
                    let l = self.op_u8() as usize;
                    let v = self.pop_w().hword(0);
                    let w = self.local(l).set_hword(lane, v);
                    self.set_local(l, w);
                }
                OP_POP_WORD => {
                    let l = self.op_u8() as usize;
                    let w = self.pop_w();
                    self.set_local(l, w);
                }
                OP_POP_WORD_0..=OP_POP_WORD_3 => {
                    let w = self.pop_w();
                    self.set_local((op - OP_POP_WORD_0) as usize, w);
                }
                OP_POP_DWORD => {
                    let l = self.op_u8() as usize;
                    let d = self.pop_d();
                    self.set_local_d(l, d);
                }
                OP_POP_DWORD_0..=OP_POP_DWORD_3 => {
                    let d = self.pop_d();
                    self.set_local_d((op - OP_POP_DWORD_0) as usize, d);
                }
                OP_POP_WORDS => {
                    let l = self.op_u8() as usize;
                    let n = self.op_u8() as usize + 1;
                    self.sp -= n;
                    for j in 0..n {
                        let w = self.stack[self.sp + j];
                        self.set_local(l + j, w);
                    }
                }

                // ── Arithmetic ──────────────────────────────────────
                OP_ADD_I32 => binw!(i32, Word::from_i32, i32::wrapping_add),
                OP_ADD_I64 => bind!(i64, DWord::from_i64, i64::wrapping_add),
                OP_ADD_F32 => binw!(f32, Word::from_f32, |a, b| a + b),
                OP_ADD_F64 => bind!(f64, DWord::from_f64, |a, b| a + b),
                OP_SUB_I32 => binw!(i32, Word::from_i32, i32::wrapping_sub),
                OP_SUB_I64 => bind!(i64, DWord::from_i64, i64::wrapping_sub),
                OP_SUB_F32 => binw!(f32, Word::from_f32, |a, b| a - b),
                OP_SUB_F64 => bind!(f64, DWord::from_f64, |a, b| a - b),
                OP_INC_I32 | OP_DEC_I32 => {
                    let l = self.op_u8() as usize;
                    let n = self.op_u8() as i32;
                    let n = if op == OP_DEC_I32 { -n } else { n };
                    let v = self.local(l).i32().wrapping_add(n);
                    self.set_local(l, Word::from_i32(v));
                }
                OP_INC_I64 | OP_DEC_I64 => {
                    let l = self.op_u8() as usize;
                    let n = self.op_u8() as i64;
                    let n = if op == OP_DEC_I64 { -n } else { n };
                    let v = self.local_d(l).i64().wrapping_add(n);
                    self.set_local_d(l, DWord::from_i64(v));
                }
                OP_INC_F32 | OP_DEC_F32 => {
                    let l = self.op_u8() as usize;
                    let n = self.op_u8() as f32;
                    let n = if op == OP_DEC_F32 { -n } else { n };
                    let v = self.local(l).f32() + n;
                    self.set_local(l, Word::from_f32(v));
                }
                OP_INC_F64 | OP_DEC_F64 => {
                    let l = self.op_u8() as usize;
                    let n = self.op_u8() as f64;
                    let n = if op == OP_DEC_F64 { -n } else { n };
                    let v = self.local_d(l).f64() + n;
                    self.set_local_d(l, DWord::from_f64(v));
                }
                OP_MUL_I32 => binw!(i32, Word::from_i32, i32::wrapping_mul),
                OP_MUL_I64 => bind!(i64, DWord::from_i64, i64::wrapping_mul),
                OP_MUL_U32 => binw!(u32, Word::from_u32, u32::wrapping_mul),
                OP_MUL_U64 => bind!(u64, DWord::from_u64, u64::wrapping_mul),
                OP_MUL_F32 => binw!(f32, Word::from_f32, |a, b| a * b),
                OP_MUL_F64 => bind!(f64, DWord::from_f64, |a, b| a * b),
                OP_DIV_I32 => divw!(i32, Word::from_i32, i32::wrapping_div, at),
                OP_DIV_I64 => divd!(i64, DWord::from_i64, i64::wrapping_div, at),
                OP_DIV_U32 => divw!(u32, Word::from_u32, |a, b| a / b, at),
                OP_DIV_U64 => divd!(u64, DWord::from_u64, |a, b| a / b, at),
                OP_DIV_F32 => binw!(f32, Word::from_f32, |a, b| a / b),
                OP_DIV_F64 => bind!(f64, DWord::from_f64, |a, b| a / b),
                OP_REM_I32 => divw!(i32, Word::from_i32, i32::wrapping_rem, at),
                OP_REM_I64 => divd!(i64, DWord::from_i64, i64::wrapping_rem, at),
                OP_REM_U32 => divw!(u32, Word::from_u32, |a, b| a % b, at),
                OP_REM_U64 => divd!(u64, DWord::from_u64, |a, b| a % b, at),
                OP_NEG_I32 => unw!(i32, Word::from_i32, i32::wrapping_neg),
                OP_NEG_I64 => und!(i64, DWord::from_i64, i64::wrapping_neg),
                OP_NEG_F32 => unw!(f32, Word::from_f32, |v: f32| -v),
                OP_NEG_F64 => und!(f64, DWord::from_f64, |v: f64| -v),

                // ── Bitwise ─────────────────────────────────────────
                OP_NOT_WORD => unw!(u32, Word::from_u32, |v: u32| !v),
                OP_NOT_DWORD => und!(u64, DWord::from_u64, |v: u64| !v),
                OP_AND_WORD => binw!(u32, Word::from_u32, |a, b| a & b),
                OP_AND_DWORD => bind!(u64, DWord::from_u64, |a, b| a & b),
                OP_OR_WORD => binw!(u32, Word::from_u32, |a, b| a | b),
                OP_OR_DWORD => bind!(u64, DWord::from_u64, |a, b| a | b),
                OP_XOR_WORD => binw!(u32, Word::from_u32, |a, b| a ^ b),
                OP_XOR_DWORD => bind!(u64, DWord::from_u64, |a, b| a ^ b),
                OP_SHL_WORD => binw!(u32, Word::from_u32, |a: u32, b| a.wrapping_shl(b)),
                OP_SHL_DWORD => bind!(u64, DWord::from_u64, |a: u64, b| a.wrapping_shl(b as u32)),
                OP_SHR_I32 => binw!(i32, Word::from_i32, |a: i32, b| a.wrapping_shr(b as u32)),
                OP_SHR_I64 => bind!(i64, DWord::from_i64, |a: i64, b| a.wrapping_shr(b as u32)),
                OP_SHR_U32 => binw!(u32, Word::from_u32, |a: u32, b| a.wrapping_shr(b)),
                OP_SHR_U64 => bind!(u64, DWord::from_u64, |a: u64, b| a.wrapping_shr(b as u32)),

                // ── Casts ───────────────────────────────────────────
                OP_I32_TO_I8 => unw!(i32, Word::from_i32, |v: i32| v as i8 as i32),
                OP_I32_TO_I16 => unw!(i32, Word::from_i32, |v: i32| v as i16 as i32),
                OP_I32_TO_I64 => {
                    let v = self.pop_w().i32();
                    self.push_d(DWord::from_i64(v as i64));
                }
                OP_I32_TO_F32 => unw!(i32, Word::from_f32, |v: i32| v as f32),
                OP_I32_TO_F64 => {
                    let v = self.pop_w().i32();
                    self.push_d(DWord::from_f64(v as f64));
                }
                OP_I64_TO_I32 => {
                    let v = self.pop_d().i64();
                    self.push_w(Word::from_i32(v as i32));
                }
                OP_I64_TO_F32 => {
                    let v = self.pop_d().i64();
                    self.push_w(Word::from_f32(v as f32));
                }
                OP_I64_TO_F64 => und!(i64, DWord::from_f64, |v: i64| v as f64),
                OP_F32_TO_I32 => unw!(f32, Word::from_i32, |v: f32| v as i32),
                OP_F32_TO_I64 => {
                    let v = self.pop_w().f32();
                    self.push_d(DWord::from_i64(v as i64));
                }
                OP_F32_TO_F64 => {
                    let v = self.pop_w().f32();
                    self.push_d(DWord::from_f64(v as f64));
                }
                OP_F64_TO_I32 => {
                    let v = self.pop_d().f64();
                    self.push_w(Word::from_i32(v as i32));
                }
                OP_F64_TO_I64 => und!(f64, DWord::from_i64, |v: f64| v as i64),
                OP_F64_TO_F32 => {
                    let v = self.pop_d().f64();
                    self.push_w(Word::from_f32(v as f32));
                }

                // ── Compares ────────────────────────────────────────
                OP_CMP_WORD_EQ => cmpw!(u32, |a, b| a == b),
                OP_CMP_DWORD_EQ => cmpd!(u64, |a, b| a == b),
                OP_CMP_WORD_NE => cmpw!(u32, |a, b| a != b),
                OP_CMP_DWORD_NE => cmpd!(u64, |a, b| a != b),
                OP_CMP_I32_GT => cmpw!(i32, |a, b| a > b),
                OP_CMP_I64_GT => cmpd!(i64, |a, b| a > b),
                OP_CMP_U32_GT => cmpw!(u32, |a, b| a > b),
                OP_CMP_U64_GT => cmpd!(u64, |a, b| a > b),
                OP_CMP_F32_GT => cmpw!(f32, |a, b| a > b),
                OP_CMP_F64_GT => cmpd!(f64, |a, b| a > b),
                OP_CMP_I32_LT => cmpw!(i32, |a, b| a < b),
                OP_CMP_I64_LT => cmpd!(i64, |a, b| a < b),
                OP_CMP_U32_LT => cmpw!(u32, |a, b| a < b),
                OP_CMP_U64_LT => cmpd!(u64, |a, b| a < b),
                OP_CMP_F32_LT => cmpw!(f32, |a, b| a < b),
                OP_CMP_F64_LT => cmpd!(f64, |a, b| a < b),
                OP_CMP_I32_GE => cmpw!(i32, |a, b| a >= b),
                OP_CMP_I64_GE => cmpd!(i64, |a, b| a >= b),
                OP_CMP_U32_GE => cmpw!(u32, |a, b| a >= b),
                OP_CMP_U64_GE => cmpd!(u64, |a, b| a >= b),
                OP_CMP_F32_GE => cmpw!(f32, |a, b| a >= b),
                OP_CMP_F64_GE => cmpd!(f64, |a, b| a >= b),
                OP_CMP_I32_LE => cmpw!(i32, |a, b| a <= b),
                OP_CMP_I64_LE => cmpd!(i64, |a, b| a <= b),
                OP_CMP_U32_LE => cmpw!(u32, |a, b| a <= b),
                OP_CMP_U64_LE => cmpd!(u64, |a, b| a <= b),
                OP_CMP_F32_LE => cmpw!(f32, |a, b| a <= b),
                OP_CMP_F64_LE => cmpd!(f64, |a, b| a <= b),
                OP_CMP_NOT => unw!(u32, Word::from_u32, |v: u32| (v == 0) as u32),

                // ── Stack shuffles ──────────────────────────────────
                OP_DUP_WORD => {
                    let w = self.stack[self.sp - 1];
                    self.push_w(w);
                }
                OP_DUP_DWORD => {
                    let d = DWord::from_words(self.stack[self.sp - 2], self.stack[self.sp - 1]);
                    self.push_d(d);
                }
                OP_DUP_WORD_X1 => {
                    let b = self.pop_w();
                    let a = self.pop_w();
                    self.push_w(b);
                    self.push_w(a);
                    self.push_w(b);
                }
                OP_DUP_DWORD_X1 => {
                    let d = self.pop_d();
                    let a = self.pop_w();
                    self.push_d(d);
                    self.push_w(a);
                    self.push_d(d);
                }
                OP_DUP_WORD_X2 => {
                    let b = self.pop_w();
                    let a = self.pop_d();
                    self.push_w(b);
                    self.push_d(a);
                    self.push_w(b);
                }
                OP_DUP_DWORD_X2 => {
                    let d = self.pop_d();
                    let a = self.pop_d();
                    self.push_d(d);
                    self.push_d(a);
                    self.push_d(d);
                }
                OP_SWAP_WORD => {
                    let b = self.pop_w();
                    let a = self.pop_w();
                    self.push_w(b);
                    self.push_w(a);
                }
                OP_SWAP_DWORD => {
                    let b = self.pop_d();
                    let a = self.pop_d();
                    self.push_d(b);
                    self.push_d(a);
                }

                // ── Loads and stores ────────────────────────────────
                OP_LOAD_BYTE_0..=OP_LOAD_BYTE_3 => {
                    let lane = (op - OP_LOAD_BYTE_0) as u64;
                    let addr = self.pop_d().addr();
                    let v = self.load_u8(addr + lane)?;
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_LOAD_HWORD_0 | OP_LOAD_HWORD_1 => {
                    let lane = (op - OP_LOAD_HWORD_0) as u64;
                    let addr = self.pop_d().addr();
                    let v = self.load_u16(addr + lane * 2)?;
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_LOAD_WORD => {
                    let addr = self.pop_d().addr();
                    let v = self.load_u32(addr)?;
                    self.push_w(Word::from_u32(v));
                }
                OP_LOAD_DWORD => {
                    let addr = self.pop_d().addr();
                    let v = self.load_u64(addr)?;
                    self.push_d(DWord::from_u64(v));
                }
                OP_LOAD_WORDS => {
                    let n = self.op_u8() as usize + 1;
                    let addr = self.pop_d().addr();
                    for j in 0..n {
                        let v = self.load_u32(addr + j as u64 * 4)?;
                        self.push_w(Word::from_u32(v));
                    }
                }
                OP_STORE_BYTE_0..=OP_STORE_BYTE_3 => {
                    let lane = (op - OP_STORE_BYTE_0) as u64;
                    let v = self.pop_w().byte(0);
                    let addr = self.pop_d().addr();
                    self.store_u8(addr + lane, v)?;
                }
                OP_STORE_HWORD_0 | OP_STORE_HWORD_1 => {
                    let lane = (op - OP_STORE_HWORD_0) as u64;
                    let v = self.pop_w().hword(0);
                    let addr = self.pop_d().addr();
                    self.store_u16(addr + lane * 2, v)?;
                }
                OP_STORE_WORD => {
                    let v = self.pop_w().u32();
                    let addr = self.pop_d().addr();
                    self.store_u32(addr, v)?;
                }
                OP_STORE_DWORD => {
                    let v = self.pop_d().u64();
                    let addr = self.pop_d().addr();
                    self.store_u64(addr, v)?;
                }
                OP_STORE_WORDS => {
                    let n = self.op_u8() as usize + 1;
                    self.sp -= n;
                    let values = self.sp;
                    let addr = self.pop_d().addr();
                    for j in 0..n {
                        let v = self.stack[values + j].u32();
                        self.store_u32(addr + j as u64 * 4, v)?;
                    }
                }
                OP_LOAD_OFST_BYTE_0..=OP_LOAD_OFST_BYTE_3 => {
                    let lane = (op - OP_LOAD_OFST_BYTE_0) as u64;
                    let ofst = self.op_u8() as u64 * 4;
                    let addr = self.pop_d().addr();
                    let v = self.load_u8(addr + ofst + lane)?;
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_LOAD_OFST_HWORD_0 | OP_LOAD_OFST_HWORD_1 => {
                    let lane = (op - OP_LOAD_OFST_HWORD_0) as u64;
                    let ofst = self.op_u8() as u64 * 4;
                    let addr = self.pop_d().addr();
                    let v = self.load_u16(addr + ofst + lane * 2)?;
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_LOAD_OFST_WORD => {
                    let ofst = self.op_u8() as u64 * 4;
                    let addr = self.pop_d().addr();
                    let v = self.load_u32(addr + ofst)?;
                    self.push_w(Word::from_u32(v));
                }
                OP_LOAD_OFST_DWORD => {
                    let ofst = self.op_u8() as u64 * 4;
                    let addr = self.pop_d().addr();
                    let v = self.load_u64(addr + ofst)?;
                    self.push_d(DWord::from_u64(v));
                }
                OP_LOAD_OFST_WORDS => {
                    let ofst = self.op_u8() as u64 * 4;
                    let n = self.op_u8() as usize + 1;
                    let addr = self.pop_d().addr() + ofst;
                    for j in 0..n {
                        let v = self.load_u32(addr + j as u64 * 4)?;
                        self.push_w(Word::from_u32(v));
                    }
                }
                OP_STORE_OFST_BYTE_0..=OP_STORE_OFST_BYTE_3 => {
                    let lane = (op - OP_STORE_OFST_BYTE_0) as u64;
                    let ofst = self.op_u8() as u64 * 4;
                    let v = self.pop_w().byte(0);
                    let addr = self.pop_d().addr();
                    self.store_u8(addr + ofst + lane, v)?;
                }
                OP_STORE_OFST_HWORD_0 | OP_STORE_OFST_HWORD_1 => {
                    let lane = (op - OP_STORE_OFST_HWORD_0) as u64;
                    let ofst = self.op_u8() as u64 * 4;
                    let v = self.pop_w().hword(0);
                    let addr = self.pop_d().addr();
                    self.store_u16(addr + ofst + lane * 2, v)?;
                }
                OP_STORE_OFST_WORD => {
                    let ofst = self.op_u8() as u64 * 4;
                    let v = self.pop_w().u32();
                    let addr = self.pop_d().addr();
                    self.store_u32(addr + ofst, v)?;
                }
                OP_STORE_OFST_DWORD => {
                    let ofst = self.op_u8() as u64 * 4;
                    let v = self.pop_d().u64();
                    let addr = self.pop_d().addr();
                    self.store_u64(addr + ofst, v)?;
                }
                OP_STORE_OFST_WORDS => {
                    let ofst = self.op_u8() as u64 * 4;
                    let n = self.op_u8() as usize + 1;
                    self.sp -= n;
                    let values = self.sp;
                    let addr = self.pop_d().addr() + ofst;
                    for j in 0..n {
                        let v = self.stack[values + j].u32();
                        self.store_u32(addr + j as u64 * 4, v)?;
                    }
                }
                OP_LOAD_BUFF_BYTE_VAL => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    let v = self.load_u8(addr + idx)?;
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_LOAD_BUFF_HWORD_VAL => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    let v = self.load_u16(addr + idx * 2)?;
                    self.push_w(Word::from_u32(v as u32));
                }
                OP_LOAD_BUFF_WORD_VAL => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    let v = self.load_u32(addr + idx * 4)?;
                    self.push_w(Word::from_u32(v));
                }
                OP_LOAD_BUFF_DWORD_VAL => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    let v = self.load_u64(addr + idx * 8)?;
                    self.push_d(DWord::from_u64(v));
                }
                OP_LOAD_BUFF_WORDS_VAL => {
                    let n = self.op_u8() as usize + 1;
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr() + idx * n as u64 * 4;
                    for j in 0..n {
                        let v = self.load_u32(addr + j as u64 * 4)?;
                        self.push_w(Word::from_u32(v));
                    }
                }
                OP_LOAD_BUFF_BYTE_REF => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.push_d(DWord::from_addr(addr + idx));
                }
                OP_LOAD_BUFF_HWORD_REF => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.push_d(DWord::from_addr(addr + idx * 2));
                }
                OP_LOAD_BUFF_WORD_REF => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.push_d(DWord::from_addr(addr + idx * 4));
                }
                OP_LOAD_BUFF_DWORD_REF => {
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.push_d(DWord::from_addr(addr + idx * 8));
                }
                OP_LOAD_BUFF_WORDS_REF => {
                    let n = self.op_u8() as u64 + 1;
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.push_d(DWord::from_addr(addr + idx * n * 4));
                }
                OP_STORE_BUFF_BYTE => {
                    let v = self.pop_w().byte(0);
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.store_u8(addr + idx, v)?;
                }
                OP_STORE_BUFF_HWORD => {
                    let v = self.pop_w().hword(0);
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.store_u16(addr + idx * 2, v)?;
                }
                OP_STORE_BUFF_WORD => {
                    let v = self.pop_w().u32();
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.store_u32(addr + idx * 4, v)?;
                }
                OP_STORE_BUFF_DWORD => {
                    let v = self.pop_d().u64();
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr();
                    self.store_u64(addr + idx * 8, v)?;
                }
                OP_STORE_BUFF_WORDS => {
                    let n = self.op_u8() as usize + 1;
                    self.sp -= n;
                    let values = self.sp;
                    let idx = self.pop_w().u32() as u64;
                    let addr = self.pop_d().addr() + idx * n as u64 * 4;
                    for j in 0..n {
                        let v = self.stack[values + j].u32();
                        self.store_u32(addr + j as u64 * 4, v)?;
                    }
                }

                // ── Heap ────────────────────────────────────────────
                OP_ALLOC => {
                    let size = self.pop_w().u32();
                    let addr = self.alloc(size);
                    self.push_d(DWord::from_addr(addr));
                }
                OP_FREE => {
                    let addr = self.pop_d().addr();
                    self.free_block(addr)?;
                }

                // ── Control flow ────────────────────────────────────
                OP_JMP => {
                    let off = self.op_i16() as isize;
                    self.pc = (self.pc as isize + off) as usize;
                }
                OP_JMP_IF => {
                    let off = self.op_i16() as isize;
                    if self.pop_w().u32() != 0 {
                        self.pc = (self.pc as isize + off) as usize;
                    }
                }
                OP_CALL => {
                    let idx = self.op_u16() as usize;
                    let fi = self.cur().function_pool[idx];
                    self.enter(fi)?;
                }
                OP_INDCALL => {
                    let index = self.pop_d().u64();
                    if index >= self.functions.len() as u64 {
                        return Err(VmError::BadFunction { index });
                    }
                    self.enter(index as u32)?;
                }
                OP_SYSCALL => {
                    let sys = self.op_u8();
                    if let Some(code) = self.syscall(sys, at)? {
                        return Ok(code);
                    }
                }
                OP_RET => {
                    if let Some(code) = self.leave() {
                        return Ok(code);
                    }
                }

                _ => {
                    return Err(VmError::UnknownOpcode {
                        opcode: op,
                        pc: at as u32,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{Asm, ModuleFile};
    use crate::linker::link_modules;
    use crate::loader::parse_module;

    fn run_module(m: &ModuleFile) -> Result<i32, VmError> {
        let md = parse_module(&m.encode(), "proj/Main").unwrap();
        let mut ctx = link_modules(&[md], "proj").unwrap();
        execute(&mut ctx)
    }

    fn run_main(m: &ModuleFile) -> i32 {
        run_module(m).unwrap()
    }

    #[test]
    fn integer_arithmetic_chain() {
        // (3 + 4) * 2 - 5 = 9
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_I8_W, 3, OP_PUSH_I8_W, 4, OP_ADD_I32, OP_PUSH_I8_W, 2, OP_MUL_I32,
                OP_PUSH_I8_W, 5, OP_SUB_I32, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 9);
    }

    #[test]
    fn i32_addition_wraps() {
        let mut m = ModuleFile::new();
        m.word(Word::from_i32(i32::MAX));
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_CONST_WORD, 0, OP_PUSH_I8_W, 1, OP_ADD_I32, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), i32::MIN);
    }

    #[test]
    fn division_by_zero_traps() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_I8_W, 1, OP_PUSH_W0, OP_DIV_I32, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert!(matches!(
            run_module(&m),
            Err(VmError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn call_passes_arguments_and_returns() {
        let mut m = ModuleFile::new();
        m.function(
            "Add",
            2,
            2,
            2,
            1,
            vec![OP_PUSH_WORD_0, OP_PUSH_WORD_1, OP_ADD_I32, OP_RET],
        );
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_I8_W, 20, OP_PUSH_I8_W, 22, OP_CALL, 0, 0, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 42);
    }

    #[test]
    fn recursive_sum_of_five() {
        // RecSum(n) = n <= 0 ? 0 : n + RecSum(n - 1), frame shape 1/1/3/1.
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
        m.function(
            "Main",
            0,
            0,
            1,
            0,
            vec![OP_PUSH_I8_W, 5, OP_CALL, 0, 0, OP_SYSCALL, SYS_EXIT],
        );
        assert_eq!(run_main(&m), 15);
    }

    #[test]
    fn unbounded_recursion_overflows_the_stack() {
        let mut m = ModuleFile::new();
        m.function("Spin", 0, 0, 0, 0, vec![OP_CALL, 0, 0, OP_RET]);
        m.function(
            "Main",
            0,
            0,
            1,
            0,
            vec![OP_CALL, 0, 0, OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
        );
        assert!(matches!(
            run_module(&m),
            Err(VmError::StackOverflow { .. })
        ));
    }

    #[test]
    fn global_store_and_load() {
        let mut m = ModuleFile::new();
        m.internal_global("G", 4);
        m.function(
            "Main",
            0,
            0,
            3,
            0,
            vec![
                OP_PUSH_GLOB_REF, 0, OP_PUSH_I8_W, 7, OP_STORE_WORD, OP_PUSH_GLOB_REF, 0,
                OP_LOAD_WORD, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 7);
    }

    #[test]
    fn heap_round_trip() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            5,
            0,
            vec![
                OP_PUSH_I8_W, 16, OP_ALLOC, OP_DUP_DWORD, OP_PUSH_I8_W, 5, OP_STORE_WORD,
                OP_LOAD_WORD, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 5);
    }

    #[test]
    fn freed_block_is_reused() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            4,
            0,
            vec![
                OP_PUSH_I8_W, 8, OP_ALLOC, OP_DUP_DWORD, OP_FREE, OP_PUSH_I8_W, 8, OP_ALLOC,
                OP_CMP_DWORD_EQ, OP_I64_TO_I32, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 1);
    }

    #[test]
    fn free_of_a_non_heap_address_traps() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_D1, OP_FREE, OP_PUSH_W0, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert!(matches!(run_module(&m), Err(VmError::BadFree { .. })));
    }

    #[test]
    fn string_constant_is_addressable() {
        let mut m = ModuleFile::new();
        m.string("A");
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_CONST_STR, 0, OP_LOAD_BYTE_0, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 65);
    }

    #[test]
    fn null_dereference_traps() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![OP_PUSH_D0, OP_LOAD_WORD, OP_SYSCALL, SYS_EXIT],
        );
        assert!(matches!(run_module(&m), Err(VmError::BadAddress { .. })));
    }

    #[test]
    fn loop_sums_zero_through_four() {
        let mut a = Asm::new();
        let top = a.label();
        let done = a.label();
        a.op(OP_PUSH_W0).op(OP_POP_WORD_0); // i = 0
        a.op(OP_PUSH_W0).op(OP_POP_WORD_1); // acc = 0
        a.bind(top);
        a.op(OP_PUSH_WORD_0);
        a.op(OP_PUSH_I8_W).i8(4);
        a.op(OP_CMP_I32_GT);
        a.branch(OP_JMP_IF, done);
        a.op(OP_PUSH_WORD_0);
        a.op(OP_PUSH_WORD_1);
        a.op(OP_ADD_I32);
        a.op(OP_POP_WORD_1);
        a.op(OP_INC_I32).u8(0).u8(1);
        a.branch(OP_JMP, top);
        a.bind(done);
        a.op(OP_PUSH_WORD_1);
        a.op(OP_SYSCALL).u8(SYS_EXIT);

        let mut m = ModuleFile::new();
        m.function("Main", 0, 2, 2, 0, a.finish());
        assert_eq!(run_main(&m), 10);
    }

    #[test]
    fn indirect_call_through_a_function_value() {
        let mut m = ModuleFile::new();
        m.function("FortyOne", 0, 0, 1, 1, vec![OP_PUSH_I8_W, 41, OP_RET]);
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_FUNC, 0, 0, OP_INDCALL, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 41);
    }

    #[test]
    fn bad_function_value_traps() {
        let mut m = ModuleFile::new();
        m.dword(DWord::from_u64(999));
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![OP_PUSH_CONST_DWORD, 0, OP_INDCALL],
        );
        assert!(matches!(run_module(&m), Err(VmError::BadFunction { .. })));
    }

    #[test]
    fn dword_arithmetic_and_narrowing() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            4,
            0,
            vec![
                OP_PUSH_D2, OP_PUSH_D1, OP_SUB_I64, OP_I64_TO_I32, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 1);
    }

    #[test]
    fn float_cast_truncates() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            1,
            0,
            vec![OP_PUSH_F32_2, OP_F32_TO_I32, OP_SYSCALL, SYS_EXIT],
        );
        assert_eq!(run_main(&m), 2);
    }

    #[test]
    fn swap_reorders_the_top_words() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![
                OP_PUSH_I8_W, 1, OP_PUSH_I8_W, 2, OP_SWAP_WORD, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 1);
    }

    #[test]
    fn byte_lanes_of_a_local() {
        let mut m = ModuleFile::new();
        m.word(Word::from_u32(0x0403_0201));
        m.function(
            "Main",
            0,
            1,
            2,
            0,
            vec![
                OP_PUSH_CONST_WORD, 0, OP_POP_WORD_0, OP_PUSH_BYTE_2, 0, OP_SYSCALL, SYS_EXIT,
            ],
        );
        assert_eq!(run_main(&m), 3);
    }
}
