//! Static stack-safety validation, run over every function at link time.
//!
//! From offset 0 at depth 0, the pass follows every reachable control path
//! and proves that the abstract operand-stack depth stays within
//! `[0, SWC]`, that every opcode is defined and fully encoded, that every
//! local-slot operand fits below LWC, and that every pool-index operand is
//! below its pool's size. `ret` must be reached at depth RWC exactly and
//! `syscall exit` is the other terminal; falling off the end of a body is an
//! error. Conditional branches fork: the taken target is walked recursively
//! at depth-1 while the fall-through continues in place. Offsets already
//! walked are memoized with their depth, so loops terminate: rejoining at
//! the same depth closes the path, rejoining at a different depth is a
//! conflict.
//!
//! Indirect calls cannot be resolved statically and are treated as trusted
//! terminals. That trust boundary is the bytecode producer's to uphold.

use std::collections::HashMap;

use thiserror::Error;

use crate::opcode::*;
use crate::program::{Function, ModuleTable, ProgramContext};

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("{signature}: argument count {awc} exceeds local count {lwc}")]
    ArgsExceedLocals {
        signature: String,
        awc: u16,
        lwc: u16,
    },
    #[error("{signature}: undefined opcode {opcode:#04x} at offset {offset}")]
    UndefinedOpcode {
        signature: String,
        opcode: u8,
        offset: u32,
    },
    #[error("{signature}: truncated instruction at offset {offset}")]
    TruncatedInstruction { signature: String, offset: u32 },
    #[error("{signature}: stack depth {depth} outside 0..={swc} at offset {offset}")]
    DepthOutOfRange {
        signature: String,
        depth: i32,
        swc: u16,
        offset: u32,
    },
    #[error("{signature}: local slot {slot} out of bounds for {lwc} locals at offset {offset}")]
    LocalOutOfBounds {
        signature: String,
        slot: u32,
        lwc: u16,
        offset: u32,
    },
    #[error("{signature}: pool index {index} out of bounds for {size} entries at offset {offset}")]
    PoolOutOfBounds {
        signature: String,
        index: u32,
        size: u32,
        offset: u32,
    },
    #[error("{signature}: jump target {target} outside the body at offset {offset}")]
    JumpOutOfBounds {
        signature: String,
        target: i64,
        offset: u32,
    },
    #[error("{signature}: control reaches the end of the body")]
    MissingTerminal { signature: String },
    #[error("{signature}: stack depth {depth} at return, function returns {rwc} words (offset {offset})")]
    ReturnDepthMismatch {
        signature: String,
        depth: i32,
        rwc: u16,
        offset: u32,
    },
    #[error("{signature}: paths rejoin offset {offset} at depths {first} and {second}")]
    DepthConflict {
        signature: String,
        first: i32,
        second: i32,
        offset: u32,
    },
    #[error("{signature}: undefined syscall {sys:#04x} at offset {offset}")]
    UndefinedSyscall {
        signature: String,
        sys: u8,
        offset: u32,
    },
}

/// Validates every function in the linked program. Called by the linker
/// after all pools are resolved; any error aborts the link.
pub fn validate(ctx: &ProgramContext) -> Result<(), ValidateError> {
    for func in &ctx.functions {
        validate_function(ctx, func)?;
    }
    Ok(())
}

fn validate_function(ctx: &ProgramContext, func: &Function) -> Result<(), ValidateError> {
    if func.awc > func.lwc {
        return Err(ValidateError::ArgsExceedLocals {
            signature: func.signature.clone(),
            awc: func.awc,
            lwc: func.lwc,
        });
    }
    let mut pass = Pass {
        ctx,
        func,
        mt: ctx.module(func.module),
        body: ctx.body(func),
        visited: HashMap::new(),
    };
    pass.walk(0, 0)
}

struct Pass<'a> {
    ctx: &'a ProgramContext,
    func: &'a Function,
    mt: &'a ModuleTable,
    body: &'a [u8],
    /// Offset -> depth it was first walked at.
    visited: HashMap<u32, i32>,
}

impl Pass<'_> {
    fn sig(&self) -> String {
        self.func.signature.clone()
    }

    fn check_local(&self, slot: u32, width: u32, offset: u32) -> Result<(), ValidateError> {
        if slot + width > self.func.lwc as u32 {
            return Err(ValidateError::LocalOutOfBounds {
                signature: self.sig(),
                slot,
                lwc: self.func.lwc,
                offset,
            });
        }
        Ok(())
    }

    fn check_pool(&self, index: u32, size: u32, offset: u32) -> Result<(), ValidateError> {
        if index >= size {
            return Err(ValidateError::PoolOutOfBounds {
                signature: self.sig(),
                index,
                size,
                offset,
            });
        }
        Ok(())
    }

    fn check_depth(&self, depth: i32, offset: u32) -> Result<(), ValidateError> {
        if depth < 0 || depth > self.func.swc as i32 {
            return Err(ValidateError::DepthOutOfRange {
                signature: self.sig(),
                depth,
                swc: self.func.swc,
                offset,
            });
        }
        Ok(())
    }

    fn jump_target(&self, end: usize, operands: &[u8], offset: u32) -> Result<u32, ValidateError> {
        let rel = i16::from_le_bytes([operands[0], operands[1]]);
        let target = end as i64 + rel as i64;
        if target < 0 || target >= self.body.len() as i64 {
            return Err(ValidateError::JumpOutOfBounds {
                signature: self.sig(),
                target,
                offset,
            });
        }
        Ok(target as u32)
    }

    /// Operand bounds for locals and pool indices. Depth effects are
    /// handled by the caller.
    fn check_operands(&self, op: u8, operands: &[u8], offset: u32) -> Result<(), ValidateError> {
        match op {
            OP_PUSH_BYTE_0..=OP_PUSH_WORD | OP_POP_BYTE_0..=OP_POP_WORD => {
                self.check_local(operands[0] as u32, 1, offset)
            }
            OP_PUSH_WORD_0..=OP_PUSH_WORD_3 => {
                self.check_local((op - OP_PUSH_WORD_0) as u32, 1, offset)
            }
            OP_POP_WORD_0..=OP_POP_WORD_3 => {
                self.check_local((op - OP_POP_WORD_0) as u32, 1, offset)
            }
            OP_PUSH_DWORD | OP_POP_DWORD => self.check_local(operands[0] as u32, 2, offset),
            OP_PUSH_DWORD_0..=OP_PUSH_DWORD_3 => {
                self.check_local((op - OP_PUSH_DWORD_0) as u32, 2, offset)
            }
            OP_POP_DWORD_0..=OP_POP_DWORD_3 => {
                self.check_local((op - OP_POP_DWORD_0) as u32, 2, offset)
            }
            OP_PUSH_WORDS | OP_POP_WORDS => {
                self.check_local(operands[0] as u32, operands[1] as u32 + 1, offset)
            }
            OP_INC_I32 | OP_INC_F32 | OP_DEC_I32 | OP_DEC_F32 => {
                self.check_local(operands[0] as u32, 1, offset)
            }
            OP_INC_I64 | OP_INC_F64 | OP_DEC_I64 | OP_DEC_F64 => {
                self.check_local(operands[0] as u32, 2, offset)
            }
            OP_PUSH_CONST_WORD => {
                self.check_pool(operands[0] as u32, self.mt.word_count as u32, offset)
            }
            OP_PUSH_CONST_WORD_W => self.check_pool(
                u16::from_le_bytes([operands[0], operands[1]]) as u32,
                self.mt.word_count as u32,
                offset,
            ),
            OP_PUSH_CONST_DWORD => {
                self.check_pool(operands[0] as u32, self.mt.dword_count as u32, offset)
            }
            OP_PUSH_CONST_DWORD_W => self.check_pool(
                u16::from_le_bytes([operands[0], operands[1]]) as u32,
                self.mt.dword_count as u32,
                offset,
            ),
            OP_PUSH_CONST_STR => {
                self.check_pool(operands[0] as u32, self.mt.string_pool.len() as u32, offset)
            }
            OP_PUSH_CONST_STR_W => self.check_pool(
                u16::from_le_bytes([operands[0], operands[1]]) as u32,
                self.mt.string_pool.len() as u32,
                offset,
            ),
            OP_PUSH_GLOB_REF => {
                self.check_pool(operands[0] as u32, self.mt.global_pool.len() as u32, offset)
            }
            OP_PUSH_GLOB_REF_W => self.check_pool(
                u16::from_le_bytes([operands[0], operands[1]]) as u32,
                self.mt.global_pool.len() as u32,
                offset,
            ),
            OP_PUSH_FUNC | OP_CALL => self.check_pool(
                u16::from_le_bytes([operands[0], operands[1]]) as u32,
                self.mt.function_pool.len() as u32,
                offset,
            ),
            _ => Ok(()),
        }
    }

    /// Walks from `pos` at `depth` until a terminal. Conditional branches
    /// recurse for the taken side.
    fn walk(&mut self, mut pos: u32, mut depth: i32) -> Result<(), ValidateError> {
        loop {
            if pos as usize >= self.body.len() {
                return Err(ValidateError::MissingTerminal {
                    signature: self.sig(),
                });
            }
            match self.visited.get(&pos) {
                Some(&seen) if seen == depth => return Ok(()),
                Some(&seen) => {
                    return Err(ValidateError::DepthConflict {
                        signature: self.sig(),
                        first: seen,
                        second: depth,
                        offset: pos,
                    });
                }
                None => {}
            }
            self.visited.insert(pos, depth);

            let op = self.body[pos as usize];
            let Some(olen) = operand_len(op) else {
                return Err(ValidateError::UndefinedOpcode {
                    signature: self.sig(),
                    opcode: op,
                    offset: pos,
                });
            };
            let end = pos as usize + 1 + olen;
            if end > self.body.len() {
                return Err(ValidateError::TruncatedInstruction {
                    signature: self.sig(),
                    offset: pos,
                });
            }
            let operands = &self.body[pos as usize + 1..end];
            self.check_operands(op, operands, pos)?;

            let delta = match op {
                OP_RET => {
                    if depth != self.func.rwc as i32 {
                        return Err(ValidateError::ReturnDepthMismatch {
                            signature: self.sig(),
                            depth,
                            rwc: self.func.rwc,
                            offset: pos,
                        });
                    }
                    return Ok(());
                }
                OP_INDCALL => {
                    // Trusted terminal: the callee is runtime data.
                    self.check_depth(depth - 2, pos)?;
                    return Ok(());
                }
                OP_SYSCALL => {
                    let sys = operands[0];
                    let Some(d) = syscall_delta(sys) else {
                        return Err(ValidateError::UndefinedSyscall {
                            signature: self.sig(),
                            sys,
                            offset: pos,
                        });
                    };
                    if sys == SYS_EXIT {
                        self.check_depth(depth - 1, pos)?;
                        return Ok(());
                    }
                    d
                }
                OP_CALL => {
                    let idx = u16::from_le_bytes([operands[0], operands[1]]) as usize;
                    // check_operands proved idx is in range.
                    let callee = self.ctx.function(self.mt.function_pool[idx]);
                    if depth < callee.awc as i32 {
                        return Err(ValidateError::DepthOutOfRange {
                            signature: self.sig(),
                            depth: depth - callee.awc as i32,
                            swc: self.func.swc,
                            offset: pos,
                        });
                    }
                    callee.rwc as i32 - callee.awc as i32
                }
                OP_JMP => {
                    pos = self.jump_target(end, operands, pos)?;
                    continue;
                }
                OP_JMP_IF => {
                    let target = self.jump_target(end, operands, pos)?;
                    self.check_depth(depth - 1, pos)?;
                    self.walk(target, depth - 1)?;
                    depth -= 1;
                    pos = end as u32;
                    continue;
                }
                OP_PUSH_WORDS => operands[1] as i32 + 1,
                OP_POP_WORDS => -(operands[1] as i32 + 1),
                OP_LOAD_WORDS => operands[0] as i32 + 1 - 2,
                OP_STORE_WORDS => -(operands[0] as i32 + 1 + 2),
                OP_LOAD_OFST_WORDS => operands[1] as i32 + 1 - 2,
                OP_STORE_OFST_WORDS => -(operands[1] as i32 + 1 + 2),
                OP_LOAD_BUFF_WORDS_VAL => operands[0] as i32 + 1 - 3,
                OP_STORE_BUFF_WORDS => -(operands[0] as i32 + 1 + 3),
                _ => match stack_delta(op) {
                    Some(d) => d,
                    None => {
                        return Err(ValidateError::UndefinedOpcode {
                            signature: self.sig(),
                            opcode: op,
                            offset: pos,
                        });
                    }
                },
            };

            depth += delta;
            self.check_depth(depth, pos)?;
            pos = end as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::ModuleFile;
    use crate::linker::{link_modules, LinkError};
    use crate::loader::parse_module;

    fn link_one(m: &ModuleFile) -> Result<ProgramContext, LinkError> {
        let md = parse_module(&m.encode(), "proj/Main").unwrap();
        link_modules(&[md], "proj")
    }

    fn validation(m: &ModuleFile) -> Result<(), ValidateError> {
        match link_one(m) {
            Ok(_) => Ok(()),
            Err(LinkError::Validation(e)) => Err(e),
            Err(other) => panic!("unexpected link error: {other}"),
        }
    }

    fn jmp_if(rel: i16) -> Vec<u8> {
        let [a, b] = rel.to_le_bytes();
        vec![OP_JMP_IF, a, b]
    }

    #[test]
    fn args_exceeding_locals_rejected_before_any_instruction() {
        let mut m = ModuleFile::new();
        // Garbage body; the shape check must fire first.
        m.function("Main", 2, 1, 0, 0, vec![0xFF, 0xFF]);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::ArgsExceedLocals { awc: 2, lwc: 1, .. })
        ));
    }

    #[test]
    fn pool_index_bound_is_exact() {
        let mut ok = ModuleFile::new();
        ok.word(crate::value::Word::from_i32(9));
        ok.function(
            "Main",
            0,
            0,
            1,
            0,
            vec![OP_PUSH_CONST_WORD, 0, OP_SYSCALL, SYS_EXIT],
        );
        assert!(validation(&ok).is_ok());

        let mut bad = ModuleFile::new();
        bad.word(crate::value::Word::from_i32(9));
        bad.function(
            "Main",
            0,
            0,
            1,
            0,
            vec![OP_PUSH_CONST_WORD, 1, OP_SYSCALL, SYS_EXIT],
        );
        assert!(matches!(
            validation(&bad),
            Err(ValidateError::PoolOutOfBounds {
                index: 1,
                size: 1,
                ..
            })
        ));
    }

    #[test]
    fn undefined_opcode_rejected() {
        let mut m = ModuleFile::new();
        m.function("Main", 0, 0, 1, 0, vec![0x12, OP_RET]);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::UndefinedOpcode { opcode: 0x12, .. })
        ));
    }

    #[test]
    fn truncated_final_instruction_rejected() {
        let mut m = ModuleFile::new();
        m.function("Main", 0, 0, 1, 0, vec![OP_PUSH_W0, OP_SYSCALL]);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::TruncatedInstruction { .. })
        ));
    }

    #[test]
    fn falling_off_the_end_rejected() {
        let mut m = ModuleFile::new();
        m.function("Main", 0, 0, 1, 0, vec![OP_PUSH_W0, OP_POP_WORD_0]);
        // Local 0 does not exist either, but depth work comes after bounds;
        // give it a local so only the missing terminal fires.
        let mut m2 = ModuleFile::new();
        m2.function("Main", 0, 1, 1, 0, vec![OP_PUSH_W0, OP_POP_WORD_0]);
        assert!(validation(&m).is_err());
        assert!(matches!(
            validation(&m2),
            Err(ValidateError::MissingTerminal { .. })
        ));
    }

    #[test]
    fn swc_overflow_rejected() {
        let mut m = ModuleFile::new();
        m.function(
            "Main",
            0,
            0,
            1,
            0,
            vec![OP_PUSH_W0, OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
        );
        assert!(matches!(
            validation(&m),
            Err(ValidateError::DepthOutOfRange { depth: 2, swc: 1, .. })
        ));
    }

    #[test]
    fn underflow_rejected() {
        let mut m = ModuleFile::new();
        m.function("Main", 0, 1, 1, 0, vec![OP_POP_WORD_0, OP_RET]);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::DepthOutOfRange { depth: -1, .. })
        ));
    }

    #[test]
    fn return_depth_must_match_rwc() {
        let mut m = ModuleFile::new();
        m.function("F", 0, 0, 1, 1, vec![OP_RET]);
        m.function("Main", 0, 0, 1, 0, vec![OP_PUSH_W0, OP_SYSCALL, SYS_EXIT]);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::ReturnDepthMismatch { depth: 0, rwc: 1, .. })
        ));
    }

    #[test]
    fn conditional_fork_validates_both_paths() {
        // if (w != 0) return 1; else return 0;  with swc 1, rwc 1
        let mut body = vec![OP_PUSH_W1];
        body.extend(jmp_if(2)); // over the push+ret below
        body.push(OP_PUSH_W0);
        body.push(OP_RET);
        body.push(OP_PUSH_W1);
        body.push(OP_RET);
        let mut m = ModuleFile::new();
        m.function("F", 0, 0, 1, 1, body);
        m.function("Main", 0, 0, 1, 0, vec![OP_PUSH_W0, OP_SYSCALL, SYS_EXIT]);
        assert!(validation(&m).is_ok());
    }

    #[test]
    fn backward_loop_at_stable_depth_terminates() {
        // loop: push 1; jmp_if loop; push 0; syscall exit
        let mut body = vec![OP_PUSH_W1];
        body.extend(jmp_if(-4)); // back to offset 0
        body.push(OP_PUSH_W0);
        body.push(OP_SYSCALL);
        body.push(SYS_EXIT);
        let mut m = ModuleFile::new();
        m.function("Main", 0, 0, 1, 0, body);
        assert!(validation(&m).is_ok());
    }

    #[test]
    fn rejoining_at_a_different_depth_is_a_conflict() {
        // push 1; push 1; jmp_if back to offset 0: entry walked it at
        // depth 0, the back edge arrives at depth 1.
        let mut body = vec![OP_PUSH_W1, OP_PUSH_W1];
        body.extend(jmp_if(-5)); // back to offset 0
        body.push(OP_PUSH_W0);
        body.push(OP_SYSCALL);
        body.push(SYS_EXIT);
        let mut m = ModuleFile::new();
        m.function("Main", 0, 0, 2, 0, body);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::DepthConflict { .. })
        ));
    }

    #[test]
    fn call_needs_arguments_on_the_stack() {
        let mut m = ModuleFile::new();
        m.function("Take2", 2, 2, 0, 0, vec![OP_RET]);
        // Main calls Take2 with only one word pushed.
        m.external_function("proj/Main.Take2");
        m.function(
            "Main",
            0,
            0,
            2,
            0,
            vec![OP_PUSH_W0, OP_CALL, 0, 0, OP_PUSH_W0, OP_SYSCALL, SYS_EXIT],
        );
        assert!(matches!(
            validation(&m),
            Err(ValidateError::DepthOutOfRange { .. })
        ));
    }

    #[test]
    fn jump_outside_the_body_rejected() {
        let mut m = ModuleFile::new();
        let mut body = vec![OP_PUSH_W1];
        body.extend(jmp_if(100));
        body.push(OP_PUSH_W0);
        body.push(OP_SYSCALL);
        body.push(SYS_EXIT);
        m.function("Main", 0, 0, 1, 0, body);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::JumpOutOfBounds { .. })
        ));
    }

    #[test]
    fn undefined_syscall_rejected() {
        let mut m = ModuleFile::new();
        m.function("Main", 0, 0, 1, 0, vec![OP_SYSCALL, 0x7F]);
        assert!(matches!(
            validation(&m),
            Err(ValidateError::UndefinedSyscall { sys: 0x7F, .. })
        ));
    }
}
