//! The canonical opcode set and its two normative per-opcode tables.
//!
//! `operand_len` gives every defined opcode's fixed encoded-operand length in
//! bytes; `stack_delta` gives the fixed stack-slot delta, or `None` for the
//! opcodes whose effect depends on an encoded count or on a callee
//! (`*_WORDS` copies, `call`, `indcall`, `syscall`, `ret`). The validator and
//! the interpreter both read these tables; they must never drift apart.
//!
//! Multi-byte operands are little-endian. Opcode byte 0x00 and everything
//! above [`OP_MAX`] is undefined: rejected by the validator, a trap in the
//! interpreter.

// ── Local pushes ────────────────────────────────────────────────────
// Byte/half-word lanes read the numbered lane of a 4-byte local slot.
pub const OP_PUSH_BYTE_0: u8 = 0x01; // [local]
pub const OP_PUSH_BYTE_1: u8 = 0x02;
pub const OP_PUSH_BYTE_2: u8 = 0x03;
pub const OP_PUSH_BYTE_3: u8 = 0x04;
pub const OP_PUSH_HWORD_0: u8 = 0x05; // [local]
pub const OP_PUSH_HWORD_1: u8 = 0x06;
pub const OP_PUSH_WORD: u8 = 0x07; // [local]
pub const OP_PUSH_WORD_0: u8 = 0x08; // shorthand: local encoded in opcode
pub const OP_PUSH_WORD_1: u8 = 0x09;
pub const OP_PUSH_WORD_2: u8 = 0x0A;
pub const OP_PUSH_WORD_3: u8 = 0x0B;
pub const OP_PUSH_DWORD: u8 = 0x0C; // [local]
pub const OP_PUSH_DWORD_0: u8 = 0x0D;
pub const OP_PUSH_DWORD_1: u8 = 0x0E;
pub const OP_PUSH_DWORD_2: u8 = 0x0F;
pub const OP_PUSH_DWORD_3: u8 = 0x10;
pub const OP_PUSH_WORDS: u8 = 0x11; // [local][count-1]
// 0x12 reserved: references never point into the value stack.

// ── Immediate pushes ────────────────────────────────────────────────
pub const OP_PUSH_W0: u8 = 0x13; // word 0
pub const OP_PUSH_W1: u8 = 0x14;
pub const OP_PUSH_W2: u8 = 0x15;
pub const OP_PUSH_D0: u8 = 0x16; // dword 0
pub const OP_PUSH_D1: u8 = 0x17;
pub const OP_PUSH_D2: u8 = 0x18;
pub const OP_PUSH_F32_1: u8 = 0x19;
pub const OP_PUSH_F32_2: u8 = 0x1A;
pub const OP_PUSH_F64_1: u8 = 0x1B;
pub const OP_PUSH_F64_2: u8 = 0x1C;
pub const OP_PUSH_I8_W: u8 = 0x1D; // [i8] sign-extended to word
pub const OP_PUSH_I8_D: u8 = 0x1E; // [i8] sign-extended to dword

// ── Pool constant pushes ────────────────────────────────────────────
pub const OP_PUSH_CONST_WORD: u8 = 0x1F; // [u8 index]
pub const OP_PUSH_CONST_WORD_W: u8 = 0x20; // [u16 index]
pub const OP_PUSH_CONST_DWORD: u8 = 0x21;
pub const OP_PUSH_CONST_DWORD_W: u8 = 0x22;
pub const OP_PUSH_CONST_STR: u8 = 0x23; // pushes arena ref (2 slots)
pub const OP_PUSH_CONST_STR_W: u8 = 0x24;
pub const OP_PUSH_GLOB_REF: u8 = 0x25; // pushes arena ref to a global
pub const OP_PUSH_GLOB_REF_W: u8 = 0x26;
pub const OP_PUSH_FUNC: u8 = 0x27; // [u16 pool index], function value (2 slots)

// ── Local pops ──────────────────────────────────────────────────────
pub const OP_POP_BYTE_0: u8 = 0x28; // [local]
pub const OP_POP_BYTE_1: u8 = 0x29;
pub const OP_POP_BYTE_2: u8 = 0x2A;
pub const OP_POP_BYTE_3: u8 = 0x2B;
pub const OP_POP_HWORD_0: u8 = 0x2C;
pub const OP_POP_HWORD_1: u8 = 0x2D;
pub const OP_POP_WORD: u8 = 0x2E; // [local]
pub const OP_POP_WORD_0: u8 = 0x2F;
pub const OP_POP_WORD_1: u8 = 0x30;
pub const OP_POP_WORD_2: u8 = 0x31;
pub const OP_POP_WORD_3: u8 = 0x32;
pub const OP_POP_DWORD: u8 = 0x33; // [local]
pub const OP_POP_DWORD_0: u8 = 0x34;
pub const OP_POP_DWORD_1: u8 = 0x35;
pub const OP_POP_DWORD_2: u8 = 0x36;
pub const OP_POP_DWORD_3: u8 = 0x37;
pub const OP_POP_WORDS: u8 = 0x38; // [local][count-1]

// ── Arithmetic ──────────────────────────────────────────────────────
pub const OP_ADD_I32: u8 = 0x39;
pub const OP_ADD_I64: u8 = 0x3A;
pub const OP_ADD_F32: u8 = 0x3B;
pub const OP_ADD_F64: u8 = 0x3C;
pub const OP_INC_I32: u8 = 0x3D; // [local][u8 imm], in place on the local
pub const OP_INC_I64: u8 = 0x3E;
pub const OP_INC_F32: u8 = 0x3F;
pub const OP_INC_F64: u8 = 0x40;
pub const OP_SUB_I32: u8 = 0x41;
pub const OP_SUB_I64: u8 = 0x42;
pub const OP_SUB_F32: u8 = 0x43;
pub const OP_SUB_F64: u8 = 0x44;
pub const OP_DEC_I32: u8 = 0x45; // [local][u8 imm]
pub const OP_DEC_I64: u8 = 0x46;
pub const OP_DEC_F32: u8 = 0x47;
pub const OP_DEC_F64: u8 = 0x48;
pub const OP_MUL_I32: u8 = 0x49;
pub const OP_MUL_I64: u8 = 0x4A;
pub const OP_MUL_U32: u8 = 0x4B;
pub const OP_MUL_U64: u8 = 0x4C;
pub const OP_MUL_F32: u8 = 0x4D;
pub const OP_MUL_F64: u8 = 0x4E;
pub const OP_DIV_I32: u8 = 0x4F;
pub const OP_DIV_I64: u8 = 0x50;
pub const OP_DIV_U32: u8 = 0x51;
pub const OP_DIV_U64: u8 = 0x52;
pub const OP_DIV_F32: u8 = 0x53;
pub const OP_DIV_F64: u8 = 0x54;
pub const OP_REM_I32: u8 = 0x55;
pub const OP_REM_I64: u8 = 0x56;
pub const OP_REM_U32: u8 = 0x57;
pub const OP_REM_U64: u8 = 0x58;
pub const OP_NEG_I32: u8 = 0x59;
pub const OP_NEG_I64: u8 = 0x5A;
pub const OP_NEG_F32: u8 = 0x5B;
pub const OP_NEG_F64: u8 = 0x5C;

// ── Bitwise ─────────────────────────────────────────────────────────
pub const OP_NOT_WORD: u8 = 0x5D;
pub const OP_NOT_DWORD: u8 = 0x5E;
pub const OP_AND_WORD: u8 = 0x5F;
pub const OP_AND_DWORD: u8 = 0x60;
pub const OP_OR_WORD: u8 = 0x61;
pub const OP_OR_DWORD: u8 = 0x62;
pub const OP_XOR_WORD: u8 = 0x63;
pub const OP_XOR_DWORD: u8 = 0x64;
pub const OP_SHL_WORD: u8 = 0x65;
pub const OP_SHL_DWORD: u8 = 0x66;
pub const OP_SHR_I32: u8 = 0x67; // arithmetic
pub const OP_SHR_I64: u8 = 0x68;
pub const OP_SHR_U32: u8 = 0x69; // logical
pub const OP_SHR_U64: u8 = 0x6A;

// ── Casts ───────────────────────────────────────────────────────────
pub const OP_I32_TO_I8: u8 = 0x6B;
pub const OP_I32_TO_I16: u8 = 0x6C;
pub const OP_I32_TO_I64: u8 = 0x6D;
pub const OP_I32_TO_F32: u8 = 0x6E;
pub const OP_I32_TO_F64: u8 = 0x6F;
pub const OP_I64_TO_I32: u8 = 0x70;
pub const OP_I64_TO_F32: u8 = 0x71;
pub const OP_I64_TO_F64: u8 = 0x72;
pub const OP_F32_TO_I32: u8 = 0x73;
pub const OP_F32_TO_I64: u8 = 0x74;
pub const OP_F32_TO_F64: u8 = 0x75;
pub const OP_F64_TO_I32: u8 = 0x76;
pub const OP_F64_TO_I64: u8 = 0x77;
pub const OP_F64_TO_F32: u8 = 0x78;

// ── Compares ────────────────────────────────────────────────────────
// Word compares leave one word (0/1); dword compares leave a dword 0/1.
pub const OP_CMP_WORD_EQ: u8 = 0x79;
pub const OP_CMP_DWORD_EQ: u8 = 0x7A;
pub const OP_CMP_WORD_NE: u8 = 0x7B;
pub const OP_CMP_DWORD_NE: u8 = 0x7C;
pub const OP_CMP_I32_GT: u8 = 0x7D;
pub const OP_CMP_I64_GT: u8 = 0x7E;
pub const OP_CMP_U32_GT: u8 = 0x7F;
pub const OP_CMP_U64_GT: u8 = 0x80;
pub const OP_CMP_F32_GT: u8 = 0x81;
pub const OP_CMP_F64_GT: u8 = 0x82;
pub const OP_CMP_I32_LT: u8 = 0x83;
pub const OP_CMP_I64_LT: u8 = 0x84;
pub const OP_CMP_U32_LT: u8 = 0x85;
pub const OP_CMP_U64_LT: u8 = 0x86;
pub const OP_CMP_F32_LT: u8 = 0x87;
pub const OP_CMP_F64_LT: u8 = 0x88;
pub const OP_CMP_I32_GE: u8 = 0x89;
pub const OP_CMP_I64_GE: u8 = 0x8A;
pub const OP_CMP_U32_GE: u8 = 0x8B;
pub const OP_CMP_U64_GE: u8 = 0x8C;
pub const OP_CMP_F32_GE: u8 = 0x8D;
pub const OP_CMP_F64_GE: u8 = 0x8E;
pub const OP_CMP_I32_LE: u8 = 0x8F;
pub const OP_CMP_I64_LE: u8 = 0x90;
pub const OP_CMP_U32_LE: u8 = 0x91;
pub const OP_CMP_U64_LE: u8 = 0x92;
pub const OP_CMP_F32_LE: u8 = 0x93;
pub const OP_CMP_F64_LE: u8 = 0x94;
pub const OP_CMP_NOT: u8 = 0x95; // logical not on the top word

// ── Stack shuffles ──────────────────────────────────────────────────
pub const OP_DUP_WORD: u8 = 0x96;
pub const OP_DUP_DWORD: u8 = 0x97;
pub const OP_DUP_WORD_X1: u8 = 0x98; // dup top word under the next word
pub const OP_DUP_DWORD_X1: u8 = 0x99; // dup top dword under the next word
pub const OP_DUP_WORD_X2: u8 = 0x9A;
pub const OP_DUP_DWORD_X2: u8 = 0x9B;
pub const OP_SWAP_WORD: u8 = 0x9C;
pub const OP_SWAP_DWORD: u8 = 0x9D;

// ── Loads & stores through an arena reference ───────────────────────
// Plain: address is the dword on top (under the value, for stores).
pub const OP_LOAD_BYTE_0: u8 = 0x9E;
pub const OP_LOAD_BYTE_1: u8 = 0x9F;
pub const OP_LOAD_BYTE_2: u8 = 0xA0;
pub const OP_LOAD_BYTE_3: u8 = 0xA1;
pub const OP_LOAD_HWORD_0: u8 = 0xA2;
pub const OP_LOAD_HWORD_1: u8 = 0xA3;
pub const OP_LOAD_WORD: u8 = 0xA4;
pub const OP_LOAD_DWORD: u8 = 0xA5;
pub const OP_LOAD_WORDS: u8 = 0xA6; // [count-1]
pub const OP_STORE_BYTE_0: u8 = 0xA7;
pub const OP_STORE_BYTE_1: u8 = 0xA8;
pub const OP_STORE_BYTE_2: u8 = 0xA9;
pub const OP_STORE_BYTE_3: u8 = 0xAA;
pub const OP_STORE_HWORD_0: u8 = 0xAB;
pub const OP_STORE_HWORD_1: u8 = 0xAC;
pub const OP_STORE_WORD: u8 = 0xAD;
pub const OP_STORE_DWORD: u8 = 0xAE;
pub const OP_STORE_WORDS: u8 = 0xAF; // [count-1]

// Offset variants: [u8 offset] in words from the reference.
pub const OP_LOAD_OFST_BYTE_0: u8 = 0xB0;
pub const OP_LOAD_OFST_BYTE_1: u8 = 0xB1;
pub const OP_LOAD_OFST_BYTE_2: u8 = 0xB2;
pub const OP_LOAD_OFST_BYTE_3: u8 = 0xB3;
pub const OP_LOAD_OFST_HWORD_0: u8 = 0xB4;
pub const OP_LOAD_OFST_HWORD_1: u8 = 0xB5;
pub const OP_LOAD_OFST_WORD: u8 = 0xB6;
pub const OP_LOAD_OFST_DWORD: u8 = 0xB7;
pub const OP_LOAD_OFST_WORDS: u8 = 0xB8; // [offset][count-1]
pub const OP_STORE_OFST_BYTE_0: u8 = 0xB9;
pub const OP_STORE_OFST_BYTE_1: u8 = 0xBA;
pub const OP_STORE_OFST_BYTE_2: u8 = 0xBB;
pub const OP_STORE_OFST_BYTE_3: u8 = 0xBC;
pub const OP_STORE_OFST_HWORD_0: u8 = 0xBD;
pub const OP_STORE_OFST_HWORD_1: u8 = 0xBE;
pub const OP_STORE_OFST_WORD: u8 = 0xBF;
pub const OP_STORE_OFST_DWORD: u8 = 0xC0;
pub const OP_STORE_OFST_WORDS: u8 = 0xC1; // [offset][count-1]

// Buffer variants: element index on top of the stack, scaled by element size.
pub const OP_LOAD_BUFF_BYTE_VAL: u8 = 0xC2;
pub const OP_LOAD_BUFF_HWORD_VAL: u8 = 0xC3;
pub const OP_LOAD_BUFF_WORD_VAL: u8 = 0xC4;
pub const OP_LOAD_BUFF_DWORD_VAL: u8 = 0xC5;
pub const OP_LOAD_BUFF_WORDS_VAL: u8 = 0xC6; // [count-1]
pub const OP_LOAD_BUFF_BYTE_REF: u8 = 0xC7;
pub const OP_LOAD_BUFF_HWORD_REF: u8 = 0xC8;
pub const OP_LOAD_BUFF_WORD_REF: u8 = 0xC9;
pub const OP_LOAD_BUFF_DWORD_REF: u8 = 0xCA;
pub const OP_LOAD_BUFF_WORDS_REF: u8 = 0xCB; // [count-1]
pub const OP_STORE_BUFF_BYTE: u8 = 0xCC;
pub const OP_STORE_BUFF_HWORD: u8 = 0xCD;
pub const OP_STORE_BUFF_WORD: u8 = 0xCE;
pub const OP_STORE_BUFF_DWORD: u8 = 0xCF;
pub const OP_STORE_BUFF_WORDS: u8 = 0xD0; // [count-1]

// ── Heap ────────────────────────────────────────────────────────────
pub const OP_ALLOC: u8 = 0xD1; // word size -> dword ref
pub const OP_FREE: u8 = 0xD2; // dword ref

// ── Control flow ────────────────────────────────────────────────────
pub const OP_JMP: u8 = 0xD3; // [i16 offset from end of instruction]
pub const OP_JMP_IF: u8 = 0xD4; // [i16] pops one word, taken when non-zero
pub const OP_CALL: u8 = 0xD5; // [u16 function pool index]
pub const OP_INDCALL: u8 = 0xD6; // pops a function dword
pub const OP_SYSCALL: u8 = 0xD7; // [u8 syscall number]
pub const OP_RET: u8 = 0xD8;

pub const OP_MAX: u8 = OP_RET;

// ── Syscalls ────────────────────────────────────────────────────────
pub const SYS_EXIT: u8 = 0x00;
pub const SYS_PRINT: u8 = 0x01;
pub const SYS_PRINTI: u8 = 0x02;
pub const SYS_PRINTF: u8 = 0x03;
pub const SYS_SCAN: u8 = 0x04;
pub const SYS_SCANI: u8 = 0x05;
pub const SYS_SCANF: u8 = 0x06;
pub const SYS_MEMMOV: u8 = 0x07;
pub const SYS_MEMCPY: u8 = 0x08;
pub const SYS_CLOCK: u8 = 0x09;
pub const SYS_SQRT32: u8 = 0x0A;
pub const SYS_SQRT64: u8 = 0x0B;
pub const SYS_EXP32: u8 = 0x0C;
pub const SYS_EXP64: u8 = 0x0D;
pub const SYS_LOG32: u8 = 0x0E;
pub const SYS_LOG64: u8 = 0x0F;

pub const SYS_MAX: u8 = SYS_LOG64;

/// Fixed encoded-operand length in bytes, or `None` for undefined opcodes.
pub fn operand_len(op: u8) -> Option<usize> {
    let len = match op {
        OP_PUSH_BYTE_0..=OP_PUSH_HWORD_1 => 1,
        OP_PUSH_WORD => 1,
        OP_PUSH_WORD_0..=OP_PUSH_WORD_3 => 0,
        OP_PUSH_DWORD => 1,
        OP_PUSH_DWORD_0..=OP_PUSH_DWORD_3 => 0,
        OP_PUSH_WORDS => 2,
        OP_PUSH_W0..=OP_PUSH_F64_2 => 0,
        OP_PUSH_I8_W | OP_PUSH_I8_D => 1,
        OP_PUSH_CONST_WORD | OP_PUSH_CONST_DWORD | OP_PUSH_CONST_STR | OP_PUSH_GLOB_REF => 1,
        OP_PUSH_CONST_WORD_W | OP_PUSH_CONST_DWORD_W | OP_PUSH_CONST_STR_W | OP_PUSH_GLOB_REF_W => 2,
        OP_PUSH_FUNC => 2,
        OP_POP_BYTE_0..=OP_POP_HWORD_1 => 1,
        OP_POP_WORD => 1,
        OP_POP_WORD_0..=OP_POP_WORD_3 => 0,
        OP_POP_DWORD => 1,
        OP_POP_DWORD_0..=OP_POP_DWORD_3 => 0,
        OP_POP_WORDS => 2,
        OP_ADD_I32..=OP_ADD_F64 => 0,
        OP_INC_I32..=OP_INC_F64 => 2,
        OP_SUB_I32..=OP_SUB_F64 => 0,
        OP_DEC_I32..=OP_DEC_F64 => 2,
        OP_MUL_I32..=OP_NEG_F64 => 0,
        OP_NOT_WORD..=OP_SHR_U64 => 0,
        OP_I32_TO_I8..=OP_F64_TO_F32 => 0,
        OP_CMP_WORD_EQ..=OP_CMP_NOT => 0,
        OP_DUP_WORD..=OP_SWAP_DWORD => 0,
        OP_LOAD_BYTE_0..=OP_LOAD_DWORD => 0,
        OP_LOAD_WORDS => 1,
        OP_STORE_BYTE_0..=OP_STORE_DWORD => 0,
        OP_STORE_WORDS => 1,
        OP_LOAD_OFST_BYTE_0..=OP_LOAD_OFST_DWORD => 1,
        OP_LOAD_OFST_WORDS => 2,
        OP_STORE_OFST_BYTE_0..=OP_STORE_OFST_DWORD => 1,
        OP_STORE_OFST_WORDS => 2,
        OP_LOAD_BUFF_BYTE_VAL..=OP_LOAD_BUFF_DWORD_VAL => 0,
        OP_LOAD_BUFF_WORDS_VAL => 1,
        OP_LOAD_BUFF_BYTE_REF..=OP_LOAD_BUFF_DWORD_REF => 0,
        OP_LOAD_BUFF_WORDS_REF => 1,
        OP_STORE_BUFF_BYTE..=OP_STORE_BUFF_DWORD => 0,
        OP_STORE_BUFF_WORDS => 1,
        OP_ALLOC | OP_FREE => 0,
        OP_JMP | OP_JMP_IF => 2,
        OP_CALL => 2,
        OP_INDCALL => 0,
        OP_SYSCALL => 1,
        OP_RET => 0,
        _ => return None,
    };
    Some(len)
}

/// Fixed stack-slot delta, or `None` when the delta depends on an encoded
/// count (`*_WORDS`), a callee (`call`, `indcall`), or a syscall number.
pub fn stack_delta(op: u8) -> Option<i32> {
    let delta = match op {
        OP_PUSH_BYTE_0..=OP_PUSH_WORD_3 => 1,
        OP_PUSH_DWORD..=OP_PUSH_DWORD_3 => 2,
        OP_PUSH_WORDS => return None,
        OP_PUSH_W0..=OP_PUSH_W2 => 1,
        OP_PUSH_D0..=OP_PUSH_D2 => 2,
        OP_PUSH_F32_1 | OP_PUSH_F32_2 => 1,
        OP_PUSH_F64_1 | OP_PUSH_F64_2 => 2,
        OP_PUSH_I8_W => 1,
        OP_PUSH_I8_D => 2,
        OP_PUSH_CONST_WORD | OP_PUSH_CONST_WORD_W => 1,
        OP_PUSH_CONST_DWORD | OP_PUSH_CONST_DWORD_W => 2,
        OP_PUSH_CONST_STR | OP_PUSH_CONST_STR_W => 2,
        OP_PUSH_GLOB_REF | OP_PUSH_GLOB_REF_W => 2,
        OP_PUSH_FUNC => 2,
        OP_POP_BYTE_0..=OP_POP_WORD_3 => -1,
        OP_POP_DWORD..=OP_POP_DWORD_3 => -2,
        OP_POP_WORDS => return None,
        OP_ADD_I32 | OP_ADD_F32 | OP_SUB_I32 | OP_SUB_F32 => -1,
        OP_ADD_I64 | OP_ADD_F64 | OP_SUB_I64 | OP_SUB_F64 => -2,
        OP_INC_I32..=OP_INC_F64 | OP_DEC_I32..=OP_DEC_F64 => 0,
        OP_MUL_I32 | OP_MUL_U32 | OP_MUL_F32 => -1,
        OP_MUL_I64 | OP_MUL_U64 | OP_MUL_F64 => -2,
        OP_DIV_I32 | OP_DIV_U32 | OP_DIV_F32 => -1,
        OP_DIV_I64 | OP_DIV_U64 | OP_DIV_F64 => -2,
        OP_REM_I32 | OP_REM_U32 => -1,
        OP_REM_I64 | OP_REM_U64 => -2,
        OP_NEG_I32..=OP_NEG_F64 => 0,
        OP_NOT_WORD | OP_NOT_DWORD => 0,
        OP_AND_WORD | OP_OR_WORD | OP_XOR_WORD | OP_SHL_WORD => -1,
        OP_AND_DWORD | OP_OR_DWORD | OP_XOR_DWORD | OP_SHL_DWORD => -2,
        OP_SHR_I32 | OP_SHR_U32 => -1,
        OP_SHR_I64 | OP_SHR_U64 => -2,
        OP_I32_TO_I8 | OP_I32_TO_I16 | OP_I32_TO_F32 => 0,
        OP_I32_TO_I64 | OP_I32_TO_F64 => 1,
        OP_I64_TO_I32 | OP_I64_TO_F32 => -1,
        OP_I64_TO_F64 => 0,
        OP_F32_TO_I32 => 0,
        OP_F32_TO_I64 | OP_F32_TO_F64 => 1,
        OP_F64_TO_I32 | OP_F64_TO_F32 => -1,
        OP_F64_TO_I64 => 0,
        OP_CMP_WORD_EQ | OP_CMP_WORD_NE => -1,
        OP_CMP_DWORD_EQ | OP_CMP_DWORD_NE => -2,
        OP_CMP_I32_GT | OP_CMP_U32_GT | OP_CMP_F32_GT => -1,
        OP_CMP_I64_GT | OP_CMP_U64_GT | OP_CMP_F64_GT => -2,
        OP_CMP_I32_LT | OP_CMP_U32_LT | OP_CMP_F32_LT => -1,
        OP_CMP_I64_LT | OP_CMP_U64_LT | OP_CMP_F64_LT => -2,
        OP_CMP_I32_GE | OP_CMP_U32_GE | OP_CMP_F32_GE => -1,
        OP_CMP_I64_GE | OP_CMP_U64_GE | OP_CMP_F64_GE => -2,
        OP_CMP_I32_LE | OP_CMP_U32_LE | OP_CMP_F32_LE => -1,
        OP_CMP_I64_LE | OP_CMP_U64_LE | OP_CMP_F64_LE => -2,
        OP_CMP_NOT => 0,
        OP_DUP_WORD | OP_DUP_WORD_X1 | OP_DUP_WORD_X2 => 1,
        OP_DUP_DWORD | OP_DUP_DWORD_X1 | OP_DUP_DWORD_X2 => 2,
        OP_SWAP_WORD | OP_SWAP_DWORD => 0,
        OP_LOAD_BYTE_0..=OP_LOAD_WORD => -1,
        OP_LOAD_DWORD => 0,
        OP_LOAD_WORDS => return None,
        OP_STORE_BYTE_0..=OP_STORE_WORD => -3,
        OP_STORE_DWORD => -4,
        OP_STORE_WORDS => return None,
        OP_LOAD_OFST_BYTE_0..=OP_LOAD_OFST_WORD => -1,
        OP_LOAD_OFST_DWORD => 0,
        OP_LOAD_OFST_WORDS => return None,
        OP_STORE_OFST_BYTE_0..=OP_STORE_OFST_WORD => -3,
        OP_STORE_OFST_DWORD => -4,
        OP_STORE_OFST_WORDS => return None,
        OP_LOAD_BUFF_BYTE_VAL | OP_LOAD_BUFF_HWORD_VAL | OP_LOAD_BUFF_WORD_VAL => -2,
        OP_LOAD_BUFF_DWORD_VAL => -1,
        OP_LOAD_BUFF_WORDS_VAL => return None,
        OP_LOAD_BUFF_BYTE_REF..=OP_LOAD_BUFF_WORDS_REF => -1,
        OP_STORE_BUFF_BYTE | OP_STORE_BUFF_HWORD | OP_STORE_BUFF_WORD => -4,
        OP_STORE_BUFF_DWORD => -5,
        OP_STORE_BUFF_WORDS => return None,
        OP_ALLOC => 1,
        OP_FREE => -2,
        OP_JMP => 0,
        OP_JMP_IF => -1,
        OP_CALL | OP_INDCALL | OP_SYSCALL | OP_RET => return None,
        _ => return None,
    };
    Some(delta)
}

/// Stack-slot delta of a syscall, or `None` for undefined numbers.
/// `SYS_EXIT` consumes its exit-code word but never returns to bytecode.
pub fn syscall_delta(sys: u8) -> Option<i32> {
    let delta = match sys {
        SYS_EXIT => -1,
        SYS_PRINT | SYS_PRINTI | SYS_PRINTF => -2,
        SYS_SCAN => -3,
        SYS_SCANI | SYS_SCANF => 2,
        SYS_MEMMOV | SYS_MEMCPY => -5,
        SYS_CLOCK => 2,
        SYS_SQRT32 | SYS_SQRT64 | SYS_EXP32 | SYS_EXP64 | SYS_LOG32 | SYS_LOG64 => 0,
        _ => return None,
    };
    Some(delta)
}

/// True for every opcode the dispatch table defines.
pub fn is_defined(op: u8) -> bool {
    operand_len(op).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_defined_opcode_has_an_operand_length() {
        for op in 1..=OP_MAX {
            if op == 0x12 {
                assert!(!is_defined(op));
                continue;
            }
            assert!(operand_len(op).is_some(), "opcode {op:#04x}");
        }
        assert_eq!(operand_len(0x00), None);
        assert_eq!(operand_len(OP_MAX + 1), None);
        assert_eq!(operand_len(0xFF), None);
    }

    #[test]
    fn variable_effect_opcodes_have_no_fixed_delta() {
        for op in [
            OP_PUSH_WORDS,
            OP_POP_WORDS,
            OP_LOAD_WORDS,
            OP_STORE_WORDS,
            OP_LOAD_OFST_WORDS,
            OP_STORE_OFST_WORDS,
            OP_LOAD_BUFF_WORDS_VAL,
            OP_STORE_BUFF_WORDS,
            OP_CALL,
            OP_INDCALL,
            OP_SYSCALL,
            OP_RET,
        ] {
            assert_eq!(stack_delta(op), None, "opcode {op:#04x}");
        }
        // Everything else defined has one.
        for op in 1..=OP_MAX {
            if is_defined(op) && stack_delta(op).is_none() {
                assert!(matches!(
                    op,
                    OP_PUSH_WORDS
                        | OP_POP_WORDS
                        | OP_LOAD_WORDS
                        | OP_STORE_WORDS
                        | OP_LOAD_OFST_WORDS
                        | OP_STORE_OFST_WORDS
                        | OP_LOAD_BUFF_WORDS_VAL
                        | OP_STORE_BUFF_WORDS
                        | OP_CALL
                        | OP_INDCALL
                        | OP_SYSCALL
                        | OP_RET
                ));
            }
        }
    }

    #[test]
    fn spot_check_deltas() {
        assert_eq!(stack_delta(OP_ADD_I32), Some(-1));
        assert_eq!(stack_delta(OP_ADD_F64), Some(-2));
        assert_eq!(stack_delta(OP_ALLOC), Some(1));
        assert_eq!(stack_delta(OP_STORE_BUFF_DWORD), Some(-5));
        assert_eq!(stack_delta(OP_I32_TO_I64), Some(1));
        assert_eq!(syscall_delta(SYS_MEMCPY), Some(-5));
        assert_eq!(syscall_delta(SYS_CLOCK), Some(2));
        assert_eq!(syscall_delta(SYS_MAX + 1), None);
    }
}
