//! Module-file emission: the writer side of the binary format.
//!
//! [`ModuleFile`] collects pools, signatures and function definitions and
//! serializes them in section order. [`Asm`] is a small bytecode builder
//! with forward-reference labels, used to assemble branchy bodies without
//! hand-counting byte offsets. Both exist for the sample-project generator
//! and for tests; the VM itself only reads module files.

use crate::value::{DWord, Word};

struct FunctionDef {
    name: String,
    awc: u16,
    lwc: u16,
    swc: u16,
    rwc: u16,
    body: Vec<u8>,
}

/// Builder for one module file.
#[derive(Default)]
pub struct ModuleFile {
    words: Vec<Word>,
    dwords: Vec<DWord>,
    strings: Vec<String>,
    internal_globals: Vec<(String, u32)>,
    external_globals: Vec<String>,
    external_functions: Vec<String>,
    functions: Vec<FunctionDef>,
}

impl ModuleFile {
    pub fn new() -> Self {
        ModuleFile::default()
    }

    /// Adds a word constant; returns its pool index.
    pub fn word(&mut self, w: Word) -> u16 {
        self.words.push(w);
        self.words.len() as u16 - 1
    }

    pub fn dword(&mut self, d: DWord) -> u16 {
        self.dwords.push(d);
        self.dwords.len() as u16 - 1
    }

    pub fn string(&mut self, s: &str) -> u16 {
        self.strings.push(s.to_string());
        self.strings.len() as u16 - 1
    }

    /// Declares a global defined by this module. Returns its pool index;
    /// externals added later follow the internals.
    pub fn internal_global(&mut self, name: &str, size: u32) -> u16 {
        self.internal_globals.push((name.to_string(), size));
        self.internal_globals.len() as u16 - 1
    }

    /// References a global defined elsewhere, by full signature.
    pub fn external_global(&mut self, signature: &str) -> u16 {
        self.external_globals.push(signature.to_string());
        (self.internal_globals.len() + self.external_globals.len()) as u16 - 1
    }

    pub fn external_function(&mut self, signature: &str) -> u16 {
        self.external_functions.push(signature.to_string());
        (self.functions.len() + self.external_functions.len()) as u16 - 1
    }

    /// Defines a function. Returns its function-pool index; note that
    /// adding more internal functions shifts later external indices.
    pub fn function(
        &mut self,
        name: &str,
        awc: u16,
        lwc: u16,
        swc: u16,
        rwc: u16,
        body: Vec<u8>,
    ) -> u16 {
        self.functions.push(FunctionDef {
            name: name.to_string(),
            awc,
            lwc,
            swc,
            rwc,
            body,
        });
        self.functions.len() as u16 - 1
    }

    fn put_sigs(out: &mut Vec<u8>, internal: &[&str], external: &[String]) {
        let count = (internal.len() + external.len()) as u16;
        out.extend_from_slice(&count.to_le_bytes());
        for name in internal {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        if !external.is_empty() {
            out.extend_from_slice(b"&\0");
            for sig in external {
                out.extend_from_slice(sig.as_bytes());
                out.push(0);
            }
        }
    }

    /// Serializes the module in section order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(&(self.words.len() as u16).to_le_bytes());
        for w in &self.words {
            out.extend_from_slice(&w.0.to_le_bytes());
        }
        out.extend_from_slice(&(self.dwords.len() as u16).to_le_bytes());
        for d in &self.dwords {
            out.extend_from_slice(&d.0.to_le_bytes());
        }
        out.extend_from_slice(&(self.strings.len() as u16).to_le_bytes());
        for s in &self.strings {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }

        let glob_names: Vec<&str> = self.internal_globals.iter().map(|(n, _)| n.as_str()).collect();
        Self::put_sigs(&mut out, &glob_names, &self.external_globals);
        let func_names: Vec<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        Self::put_sigs(&mut out, &func_names, &self.external_functions);

        for (_, size) in &self.internal_globals {
            out.extend_from_slice(&size.to_le_bytes());
        }

        for f in &self.functions {
            let len = (8 + f.body.len()) as u32;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&f.awc.to_le_bytes());
            out.extend_from_slice(&f.lwc.to_le_bytes());
            out.extend_from_slice(&f.swc.to_le_bytes());
            out.extend_from_slice(&f.rwc.to_le_bytes());
            out.extend_from_slice(&f.body);
        }

        out
    }
}

/// A branch target. Bind it with [`Asm::bind`] before [`Asm::finish`].
#[derive(Copy, Clone)]
pub struct Label(usize);

const UNBOUND: usize = usize::MAX;

/// Bytecode builder with label patching for the two branch opcodes.
#[derive(Default)]
pub struct Asm {
    bytes: Vec<u8>,
    labels: Vec<usize>,
    patches: Vec<(usize, Label)>,
}

impl Asm {
    pub fn new() -> Self {
        Asm::default()
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(UNBOUND);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = self.bytes.len();
    }

    pub fn op(&mut self, op: u8) -> &mut Self {
        self.bytes.push(op);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.bytes.push(v as u8);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Emits a branch opcode with a label operand to patch at finish.
    pub fn branch(&mut self, op: u8, target: Label) -> &mut Self {
        self.bytes.push(op);
        self.patches.push((self.bytes.len(), target));
        self.bytes.extend_from_slice(&[0, 0]);
        self
    }

    /// Resolves every label patch and returns the body bytes.
    pub fn finish(self) -> Vec<u8> {
        let mut bytes = self.bytes;
        for (at, label) in self.patches {
            let target = self.labels[label.0];
            assert!(target != UNBOUND, "branch to unbound label");
            // Offsets are relative to the end of the branch instruction.
            let rel = target as i64 - (at as i64 + 2);
            bytes[at..at + 2].copy_from_slice(&(rel as i16).to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::*;

    #[test]
    fn labels_patch_forward_and_backward() {
        let mut a = Asm::new();
        let top = a.label();
        let done = a.label();
        a.bind(top);
        a.op(OP_PUSH_W0);
        a.branch(OP_JMP_IF, done);
        a.op(OP_PUSH_W1);
        a.branch(OP_JMP, top);
        a.bind(done);
        a.op(OP_RET);
        let bytes = a.finish();
        // jmp_if at 1..4 jumps to offset 8, rel = 8 - 4 = 4.
        assert_eq!(bytes[1], OP_JMP_IF);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 4);
        // jmp at 5..8 jumps to offset 0, rel = 0 - 8 = -8.
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), -8);
        assert_eq!(bytes[8], OP_RET);
    }

    #[test]
    fn encode_orders_sections() {
        let mut m = ModuleFile::new();
        m.string("hi");
        m.function("F", 0, 0, 0, 0, vec![OP_RET]);
        let bytes = m.encode();
        // word count 0, dword count 0, string count 1, "hi\0", 0 globals,
        // 1 func sig, "F\0", blob length 9, header, body.
        assert_eq!(&bytes[..6], &[0, 0, 0, 0, 1, 0]);
        assert_eq!(&bytes[6..9], b"hi\0");
        assert_eq!(&bytes[9..13], &[0, 0, 1, 0]);
        assert_eq!(&bytes[13..15], b"F\0");
        assert_eq!(&bytes[15..19], &9u32.to_le_bytes());
        assert_eq!(bytes[19 + 8], OP_RET);
    }
}
