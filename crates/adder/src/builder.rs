//! Builder for assembling code objects.
//!
//! `CodeBuilder` is the emission backend for compiler frontends and the way
//! tests construct bytecode directly: emit opcodes, pool constants and names,
//! open and close blocks, and patch forward jumps once targets are known.

use ahash::AHashMap;

use crate::{
    code::{Block, BlockKind, Bytecode, CodeObject, CompileMode, NO_ARG, NameScope, Opcode},
    intern::{Interner, Name},
    object::PyVar,
};

/// Label for a forward jump that needs patching.
///
/// Stores the instruction index whose arg receives the target. Pass it to
/// `patch_jump()` once the destination has been emitted.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

/// Emit-and-patch assembler for [`CodeObject`]s.
#[derive(Debug)]
pub struct CodeBuilder {
    name: Name,
    filename: Name,
    mode: CompileMode,
    is_generator: bool,
    codes: Vec<Bytecode>,
    consts: Vec<PyVar>,
    names: Vec<(Name, NameScope)>,
    blocks: Vec<Block>,
    labels: AHashMap<Name, usize>,
    interner: Interner,
    current_line: u32,
    current_block: u16,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: &str, filename: &str, mode: CompileMode) -> Self {
        let mut interner = Interner::new();
        let name = interner.intern(name);
        let filename = interner.intern(filename);
        Self {
            name,
            filename,
            mode,
            is_generator: false,
            codes: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            blocks: vec![Block {
                kind: BlockKind::Code,
                parent: None,
                start: 0,
                end: usize::MAX,
            }],
            labels: AHashMap::new(),
            interner,
            current_line: 1,
            current_block: 0,
        }
    }

    /// Marks the unit as a generator; calling it creates a suspended iterator
    /// instead of running the body.
    pub fn set_generator(&mut self) {
        self.is_generator = true;
    }

    /// Sets the source line recorded on subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Index the next emitted instruction will get.
    #[must_use]
    pub fn current_pc(&self) -> usize {
        self.codes.len()
    }

    /// Emits an instruction without an operand; returns its index.
    pub fn emit(&mut self, op: Opcode) -> usize {
        self.emit_arg(op, NO_ARG)
    }

    /// Emits an instruction with an operand; returns its index.
    pub fn emit_arg(&mut self, op: Opcode, arg: i32) -> usize {
        self.codes.push(Bytecode {
            op,
            arg,
            line: self.current_line,
            block: self.current_block,
        });
        self.codes.len() - 1
    }

    /// Pools a constant and returns its index.
    pub fn add_const(&mut self, value: PyVar) -> i32 {
        self.consts.push(value);
        (self.consts.len() - 1) as i32
    }

    /// Pools a `(name, scope)` pair, deduplicating, and returns its index.
    pub fn add_name(&mut self, name: &str, scope: NameScope) -> i32 {
        if let Some(idx) = self
            .names
            .iter()
            .position(|(n, s)| &**n == name && *s == scope)
        {
            return idx as i32;
        }
        let name = self.interner.intern(name);
        self.names.push((name, scope));
        (self.names.len() - 1) as i32
    }

    /// Records a `goto` label at the current pc.
    pub fn add_label(&mut self, name: &str) {
        let name = self.interner.intern(name);
        self.labels.insert(name, self.codes.len());
    }

    /// Opens a nested block starting at the current pc; subsequently emitted
    /// instructions belong to it. Returns the block index.
    pub fn enter_block(&mut self, kind: BlockKind) -> u16 {
        let idx = self.blocks.len() as u16;
        self.blocks.push(Block {
            kind,
            parent: Some(self.current_block),
            start: self.codes.len(),
            end: usize::MAX,
        });
        self.current_block = idx;
        idx
    }

    /// Closes the current block at the current pc and returns to its parent.
    pub fn exit_block(&mut self) {
        let idx = self.current_block as usize;
        self.blocks[idx].end = self.codes.len();
        self.current_block = self.blocks[idx].parent.expect("exit_block on the root block");
    }

    /// Emits a jump whose target is not yet known.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        JumpLabel(self.emit_arg(op, NO_ARG))
    }

    /// Points a previously emitted jump at the current pc.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        self.codes[label.0].arg = self.codes.len() as i32;
    }

    /// Finalises the unit. Any block left open (including the root) is closed
    /// at the final pc.
    #[must_use]
    pub fn build(mut self) -> CodeObject {
        let end = self.codes.len();
        for block in &mut self.blocks {
            if block.end == usize::MAX {
                block.end = end;
            }
        }
        CodeObject {
            name: self.name,
            filename: self.filename,
            mode: self.mode,
            codes: self.codes,
            consts: self.consts,
            names: self.names,
            blocks: self.blocks,
            labels: self.labels,
            is_generator: self.is_generator,
        }
    }
}
