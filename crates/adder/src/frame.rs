//! Activation records.
//!
//! A frame owns the value stack, locals, and try-block stack for one call to
//! a code object. Frames normally live on the VM's call stack; a suspended
//! generator owns its frame and moves it back onto the call stack for each
//! resumption, so the frame is a plain movable value with no back-pointers.

use smallvec::SmallVec;
use std::rc::Rc;

use crate::{
    code::{Bytecode, CodeObject},
    exception::StackFrame,
    function::Args,
    object::{NameDict, PyVar},
};

/// An active try block: the block table index and the value-stack depth at
/// entry, restored when the handler is entered or the block is left by a
/// block-safe jump.
#[derive(Debug, Clone, Copy)]
struct TryEntry {
    block: u16,
    depth: usize,
}

/// Activation record for one call to a code object.
#[derive(Debug)]
pub(crate) struct Frame {
    /// Strictly monotonic id assigned at construction; the unwinding driver
    /// uses it to recognise frames owned by enclosing driver invocations.
    pub id: u64,
    pub co: Rc<CodeObject>,
    /// The module whose attribute map serves as the global namespace.
    pub module: PyVar,
    pub locals: NameDict,
    pub pc: usize,
    stack: Vec<PyVar>,
    try_blocks: SmallVec<[TryEntry; 4]>,
}

impl Frame {
    pub fn new(id: u64, co: Rc<CodeObject>, module: PyVar, locals: NameDict) -> Self {
        Self {
            id,
            co,
            module,
            locals,
            pc: 0,
            stack: Vec::new(),
            try_blocks: SmallVec::new(),
        }
    }

    pub fn has_next_bytecode(&self) -> bool {
        self.pc < self.co.codes.len()
    }

    pub fn next_bytecode(&mut self) -> Bytecode {
        let byte = self.co.codes[self.pc];
        self.pc += 1;
        byte
    }

    pub fn push(&mut self, value: PyVar) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> PyVar {
        self.stack.pop().expect("value stack underflow")
    }

    pub fn top(&self) -> &PyVar {
        self.stack.last().expect("value stack underflow")
    }

    pub fn set_top(&mut self, value: PyVar) {
        *self.stack.last_mut().expect("value stack underflow") = value;
    }

    /// Handle at `offset` slots below the top (1 = top).
    pub fn peek(&self, offset: usize) -> &PyVar {
        &self.stack[self.stack.len() - offset]
    }

    /// Pops `n` handles and returns them in original push order, without
    /// resolving references.
    pub fn pop_n_reversed(&mut self, n: usize) -> Args {
        let split = self.stack.len() - n;
        self.stack.drain(split..).collect()
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Unchecked jump; only valid within the current block.
    pub fn jump_abs(&mut self, pc: usize) {
        self.pc = pc;
    }

    /// Jump that may leave blocks: pops try-block entries whose block no
    /// longer contains the destination, truncating the value stack back to
    /// the depth recorded when each popped entry was entered.
    pub fn jump_abs_safe(&mut self, pc: usize) {
        while let Some(entry) = self.try_blocks.last().copied() {
            if self.co.blocks[entry.block as usize].contains(pc) {
                break;
            }
            self.stack.truncate(entry.depth);
            self.try_blocks.pop();
        }
        self.pc = pc;
    }

    pub fn on_try_block_enter(&mut self, block: u16) {
        self.try_blocks.push(TryEntry {
            block,
            depth: self.stack.len(),
        });
    }

    pub fn on_try_block_exit(&mut self) {
        self.try_blocks.pop();
    }

    /// Transfers control to the innermost live exception handler.
    ///
    /// The exception in flight sits on top of the stack. On success the stack
    /// is truncated to the handler's recorded depth, the exception is pushed
    /// back as the handler's single input, and the pc is set to the handler
    /// target (the try block's end). Returns false when no handler is live.
    pub fn jump_to_exception_handler(&mut self) -> bool {
        let Some(entry) = self.try_blocks.pop() else {
            return false;
        };
        let exc = self.pop();
        self.stack.truncate(entry.depth);
        self.push(exc);
        self.pc = self.co.blocks[entry.block as usize].end;
        true
    }

    /// Traceback entry for the instruction most recently dispatched.
    pub fn snapshot(&self) -> StackFrame {
        let line = self.co.codes.get(self.pc.saturating_sub(1)).map_or(0, |b| b.line);
        StackFrame {
            file: self.co.filename.clone(),
            line,
            name: self.co.name.clone(),
        }
    }
}
