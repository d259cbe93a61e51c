//! Compiled code objects.
//!
//! A [`CodeObject`] is the immutable unit the VM executes: a bytecode
//! sequence plus its constant pool, name pool, block table, and label table.
//! Code objects are produced by an external compiler (see
//! [`SourceCompiler`](crate::vm::SourceCompiler)) or assembled directly with
//! [`CodeBuilder`](crate::builder::CodeBuilder).

use ahash::AHashMap;
use strum::{Display, FromRepr, IntoStaticStr};

use crate::{intern::Name, object::PyVar};

/// One opcode of the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    NoOp,
    LoadConst,
    LoadLambda,
    LoadNameRef,
    LoadName,
    StoreName,
    BuildAttr,
    BuildIndex,
    StoreRef,
    DeleteRef,
    BuildSmartTuple,
    BuildString,
    LoadEvalFn,
    ListAppend,
    StoreFunction,
    BuildClass,
    ReturnValue,
    PrintExpr,
    PopTop,
    BinaryOp,
    CompareOp,
    BitwiseOp,
    IsOp,
    ContainsOp,
    UnaryNegative,
    UnaryNot,
    PopJumpIfFalse,
    LoadNone,
    LoadTrue,
    LoadFalse,
    LoadEllipsis,
    Assert,
    ExceptionMatch,
    Raise,
    ReRaise,
    BuildList,
    BuildMap,
    BuildSet,
    DupTop,
    Call,
    JumpAbsolute,
    SafeJumpAbsolute,
    Goto,
    GetIter,
    ForIter,
    LoopContinue,
    LoopBreak,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    BuildSlice,
    ImportName,
    YieldValue,
    WithEnter,
    WithExit,
    TryBlockEnter,
    TryBlockExit,
}

/// Special-method names dispatched by `BINARY_OP`, indexed by its arg.
pub const BINARY_SPECIAL_METHODS: &[&str] = &[
    "__add__",
    "__sub__",
    "__mul__",
    "__truediv__",
    "__floordiv__",
    "__mod__",
    "__pow__",
];

/// Special-method names dispatched by `BITWISE_OP`, indexed by its arg.
pub const BITWISE_SPECIAL_METHODS: &[&str] = &["__lshift__", "__rshift__", "__and__", "__or__", "__xor__"];

/// Special-method names dispatched by `COMPARE_OP`, indexed by its arg.
pub const CMP_SPECIAL_METHODS: &[&str] = &["__lt__", "__le__", "__eq__", "__ne__", "__gt__", "__ge__"];

/// Placeholder for "no operand"; the disassembler blanks it.
pub const NO_ARG: i32 = -1;

/// One decoded instruction.
#[derive(Debug, Clone, Copy)]
pub struct Bytecode {
    pub op: Opcode,
    pub arg: i32,
    /// Source line, for tracebacks and the disassembler.
    pub line: u32,
    /// Index of the enclosing block in the code object's block table.
    pub block: u16,
}

/// What kind of lexical region a block delimits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BlockKind {
    Code,
    For,
    While,
    Try,
    With,
}

/// A lexical region (loop, try, with) used to scope block-safe jumps.
///
/// `start..end` is the half-open pc range the block covers; for loops the
/// start is the continue target and the end is the break target, for try
/// blocks the end is the handler target.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub kind: BlockKind,
    pub parent: Option<u16>,
    pub start: usize,
    pub end: usize,
}

impl Block {
    pub(crate) fn contains(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }

    /// Short descriptor appended to each disassembled instruction.
    pub(crate) fn describe(&self) -> String {
        format!("[{} {}..{}]", self.kind, self.start, self.end)
    }
}

/// How a source unit was compiled, which fixes the termination contract of
/// the evaluation loop: `Exec` leaves an empty stack and yields `None`,
/// `Eval`/`Json` leave exactly one value and yield it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    Exec,
    Eval,
    Json,
}

/// Scope tag attached to each pooled name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    Local,
    Global,
    Attr,
    Special,
}

/// An immutable compiled unit.
#[derive(Debug)]
pub struct CodeObject {
    pub name: Name,
    pub filename: Name,
    pub mode: CompileMode,
    pub codes: Vec<Bytecode>,
    pub consts: Vec<PyVar>,
    pub names: Vec<(Name, NameScope)>,
    pub blocks: Vec<Block>,
    pub labels: AHashMap<Name, usize>,
    pub is_generator: bool,
}

impl CodeObject {
    /// Collapses `LOAD_CONST k; UNARY_NEGATIVE` pairs emitted for negative
    /// literals: the negation becomes `NO_OP` and the pooled constant is
    /// negated in place. Non-numeric constants are left untouched.
    pub(crate) fn optimize(&mut self, mut negate: impl FnMut(&PyVar) -> Option<PyVar>) {
        for i in 1..self.codes.len() {
            if self.codes[i].op == Opcode::UnaryNegative && self.codes[i - 1].op == Opcode::LoadConst {
                let pos = self.codes[i - 1].arg as usize;
                if let Some(negated) = negate(&self.consts[pos]) {
                    self.codes[i].op = Opcode::NoOp;
                    self.consts[pos] = negated;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_names_render_screaming_snake() {
        assert_eq!(Opcode::LoadConst.to_string(), "LOAD_CONST");
        assert_eq!(Opcode::BuildSmartTuple.to_string(), "BUILD_SMART_TUPLE");
        assert_eq!(Opcode::PopJumpIfFalse.to_string(), "POP_JUMP_IF_FALSE");
    }

    #[test]
    fn block_contains_is_half_open() {
        let b = Block {
            kind: BlockKind::For,
            parent: None,
            start: 2,
            end: 6,
        };
        assert!(!b.contains(1));
        assert!(b.contains(2));
        assert!(b.contains(5));
        assert!(!b.contains(6));
    }
}
