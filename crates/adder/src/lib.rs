//! A stack-based bytecode virtual machine for a small Python-like scripting
//! language.
//!
//! The crate covers the execution engine: the object/type system, the
//! reference (l-value) system, call frames, the evaluation loop, callable
//! dispatch with generators, and exception unwinding. Source compilation is
//! an external collaborator behind the [`SourceCompiler`] trait; code objects
//! can also be assembled directly with [`CodeBuilder`].
//!
//! ```
//! use adder::{CodeBuilder, CompileMode, Opcode, Vm};
//!
//! let mut vm = Vm::new();
//! let mut b = CodeBuilder::new("<demo>", "<demo>", CompileMode::Eval);
//! let seven = b.add_const(vm.new_int(7));
//! b.emit_arg(Opcode::LoadConst, seven);
//! let code = std::rc::Rc::new(b.build());
//! let value = vm.run_code(&code, None).unwrap();
//! assert_eq!(value.int_value(), Some(7));
//! ```

#![expect(clippy::cast_possible_truncation, reason = "pool indices are bounded by the compiler")]
#![expect(clippy::cast_sign_loss, reason = "operand decoding reinterprets checked args")]
#![expect(clippy::cast_possible_wrap, reason = "hashing and id() reinterpret pointer bits")]

mod builder;
mod builtins;
mod code;
mod dict;
mod exception;
mod frame;
mod function;
mod intern;
mod io;
mod iter;
mod object;
mod refs;
mod resource;
mod tracer;
mod vm;

pub use crate::{
    builder::{CodeBuilder, JumpLabel},
    code::{
        BINARY_SPECIAL_METHODS, BITWISE_SPECIAL_METHODS, Block, BlockKind, Bytecode, CMP_SPECIAL_METHODS,
        CodeObject, CompileMode, NO_ARG, NameScope, Opcode,
    },
    exception::{ExcType, PyException, RunError, RunResult, StackFrame},
    function::{Args, Function, NativeFuncRaw},
    intern::Name,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::{PyObject, PyVar, Type},
    resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceLimits},
    tracer::{NoopTracer, OpcodeCountTracer, StderrTracer, VmTracer},
    vm::{CompileError, NativeTypeDesc, SourceCompiler, Vm},
};
