//! Callable descriptors: user functions and native functions.

use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    code::CodeObject,
    exception::RunResult,
    intern::Name,
    object::PyVar,
    vm::Vm,
};

/// Argument pack passed through the call dispatcher. Almost all calls carry
/// four or fewer arguments, so the pack lives on the stack.
pub type Args = SmallVec<[PyVar; 4]>;

/// Raw entry point of a native function.
///
/// Natives receive the VM (for allocation, raising, and re-entrant calls) and
/// the argument pack; for methods, `args[0]` is the bound receiver.
pub type NativeFuncRaw = fn(&mut Vm, &mut Args) -> RunResult<PyVar>;

/// A user-defined function: name, code, and parameter shape.
#[derive(Debug)]
pub struct Function {
    pub name: Name,
    pub code: Rc<CodeObject>,
    /// Positional parameter names, in declaration order.
    pub args: Vec<Name>,
    /// Keyword parameters with their default handles.
    pub kw_defaults: IndexMap<Name, PyVar, ahash::RandomState>,
    /// Keyword parameter names in declaration order; positional overflow may
    /// fill these left to right when no starred parameter exists.
    pub kw_order: Vec<Name>,
    /// Name of the `*rest` parameter, if declared.
    pub starred_arg: Option<Name>,
}

impl Function {
    /// A function with positional parameters only.
    #[must_use]
    pub fn new(name: Name, code: Rc<CodeObject>, args: Vec<Name>) -> Self {
        Self {
            name,
            code,
            args,
            kw_defaults: IndexMap::default(),
            kw_order: Vec::new(),
            starred_arg: None,
        }
    }

    /// Declares a keyword parameter with its default, after any previously
    /// declared ones.
    #[must_use]
    pub fn with_default(mut self, name: Name, value: PyVar) -> Self {
        self.kw_order.push(name.clone());
        self.kw_defaults.insert(name, value);
        self
    }

    /// Declares the `*rest` parameter.
    #[must_use]
    pub fn with_starred(mut self, name: Name) -> Self {
        self.starred_arg = Some(name);
        self
    }
}

/// A host function registered through the binder.
pub struct NativeFunc {
    pub(crate) f: NativeFuncRaw,
    /// Expected argument count; `-1` disables the check. `self` is not
    /// counted when the function is a method.
    pub(crate) argc: i32,
    pub(crate) method: bool,
}

impl fmt::Debug for NativeFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunc")
            .field("argc", &self.argc)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl NativeFunc {
    pub(crate) fn new(f: NativeFuncRaw, argc: i32, method: bool) -> Self {
        Self { f, argc, method }
    }

    /// Checks the arity contract and invokes the implementation.
    pub(crate) fn call(&self, vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
        let got = args.len() - usize::from(self.method);
        if self.argc >= 0 && got != self.argc as usize {
            return Err(vm.type_error(format!("expected {} arguments, but got {got}", self.argc)));
        }
        (self.f)(vm, args)
    }
}
