//! The virtual machine.
//!
//! Owns the call stack, the type table, the module registries, the singleton
//! handles, and the injected I/O and tracing sinks. The execution driver
//! (`exec_frames`) runs the per-frame evaluation loop (`run.rs`) under the
//! three-way unwinding protection; raising writes an exception onto the
//! current frame and translates into control-flow markers that the driver
//! interprets.
//!
//! # Module structure
//!
//! - `run` — the bytecode evaluation loop
//! - `call` — callable dispatch, argument binding, generators, iterators
//! - `attr` — attribute resolution, coercions, hashing
//! - `dis` — disassembler

pub(crate) mod attr;
mod call;
mod dis;
mod run;

use std::{fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    builtins,
    code::{CodeObject, CompileMode},
    exception::{ExcType, PyException, RunError, RunResult},
    frame::Frame,
    function::{Args, NativeFunc, NativeFuncRaw},
    intern::{Interner, Name},
    io::{PrintWriter, StdPrint},
    object::{NameDict, Payload, PyObject, PyVar, Type},
    refs::Ref,
    resource::ResourceLimits,
    tracer::{NoopTracer, VmTracer},
};

/// External compiler interface: turns source text into a code object.
///
/// The VM calls this for `exec`, `eval`, and lazy module imports, passing
/// itself so the compiler can allocate constant-pool handles. Compile
/// failures surface to the host as `SyntaxError` summaries and bypass user
/// exception handlers.
pub trait SourceCompiler: fmt::Debug {
    fn compile(&self, vm: &Vm, source: &str, filename: &str, mode: CompileMode) -> Result<CodeObject, CompileError>;
}

/// A compilation failure reported by a [`SourceCompiler`].
#[derive(Debug, Clone)]
pub struct CompileError {
    pub msg: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

/// Descriptor for a host-registered type: its name and a callback that binds
/// its methods once the type object exists.
pub struct NativeTypeDesc {
    pub name: &'static str,
    pub register: fn(&mut Vm, module: &PyVar, ty: &PyVar),
}

/// The virtual machine. See the module docs for the overall shape.
#[derive(Debug)]
pub struct Vm {
    pub(crate) frames: Vec<Frame>,
    next_frame_id: u64,

    /// Built-in types by bare name.
    types: AHashMap<Name, PyVar>,
    /// Every type ever created, indexed by tag. Insertion-order stable.
    pub(crate) all_types: Vec<PyVar>,

    /// Loaded modules by name.
    modules: AHashMap<Name, PyVar>,
    /// Registered-but-unloaded module sources, compiled on first import.
    lazy_modules: AHashMap<Name, Rc<str>>,

    pub(crate) none: PyVar,
    pub(crate) true_: PyVar,
    pub(crate) false_: PyVar,
    pub(crate) ellipsis: PyVar,
    /// Sentinel returned through the loop when a call installed a tail frame.
    pub(crate) op_call: PyVar,
    /// Sentinel returned through the loop when a generator suspends.
    pub(crate) op_yield: PyVar,

    pub(crate) builtins: PyVar,
    main: PyVar,

    // Fast type tags, in table order.
    pub(crate) tp_object: Type,
    pub(crate) tp_type: Type,
    pub(crate) tp_bool: Type,
    pub(crate) tp_int: Type,
    pub(crate) tp_float: Type,
    pub(crate) tp_str: Type,
    pub(crate) tp_list: Type,
    pub(crate) tp_tuple: Type,
    pub(crate) tp_slice: Type,
    pub(crate) tp_range: Type,
    pub(crate) tp_module: Type,
    pub(crate) tp_ref: Type,
    pub(crate) tp_function: Type,
    pub(crate) tp_native_function: Type,
    pub(crate) tp_native_iterator: Type,
    pub(crate) tp_bound_method: Type,
    pub(crate) tp_super: Type,
    pub(crate) tp_exception: Type,
    /// Registered by the builtin library layer, after the fixed tags.
    pub(crate) tp_dict: Type,
    pub(crate) tp_set: Type,

    interner: Interner,
    limits: ResourceLimits,
    pub(crate) writer: Box<dyn PrintWriter>,
    pub(crate) tracer: Box<dyn VmTracer>,
    compiler: Option<Box<dyn SourceCompiler>>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// A VM writing to the process streams, with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_writer(Box::new(StdPrint))
    }

    /// A VM writing to the given sinks, with default limits.
    #[must_use]
    pub fn with_writer(writer: Box<dyn PrintWriter>) -> Self {
        Self::with_options(writer, ResourceLimits::default())
    }

    /// A VM with explicit sinks and limits.
    #[must_use]
    pub fn with_options(writer: Box<dyn PrintWriter>, limits: ResourceLimits) -> Self {
        let mut interner = Interner::new();
        let mut all_types: Vec<PyVar> = Vec::new();
        let mut types: AHashMap<Name, PyVar> = AHashMap::new();

        // Bootstrap: `object` and `type` reference each other, so their
        // objects are created by hand with the tags they will occupy.
        let object_ty = PyObject::new_with_attrs(Type(1), Payload::TypeIndex(Type(0)));
        let type_ty = PyObject::new_with_attrs(Type(1), Payload::TypeIndex(Type(1)));
        all_types.push(object_ty.clone());
        all_types.push(type_ty.clone());
        types.insert(interner.intern("object"), object_ty.clone());
        types.insert(interner.intern("type"), type_ty.clone());

        let mut add_type = |name: &str, interner: &mut Interner, all_types: &mut Vec<PyVar>, types: &mut AHashMap<Name, PyVar>| {
            let tag = Type(all_types.len() as u32);
            let obj = PyObject::new_with_attrs(Type(1), Payload::TypeIndex(tag));
            obj.set_own_attr(interner.intern("__base__"), all_types[0].clone());
            types.insert(interner.intern(name), obj.clone());
            all_types.push(obj);
            tag
        };

        let tp_bool = add_type("bool", &mut interner, &mut all_types, &mut types);
        let tp_int = add_type("int", &mut interner, &mut all_types, &mut types);
        let tp_float = add_type("float", &mut interner, &mut all_types, &mut types);
        let tp_str = add_type("str", &mut interner, &mut all_types, &mut types);
        let tp_list = add_type("list", &mut interner, &mut all_types, &mut types);
        let tp_tuple = add_type("tuple", &mut interner, &mut all_types, &mut types);
        let tp_slice = add_type("slice", &mut interner, &mut all_types, &mut types);
        let tp_range = add_type("range", &mut interner, &mut all_types, &mut types);
        let tp_module = add_type("module", &mut interner, &mut all_types, &mut types);
        let tp_ref = add_type("_ref", &mut interner, &mut all_types, &mut types);
        let tp_function = add_type("function", &mut interner, &mut all_types, &mut types);
        let tp_native_function = add_type("native_function", &mut interner, &mut all_types, &mut types);
        let tp_native_iterator = add_type("native_iterator", &mut interner, &mut all_types, &mut types);
        let tp_bound_method = add_type("bound_method", &mut interner, &mut all_types, &mut types);
        let tp_super = add_type("super", &mut interner, &mut all_types, &mut types);
        let tp_exception = add_type("Exception", &mut interner, &mut all_types, &mut types);
        let tp_none = add_type("NoneType", &mut interner, &mut all_types, &mut types);
        let tp_ellipsis = add_type("ellipsis", &mut interner, &mut all_types, &mut types);
        let tp_internal = add_type("_internal", &mut interner, &mut all_types, &mut types);

        let none = PyObject::new(tp_none, Payload::Dummy);
        let ellipsis = PyObject::new(tp_ellipsis, Payload::Dummy);
        let true_ = PyObject::new(tp_bool, Payload::Bool(true));
        let false_ = PyObject::new(tp_bool, Payload::Bool(false));
        let op_call = PyObject::new(tp_internal, Payload::Dummy);
        let op_yield = PyObject::new(tp_internal, Payload::Dummy);

        let builtins_mod = PyObject::new_with_attrs(tp_module, Payload::Dummy);
        builtins_mod.set_own_attr(interner.intern("__name__"), str_obj(tp_str, "builtins"));
        let main_mod = PyObject::new_with_attrs(tp_module, Payload::Dummy);
        main_mod.set_own_attr(interner.intern("__name__"), str_obj(tp_str, "__main__"));

        let mut modules = AHashMap::new();
        modules.insert(interner.intern("builtins"), builtins_mod.clone());
        modules.insert(interner.intern("__main__"), main_mod.clone());

        let mut vm = Self {
            frames: Vec::new(),
            next_frame_id: 1,
            types,
            all_types,
            modules,
            lazy_modules: AHashMap::new(),
            none,
            true_,
            false_,
            ellipsis,
            op_call,
            op_yield,
            builtins: builtins_mod,
            main: main_mod,
            tp_object: Type(0),
            tp_type: Type(1),
            tp_bool,
            tp_int,
            tp_float,
            tp_str,
            tp_list,
            tp_tuple,
            tp_slice,
            tp_range,
            tp_module,
            tp_ref,
            tp_function,
            tp_native_function,
            tp_native_iterator,
            tp_bound_method,
            tp_super,
            tp_exception,
            tp_dict: Type(0),
            tp_set: Type(0),
            interner,
            limits,
            writer,
            tracer: Box::new(NoopTracer),
            compiler: None,
        };

        // Close the inheritance roots: type derives object, object has no base.
        let object_ty = vm.type_object(vm.tp_object);
        let type_ty = vm.type_object(vm.tp_type);
        let base = vm.intern("__base__");
        type_ty.set_own_attr(base.clone(), object_ty.clone());
        object_ty.set_own_attr(base, vm.none.clone());

        // Name every built-in type.
        let name_key = vm.intern("__name__");
        let entries: Vec<(Name, PyVar)> = vm.types.iter().map(|(n, t)| (n.clone(), t.clone())).collect();
        for (name, ty) in entries {
            let name_obj = vm.new_str(&name);
            ty.set_own_attr(name_key.clone(), name_obj);
        }

        builtins::register(&mut vm);
        vm
    }

    /// Installs the compiler used by `exec`, `eval`, and lazy imports.
    pub fn set_compiler(&mut self, compiler: Box<dyn SourceCompiler>) {
        self.compiler = Some(compiler);
    }

    /// Installs an execution tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    /// Registers a module source to be compiled and executed on first import.
    pub fn add_lazy_module(&mut self, name: &str, source: &str) {
        let name = self.intern(name);
        self.lazy_modules.insert(name, Rc::from(source));
    }

    /// The `__main__` module.
    #[must_use]
    pub fn main_module(&self) -> PyVar {
        self.main.clone()
    }

    /// The `None` singleton.
    #[must_use]
    pub fn none(&self) -> PyVar {
        self.none.clone()
    }

    // ---------------------------------------------------------------- host entry

    /// Compiles and executes source against `module` (default `__main__`).
    ///
    /// On any raised exception or internal error, a summary goes to the error
    /// sink, the call stack is reset, and `None` is returned.
    pub fn exec(&mut self, source: &str, filename: &str, mode: CompileMode, module: Option<PyVar>) -> Option<PyVar> {
        match self.compile(source, filename, mode) {
            Ok(code) => self.run_code(&code, module),
            Err(err) => {
                self.report_failure(err);
                None
            }
        }
    }

    /// Executes an already-compiled code object with the `exec` contract.
    pub fn run_code(&mut self, code: &Rc<CodeObject>, module: Option<PyVar>) -> Option<PyVar> {
        let module = module.unwrap_or_else(|| self.main.clone());
        match self.exec_code(code.clone(), module, NameDict::default()) {
            Ok(value) => Some(value),
            Err(err) => {
                self.report_failure(err);
                None
            }
        }
    }

    /// Compiles source through the installed [`SourceCompiler`] and applies
    /// the negative-literal collapse pass.
    pub(crate) fn compile(&mut self, source: &str, filename: &str, mode: CompileMode) -> RunResult<Rc<CodeObject>> {
        if self.compiler.is_none() {
            return Err(RunError::Surface(PyException::new(
                Rc::from("SyntaxError"),
                "no compiler is configured".into(),
            )));
        }
        let compiled = {
            let compiler = self.compiler.as_deref().expect("checked above");
            compiler.compile(self, source, filename, mode)
        };
        let mut code = compiled
            .map_err(|e| RunError::Surface(PyException::new(Rc::from("SyntaxError"), e.to_string())))?;
        code.optimize(|value| match value.payload {
            Payload::Int(i) => Some(self.new_int(-i)),
            Payload::Float(f) => Some(self.new_float(-f)),
            _ => None,
        });
        Ok(Rc::new(code))
    }

    fn report_failure(&mut self, err: RunError) {
        match err {
            RunError::Surface(exc) => {
                let summary = exc.summary();
                self.writer.stderr_write(&summary);
                self.writer.stderr_write("\n");
            }
            RunError::Fatal(msg) => {
                self.writer
                    .stderr_write("An internal error occurred! It may be a bug, please report it!\n");
                self.writer.stderr_write(&msg);
                self.writer.stderr_write("\n");
            }
            RunError::Handled | RunError::Unhandled | RunError::ToBeRaised => {
                self.writer
                    .stderr_write("An internal error occurred! It may be a bug, please report it!\nan unwinding marker escaped the execution driver\n");
            }
        }
        self.frames.clear();
    }

    // ---------------------------------------------------------------- frames

    pub(crate) fn frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    /// Creates a frame, enforcing the recursion limit.
    pub(crate) fn new_frame(&mut self, co: Rc<CodeObject>, module: PyVar, locals: NameDict) -> RunResult<Frame> {
        if self.frames.len() >= self.limits.max_recursion_depth {
            return Err(self.raise_ty(ExcType::RecursionError, "maximum recursion depth exceeded"));
        }
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        Ok(Frame::new(id, co, module, locals))
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) {
        self.tracer.on_frame_push(&frame.co.name, self.frames.len() + 1);
        self.frames.push(frame);
    }

    pub(crate) fn pop_frame(&mut self) -> Frame {
        let frame = self.frames.pop().expect("no active frame");
        self.tracer.on_frame_pop(self.frames.len());
        frame
    }

    /// Pushes a fresh frame for `co` and drives it to completion.
    pub(crate) fn exec_code(&mut self, co: Rc<CodeObject>, module: PyVar, locals: NameDict) -> RunResult<PyVar> {
        let frame = self.new_frame(co, module, locals)?;
        self.push_frame(frame);
        self.exec_frames()
    }

    /// The execution driver: runs the top frame under the three-way
    /// unwinding protection until the frame that entered the driver returns.
    ///
    /// An exception raised in a nested call traverses exactly the frames this
    /// invocation owns; when unwinding reaches a frame owned by an enclosing
    /// invocation, the to-be-raised marker transfers the exception there.
    pub(crate) fn exec_frames(&mut self) -> RunResult<PyVar> {
        let base_id = self.frame().id;
        let mut need_raise = false;
        loop {
            if self.frame().id < base_id {
                return Err(RunError::Fatal("call stack shrank below the driving frame".into()));
            }
            let result = if need_raise {
                need_raise = false;
                Err(self.unwind())
            } else {
                self.run_frame()
            };
            match result {
                Ok(ret) => {
                    if Rc::ptr_eq(&ret, &self.op_yield) {
                        return Ok(ret);
                    }
                    if Rc::ptr_eq(&ret, &self.op_call) {
                        // A tail frame was installed; keep driving.
                        continue;
                    }
                    let finished = self.pop_frame();
                    if finished.id == base_id {
                        return Ok(ret);
                    }
                    self.frame_mut().push(ret);
                }
                Err(RunError::Handled) => {
                    // pc already points at the handler.
                }
                Err(RunError::Unhandled) => {
                    let exc_obj = self.frame_mut().pop();
                    let snapshot = self.frame().snapshot();
                    let Payload::Exception(exc) = &exc_obj.payload else {
                        return Err(RunError::Fatal("unwinding without an exception on the stack".into()));
                    };
                    exc.borrow_mut().trace_push(snapshot);
                    self.pop_frame();
                    if self.frames.is_empty() {
                        return Err(RunError::Surface(exc.borrow().clone()));
                    }
                    let below_base = self.frame().id < base_id;
                    self.frame_mut().push(exc_obj);
                    if below_base {
                        return Err(RunError::ToBeRaised);
                    }
                    need_raise = true;
                }
                Err(RunError::ToBeRaised) => need_raise = true,
                Err(other) => return Err(other),
            }
        }
    }

    // ---------------------------------------------------------------- raising

    /// Raises an exception by type-name: pushes it onto the current frame and
    /// starts unwinding. With an empty call stack the exception surfaces to
    /// the host directly.
    pub(crate) fn error(&mut self, type_name: &str, msg: String) -> RunError {
        self.tracer.on_raise(type_name, &msg);
        let name = self.intern(type_name);
        let exc = PyException::new(name, msg);
        if self.frames.is_empty() {
            return RunError::Surface(exc);
        }
        let obj = self.new_exception(exc);
        self.frame_mut().push(obj);
        self.unwind()
    }

    /// Transfers control to the innermost live handler of the current frame,
    /// or reports that unwinding must continue upward.
    pub(crate) fn unwind(&mut self) -> RunError {
        if self.frame_mut().jump_to_exception_handler() {
            RunError::Handled
        } else {
            RunError::Unhandled
        }
    }

    pub(crate) fn raise_ty(&mut self, ty: ExcType, msg: impl Into<String>) -> RunError {
        let name: &'static str = ty.into();
        self.error(name, msg.into())
    }

    pub(crate) fn type_error(&mut self, msg: impl Into<String>) -> RunError {
        self.raise_ty(ExcType::TypeError, msg)
    }

    pub(crate) fn value_error(&mut self, msg: impl Into<String>) -> RunError {
        self.raise_ty(ExcType::ValueError, msg)
    }

    pub(crate) fn index_error(&mut self, msg: impl Into<String>) -> RunError {
        self.raise_ty(ExcType::IndexError, msg)
    }

    pub(crate) fn import_error(&mut self, msg: impl Into<String>) -> RunError {
        self.raise_ty(ExcType::ImportError, msg)
    }

    pub(crate) fn name_error(&mut self, name: &str) -> RunError {
        self.raise_ty(ExcType::NameError, format!("name '{name}' is not defined"))
    }

    pub(crate) fn attribute_error(&mut self, obj: &PyVar, name: &str) -> RunError {
        let ty = self.obj_type_name(obj);
        self.raise_ty(ExcType::AttributeError, format!("type '{ty}' has no attribute '{name}'"))
    }

    pub(crate) fn zero_division_error(&mut self) -> RunError {
        self.raise_ty(ExcType::ZeroDivisionError, "division by zero")
    }

    // ---------------------------------------------------------------- stack access

    /// Pops the top of stack, resolving it if it is a reference.
    pub(crate) fn pop_value(&mut self) -> RunResult<PyVar> {
        let value = self.frame_mut().pop();
        self.deref(&value)
    }

    /// Resolves the top of stack without popping it.
    pub(crate) fn top_value(&mut self) -> RunResult<PyVar> {
        let value = self.frame().top().clone();
        self.deref(&value)
    }

    /// Resolves the handle `offset` slots below the top (1 = top).
    pub(crate) fn value_at(&mut self, offset: usize) -> RunResult<PyVar> {
        let value = self.frame().peek(offset).clone();
        self.deref(&value)
    }

    /// Pops `n` handles, resolves each, and returns them in push order.
    pub(crate) fn pop_n_values_reversed(&mut self, n: usize) -> RunResult<Args> {
        let mut items = self.frame_mut().pop_n_reversed(n);
        for item in &mut items {
            if item.as_ref_payload().is_some() {
                *item = self.deref(&item.clone())?;
            }
        }
        Ok(items)
    }

    /// Resolves `value` if it is a reference; otherwise clones the handle.
    pub(crate) fn deref(&mut self, value: &PyVar) -> RunResult<PyVar> {
        match &value.payload {
            Payload::Ref(r) => r.get(self),
            _ => Ok(value.clone()),
        }
    }

    /// Views `value` as an l-value, raising `TypeError` otherwise.
    pub(crate) fn as_lvalue<'a>(&mut self, value: &'a PyVar) -> RunResult<&'a Ref> {
        match value.as_ref_payload() {
            Some(r) => Ok(r),
            None => Err(self.type_error("expected an l-value")),
        }
    }

    // ---------------------------------------------------------------- globals

    pub(crate) fn globals_get(&self, name: &str) -> Option<PyVar> {
        self.frame().module.get_own_attr(name)
    }

    pub(crate) fn globals_set(&mut self, name: Name, value: PyVar) {
        self.frame().module.set_own_attr(name, value);
    }

    pub(crate) fn globals_del(&mut self, name: &str) -> bool {
        let module = self.frame().module.clone();
        let removed = module
            .attrs
            .as_ref()
            .expect("module without attribute map")
            .borrow_mut()
            .shift_remove(name);
        removed.is_some()
    }

    pub(crate) fn builtins(&self) -> &PyVar {
        &self.builtins
    }

    // ---------------------------------------------------------------- types & modules

    pub(crate) fn intern(&mut self, s: &str) -> Name {
        self.interner.intern(s)
    }

    /// The type object for a tag.
    pub(crate) fn type_object(&self, tag: Type) -> PyVar {
        self.all_types[tag.index()].clone()
    }

    /// The type object of a value.
    pub(crate) fn type_of(&self, obj: &PyVar) -> PyVar {
        self.type_object(obj.ty)
    }

    pub(crate) fn is_type(&self, obj: &PyVar, tag: Type) -> bool {
        obj.ty == tag
    }

    pub(crate) fn check_type(&mut self, obj: &PyVar, tag: Type) -> RunResult<()> {
        if self.is_type(obj, tag) {
            return Ok(());
        }
        let expected = self.tag_name(tag);
        let got = self.obj_type_name(obj);
        Err(self.type_error(format!("expected '{expected}', but got '{got}'")))
    }

    /// A built-in type object by bare name.
    pub(crate) fn type_by_name(&self, name: &str) -> Option<PyVar> {
        self.types.get(name).cloned()
    }

    /// Name stored on a type object (its `__name__` attribute).
    pub(crate) fn tag_name(&self, tag: Type) -> String {
        self.all_types[tag.index()]
            .get_own_attr("__name__")
            .and_then(|n| n.as_str().map(str::to_owned))
            .unwrap_or_else(|| "?".into())
    }

    pub(crate) fn obj_type_name(&self, obj: &PyVar) -> String {
        self.tag_name(obj.ty)
    }

    /// Creates a user-visible type object inside `module`.
    pub(crate) fn new_type_object(&mut self, module: &PyVar, name: &str, base: &PyVar) -> PyVar {
        debug_assert!(self.is_type(base, self.tp_type), "type base must be a type object");
        let tag = Type(self.all_types.len() as u32);
        let obj = PyObject::new_with_attrs(self.tp_type, Payload::TypeIndex(tag));
        let base_key = self.intern("__base__");
        obj.set_own_attr(base_key, base.clone());
        let name_obj = self.new_str(name);
        let name_key = self.intern("__name__");
        obj.set_own_attr(name_key, name_obj);
        let attr_name = self.intern(name);
        module.set_own_attr(attr_name, obj.clone());
        self.all_types.push(obj.clone());
        obj
    }

    /// Creates and registers an (eager) module object.
    pub fn new_module(&mut self, name: &str) -> PyVar {
        let module = PyObject::new_with_attrs(self.tp_module, Payload::Dummy);
        let name_obj = self.new_str(name);
        let name_key = self.intern("__name__");
        module.set_own_attr(name_key, name_obj);
        let reg_name = self.intern(name);
        self.modules.insert(reg_name, module.clone());
        module
    }

    /// Creates a type object from a native descriptor and runs its
    /// registration callback.
    pub fn register_type(&mut self, module: &PyVar, desc: &NativeTypeDesc) -> PyVar {
        let base = self.type_object(self.tp_object);
        let ty = self.new_type_object(module, desc.name, &base);
        (desc.register)(self, module, &ty);
        ty
    }

    /// `IMPORT_NAME`: eager hit, lazy compile-and-load, or `ImportError`.
    pub(crate) fn import_name(&mut self, name: &Name) -> RunResult<PyVar> {
        if let Some(module) = self.modules.get(&**name) {
            return Ok(module.clone());
        }
        let Some(source) = self.lazy_modules.get(&**name).cloned() else {
            return Err(self.import_error(format!("module '{name}' not found")));
        };
        let code = self.compile(&source, name, CompileMode::Exec)?;
        let module = self.new_module(name);
        self.exec_code(code, module.clone(), NameDict::default())?;
        self.lazy_modules.remove(&**name);
        Ok(module)
    }

    // ---------------------------------------------------------------- binder

    /// Binds a native function onto a module or type object.
    ///
    /// `argc >= 0` enforces that exact argument count; `-1` disables the
    /// check.
    pub fn bind_func(&mut self, target: &PyVar, name: &str, argc: i32, f: NativeFuncRaw) {
        let func = PyObject::new(self.tp_native_function, Payload::Native(NativeFunc::new(f, argc, false)));
        let key = self.intern(name);
        target.set_own_attr(key, func);
    }

    /// Binds a native method onto a type object; `self` does not count
    /// toward `argc`.
    pub fn bind_method(&mut self, target: &PyVar, name: &str, argc: i32, f: NativeFuncRaw) {
        debug_assert!(self.is_type(target, self.tp_type), "methods bind onto type objects");
        let func = PyObject::new(self.tp_native_function, Payload::Native(NativeFunc::new(f, argc, true)));
        let key = self.intern(name);
        target.set_own_attr(key, func);
    }

    // ---------------------------------------------------------------- constructors

    #[must_use]
    pub fn new_int(&self, value: i64) -> PyVar {
        PyObject::new(self.tp_int, Payload::Int(value))
    }

    #[must_use]
    pub fn new_float(&self, value: f64) -> PyVar {
        PyObject::new(self.tp_float, Payload::Float(value))
    }

    #[must_use]
    pub fn new_str(&self, value: &str) -> PyVar {
        PyObject::new(self.tp_str, Payload::Str(value.into()))
    }

    /// The shared `True`/`False` singleton for `value`.
    #[must_use]
    pub fn new_bool(&self, value: bool) -> PyVar {
        if value { self.true_.clone() } else { self.false_.clone() }
    }

    #[must_use]
    pub fn new_list(&self, items: Vec<PyVar>) -> PyVar {
        PyObject::new(self.tp_list, Payload::List(std::cell::RefCell::new(items)))
    }

    #[must_use]
    pub fn new_tuple(&self, items: Vec<PyVar>) -> PyVar {
        PyObject::new(self.tp_tuple, Payload::Tuple(items.into()))
    }

    /// Wraps a function descriptor; function objects carry an attribute map
    /// (for `__module__`).
    #[must_use]
    pub fn new_function(&self, function: crate::function::Function) -> PyVar {
        PyObject::new_with_attrs(self.tp_function, Payload::Function(Rc::new(function)))
    }

    pub(crate) fn new_exception(&self, exc: PyException) -> PyVar {
        PyObject::new(self.tp_exception, Payload::Exception(std::cell::RefCell::new(exc)))
    }

    pub(crate) fn new_ref(&self, r: Ref) -> PyVar {
        PyObject::new(self.tp_ref, Payload::Ref(r))
    }

    pub(crate) fn new_iter(&self, iter: crate::iter::PyIter) -> PyVar {
        PyObject::new(self.tp_native_iterator, Payload::Iter(std::cell::RefCell::new(iter)))
    }

    pub(crate) fn new_range(&self, range: crate::object::Range) -> PyVar {
        PyObject::new(self.tp_range, Payload::Range(range))
    }

    pub(crate) fn new_slice(&self, slice: crate::object::Slice) -> PyVar {
        PyObject::new(self.tp_slice, Payload::Slice(slice))
    }

    pub(crate) fn new_bound_method(&self, obj: PyVar, method: PyVar) -> PyVar {
        PyObject::new(
            self.tp_bound_method,
            Payload::BoundMethod(crate::object::BoundMethod { obj, method }),
        )
    }

    /// Allocates an instance of a user-visible type (payload-free, attrs
    /// only). Used by type-object calls without `__new__`.
    pub(crate) fn new_instance(&mut self, ty: &PyVar) -> RunResult<PyVar> {
        let Some(tag) = ty.type_payload() else {
            return Err(RunError::Fatal("instantiating a non-type object".into()));
        };
        Ok(PyObject::new_with_attrs(tag, Payload::Dummy))
    }
}

/// Standalone string-object constructor for bootstrap, before `Vm` exists.
fn str_obj(tp_str: Type, value: &str) -> PyVar {
    PyObject::new(tp_str, Payload::Str(value.into()))
}
