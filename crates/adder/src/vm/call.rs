//! Callable dispatch, argument binding, and iterator advancement.

use std::rc::Rc;

use crate::{
    exception::{RunError, RunResult},
    function::Args,
    intern::Name,
    iter::{GenState, Generator, IterKind, PyIter},
    object::{NameDict, Payload, PyVar},
    vm::Vm,
};

impl Vm {
    /// Invokes `callable` with positional `args` and flattened keyword pairs
    /// `kwargs` (`[name, value, name, value, …]`).
    ///
    /// With `op_call` set, a user-function call installs the new frame and
    /// returns the `op_call` sentinel instead of driving it; the evaluation
    /// loop forwards the sentinel so the enclosing driver continues in the
    /// new frame (a tail-into-new-frame).
    pub(crate) fn call(&mut self, callable: &PyVar, args: Args, kwargs: &Args, op_call: bool) -> RunResult<PyVar> {
        // Type object: construction.
        if self.is_type(callable, self.tp_type) {
            if let Some(new_fn) = callable.get_own_attr("__new__") {
                return self.call(&new_fn, args, kwargs, false);
            }
            let obj = self.new_instance(callable)?;
            if let Some(init_fn) = self.get_attr(&obj, "__init__", false)? {
                self.call(&init_fn, args, kwargs, false)?;
            }
            return Ok(obj);
        }

        // Bound method: unwrap and prepend the receiver.
        let mut callable = callable.clone();
        let mut args = args;
        while let Payload::BoundMethod(bm) = &callable.payload {
            args.insert(0, bm.obj.clone());
            let method = bm.method.clone();
            callable = method;
        }

        if let Payload::Native(_) = &callable.payload {
            if !kwargs.is_empty() {
                return Err(self.type_error("native_function does not accept keyword arguments"));
            }
            let Payload::Native(func) = &callable.payload else {
                unreachable!()
            };
            return func.call(self, &mut args);
        }

        if let Payload::Function(function) = &callable.payload {
            let function = function.clone();
            let locals = self.bind_arguments(&function, &args, kwargs)?;
            let module = callable
                .get_own_attr("__module__")
                .unwrap_or_else(|| self.frame().module.clone());
            let frame = self.new_frame(function.code.clone(), module, locals)?;
            if function.code.is_generator {
                // Generators never run eagerly: wrap the nascent frame.
                return Ok(self.new_iter(PyIter::new(IterKind::Generator(Generator::new(frame)))));
            }
            self.push_frame(frame);
            if op_call {
                return Ok(self.op_call.clone());
            }
            return self.exec_frames();
        }

        let ty = self.obj_type_name(&callable);
        Err(self.type_error(format!("'{ty}' object is not callable")))
    }

    /// Binds a user function's parameters: positionals left to right, then
    /// defaults, then the starred capture or positional overflow into keyword
    /// parameters, then explicit keyword arguments with duplicate and
    /// unknown-name rejection.
    fn bind_arguments(
        &mut self,
        function: &crate::function::Function,
        args: &Args,
        kwargs: &Args,
    ) -> RunResult<NameDict> {
        let mut locals = NameDict::default();
        let mut i = 0usize;
        for name in &function.args {
            if i < args.len() {
                locals.insert(name.clone(), args[i].clone());
                i += 1;
            } else {
                return Err(self.type_error(format!("missing positional argument '{name}'")));
            }
        }

        for (key, default) in &function.kw_defaults {
            locals.insert(key.clone(), default.clone());
        }

        let mut positional_overrides: Vec<Name> = Vec::new();
        if let Some(starred) = &function.starred_arg {
            let rest: Vec<PyVar> = args[i..].to_vec();
            let tuple = self.new_tuple(rest);
            locals.insert(starred.clone(), tuple);
        } else {
            for key in &function.kw_order {
                if i >= args.len() {
                    break;
                }
                locals.insert(key.clone(), args[i].clone());
                positional_overrides.push(key.clone());
                i += 1;
            }
            if i < args.len() {
                return Err(self.type_error("too many arguments"));
            }
        }

        for pair in kwargs.chunks(2) {
            let key = self.cast_str(&pair[0])?;
            if !function.kw_defaults.contains_key(key.as_str()) {
                return Err(self.type_error(format!(
                    "'{key}' is an invalid keyword argument for {}()",
                    function.name
                )));
            }
            if positional_overrides.iter().any(|n| **n == *key) {
                return Err(self.type_error(format!("multiple values for argument '{key}'")));
            }
            let name = self.intern(&key);
            locals.insert(name, pair[1].clone());
        }
        Ok(locals)
    }

    // ---------------------------------------------------------------- iterators

    /// Resolves `obj` to a native iterator: already one, or via `__iter__`.
    /// Returns `None` when the object has no iteration protocol.
    pub(crate) fn make_iterator(&mut self, obj: &PyVar) -> RunResult<Option<PyVar>> {
        if self.is_type(obj, self.tp_native_iterator) {
            return Ok(Some(obj.clone()));
        }
        if let Some(iter_fn) = self.get_attr(obj, "__iter__", false)? {
            let iter_obj = self.call(&iter_fn, Args::new(), &Args::new(), false)?;
            return Ok(Some(iter_obj));
        }
        Ok(None)
    }

    /// Advances an iterator; `None` means exhausted.
    pub(crate) fn iter_next(&mut self, iter_obj: &PyVar) -> RunResult<Option<PyVar>> {
        let Payload::Iter(cell) = &iter_obj.payload else {
            return Err(self.type_error("expected an iterator"));
        };
        let is_generator = matches!(cell.borrow().kind, IterKind::Generator(_));
        if is_generator {
            return self.generator_next(iter_obj);
        }
        let mut it = cell.borrow_mut();
        let next = match &mut it.kind {
            IterKind::Range(range_iter) => range_iter.step().map(|i| self.new_int(i)),
            IterKind::List { obj, index } => {
                let Payload::List(items) = &obj.payload else {
                    return Err(RunError::Fatal("list iterator over a non-list".into()));
                };
                let items = items.borrow();
                if *index < items.len() {
                    let value = items[*index].clone();
                    *index += 1;
                    Some(value)
                } else {
                    None
                }
            }
            IterKind::Tuple { obj, index } => {
                let Payload::Tuple(items) = &obj.payload else {
                    return Err(RunError::Fatal("tuple iterator over a non-tuple".into()));
                };
                if *index < items.len() {
                    let value = items[*index].clone();
                    *index += 1;
                    Some(value)
                } else {
                    None
                }
            }
            IterKind::Str { obj, offset } => {
                let Payload::Str(s) = &obj.payload else {
                    return Err(RunError::Fatal("str iterator over a non-str".into()));
                };
                match s[*offset..].chars().next() {
                    Some(c) => {
                        *offset += c.len_utf8();
                        Some(self.new_str(&c.to_string()))
                    }
                    None => None,
                }
            }
            IterKind::Generator(_) => unreachable!("generator handled above"),
        };
        Ok(next)
    }

    /// Resumes a generator: push its stored frame, drive, and either re-take
    /// the frame on yield or mark the generator exhausted. Once exhausted
    /// (normal return or unhandled exception), every later resume reports no
    /// value.
    fn generator_next(&mut self, iter_obj: &PyVar) -> RunResult<Option<PyVar>> {
        let Payload::Iter(cell) = &iter_obj.payload else {
            unreachable!("checked by iter_next")
        };
        let frame = {
            let mut it = cell.borrow_mut();
            let IterKind::Generator(generator) = &mut it.kind else {
                unreachable!("checked by iter_next")
            };
            if generator.state == GenState::Exhausted {
                return Ok(None);
            }
            // An empty slot means the generator is resuming itself; report
            // exhaustion rather than running a frame that does not exist.
            match generator.frame.take() {
                Some(frame) => frame,
                None => return Ok(None),
            }
        };
        self.push_frame(frame);
        let result = self.exec_frames();

        let mark_exhausted = |cell: &std::cell::RefCell<PyIter>| {
            let mut it = cell.borrow_mut();
            if let IterKind::Generator(generator) = &mut it.kind {
                generator.state = GenState::Exhausted;
            }
        };

        match result {
            Ok(ret) if Rc::ptr_eq(&ret, &self.op_yield) => {
                // The yielded value sits on the suspended frame's stack.
                let value = self.pop_value()?;
                let frame = self.pop_frame();
                let mut it = cell.borrow_mut();
                let IterKind::Generator(generator) = &mut it.kind else {
                    unreachable!()
                };
                generator.frame = Some(frame);
                generator.state = GenState::Suspended;
                Ok(Some(value))
            }
            Ok(_) => {
                mark_exhausted(cell);
                Ok(None)
            }
            Err(err) => {
                mark_exhausted(cell);
                Err(err)
            }
        }
    }
}
