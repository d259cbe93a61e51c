//! The evaluation loop.
//!
//! `run_frame` interprets bytecode within the current top frame. It returns
//! the frame's result value, or one of the two sentinels: `op_call` after a
//! user-function call installed a tail frame, `op_yield` when a generator
//! suspends. Raising returns the unwinding marker produced by the raise path.

use std::rc::Rc;

use smallvec::smallvec;

use crate::{
    code::{BINARY_SPECIAL_METHODS, BITWISE_SPECIAL_METHODS, CMP_SPECIAL_METHODS, CompileMode, Opcode},
    exception::{ExcType, RunError, RunResult},
    function::Args,
    object::{Payload, PyVar, Slice},
    refs::{AttrRef, IndexRef, NameRef, Ref, TupleRef},
    vm::Vm,
};

impl Vm {
    pub(crate) fn run_frame(&mut self) -> RunResult<PyVar> {
        loop {
            if !self.frame().has_next_bytecode() {
                break;
            }
            let pc = self.frame().pc;
            let byte = self.frame_mut().next_bytecode();
            let stack_depth = self.frame().stack_size();
            let frame_depth = self.frames.len();
            self.tracer.on_instruction(pc, byte.op, stack_depth, frame_depth);

            match byte.op {
                Opcode::NoOp => {}
                Opcode::LoadConst => {
                    let value = self.frame().co.consts[byte.arg as usize].clone();
                    self.frame_mut().push(value);
                }
                Opcode::LoadLambda => {
                    let obj = self.frame().co.consts[byte.arg as usize].clone();
                    let module = self.frame().module.clone();
                    self.set_attr(&obj, "__module__", module)?;
                    self.frame_mut().push(obj);
                }
                Opcode::LoadNameRef => {
                    let (name, scope) = self.frame().co.names[byte.arg as usize].clone();
                    let r = self.new_ref(Ref::Name(NameRef { name, scope }));
                    self.frame_mut().push(r);
                }
                Opcode::LoadName => {
                    let (name, scope) = self.frame().co.names[byte.arg as usize].clone();
                    let value = NameRef { name, scope }.get(self)?;
                    self.frame_mut().push(value);
                }
                Opcode::StoreName => {
                    let value = self.pop_value()?;
                    let (name, scope) = self.frame().co.names[byte.arg as usize].clone();
                    NameRef { name, scope }.set(self, value)?;
                }
                Opcode::BuildAttr => {
                    let idx = (byte.arg >> 1) as usize;
                    let rvalue = byte.arg & 1 == 1;
                    let (name, scope) = self.frame().co.names[idx].clone();
                    let obj = self.pop_value()?;
                    let r = Ref::Attr(AttrRef {
                        obj,
                        attr: NameRef { name, scope },
                    });
                    if rvalue {
                        let value = r.get(self)?;
                        self.frame_mut().push(value);
                    } else {
                        let r = self.new_ref(r);
                        self.frame_mut().push(r);
                    }
                }
                Opcode::BuildIndex => {
                    let index = self.pop_value()?;
                    let obj = self.pop_value()?;
                    let r = Ref::Index(IndexRef { obj, index });
                    if byte.arg == 0 {
                        let r = self.new_ref(r);
                        self.frame_mut().push(r);
                    } else {
                        let value = r.get(self)?;
                        self.frame_mut().push(value);
                    }
                }
                Opcode::StoreRef => {
                    let value = self.pop_value()?;
                    let ref_obj = self.frame_mut().pop();
                    let r = self.as_lvalue(&ref_obj)?;
                    r.set(self, value)?;
                }
                Opcode::DeleteRef => {
                    let ref_obj = self.frame_mut().pop();
                    let r = self.as_lvalue(&ref_obj)?;
                    r.del(self)?;
                }
                Opcode::BuildSmartTuple => {
                    let items = self.frame_mut().pop_n_reversed(byte.arg as usize);
                    if items.iter().all(|v| v.as_ref_payload().is_some()) {
                        let r = self.new_ref(Ref::Tuple(TupleRef { items: items.to_vec() }));
                        self.frame_mut().push(r);
                    } else {
                        let mut values = Vec::with_capacity(items.len());
                        for item in &items {
                            values.push(self.deref(item)?);
                        }
                        let tuple = self.new_tuple(values);
                        self.frame_mut().push(tuple);
                    }
                }
                Opcode::BuildString => {
                    let items = self.pop_n_values_reversed(byte.arg as usize)?;
                    let mut out = String::new();
                    for item in &items {
                        out.push_str(&self.str_of(item)?);
                    }
                    let s = self.new_str(&out);
                    self.frame_mut().push(s);
                }
                Opcode::LoadEvalFn => {
                    let Some(eval_fn) = self.builtins.get_own_attr("eval") else {
                        return Err(RunError::Fatal("builtins.eval is not registered".into()));
                    };
                    self.frame_mut().push(eval_fn);
                }
                Opcode::ListAppend => {
                    let value = self.pop_value()?;
                    let list = self.value_at(2)?;
                    self.fast_call("append", smallvec![list, value])?;
                }
                Opcode::StoreFunction => {
                    let obj = self.pop_value()?;
                    let Payload::Function(function) = &obj.payload else {
                        return Err(RunError::Fatal("STORE_FUNCTION on a non-function".into()));
                    };
                    let name = function.name.clone();
                    let module = self.frame().module.clone();
                    self.set_attr(&obj, "__module__", module)?;
                    self.globals_set(name, obj.clone());
                }
                Opcode::BuildClass => {
                    let name = self.frame().co.names[byte.arg as usize].0.clone();
                    let mut base = self.pop_value()?;
                    if Rc::ptr_eq(&base, &self.none) {
                        base = self.type_object(self.tp_object);
                    }
                    self.check_type(&base, self.tp_type)?;
                    let module = self.frame().module.clone();
                    let cls = self.new_type_object(&module, &name, &base);
                    loop {
                        let func = self.pop_value()?;
                        if Rc::ptr_eq(&func, &self.none) {
                            break;
                        }
                        let Payload::Function(function) = &func.payload else {
                            return Err(RunError::Fatal("class body produced a non-function".into()));
                        };
                        let fname = function.name.clone();
                        self.set_attr(&func, "__module__", module.clone())?;
                        self.set_attr(&cls, &fname, func.clone())?;
                    }
                }
                Opcode::ReturnValue => return self.pop_value(),
                Opcode::PrintExpr => {
                    let value = self.top_value()?;
                    if !Rc::ptr_eq(&value, &self.none) {
                        let repr = self.repr_of(&value)?;
                        self.writer.stdout_write(&repr);
                        self.writer.stdout_write("\n");
                    }
                }
                Opcode::PopTop => {
                    self.frame_mut().pop();
                }
                Opcode::BinaryOp => {
                    let method = special_method(BINARY_SPECIAL_METHODS, byte.arg)?;
                    let rhs = self.pop_value()?;
                    let lhs = self.pop_value()?;
                    let result = self.fast_call(method, smallvec![lhs, rhs])?;
                    self.frame_mut().push(result);
                }
                Opcode::CompareOp => {
                    let method = special_method(CMP_SPECIAL_METHODS, byte.arg)?;
                    let rhs = self.pop_value()?;
                    let lhs = self.pop_value()?;
                    let result = self.fast_call(method, smallvec![lhs, rhs])?;
                    self.frame_mut().push(result);
                }
                Opcode::BitwiseOp => {
                    let method = special_method(BITWISE_SPECIAL_METHODS, byte.arg)?;
                    let operands = self.pop_n_values_reversed(2)?;
                    let result = self.fast_call(method, operands)?;
                    self.frame_mut().push(result);
                }
                Opcode::IsOp => {
                    let rhs = self.pop_value()?;
                    let lhs = self.pop_value()?;
                    let mut identical = Rc::ptr_eq(&lhs, &rhs);
                    if byte.arg == 1 {
                        identical = !identical;
                    }
                    let b = self.new_bool(identical);
                    self.frame_mut().push(b);
                }
                Opcode::ContainsOp => {
                    let rhs = self.pop_value()?;
                    let lhs = self.pop_value()?;
                    let ret = self.call_method(&rhs, "__contains__", smallvec![lhs])?;
                    let mut contained = self.is_truthy(&ret)?;
                    if byte.arg == 1 {
                        contained = !contained;
                    }
                    let b = self.new_bool(contained);
                    self.frame_mut().push(b);
                }
                Opcode::UnaryNegative => {
                    let value = self.pop_value()?;
                    let negated = self.num_negated(&value)?;
                    self.frame_mut().push(negated);
                }
                Opcode::UnaryNot => {
                    let value = self.pop_value()?;
                    let truthy = self.is_truthy(&value)?;
                    let b = self.new_bool(!truthy);
                    self.frame_mut().push(b);
                }
                Opcode::PopJumpIfFalse => {
                    let value = self.pop_value()?;
                    if !self.is_truthy(&value)? {
                        self.frame_mut().jump_abs(byte.arg as usize);
                    }
                }
                Opcode::LoadNone => {
                    let v = self.none.clone();
                    self.frame_mut().push(v);
                }
                Opcode::LoadTrue => {
                    let v = self.true_.clone();
                    self.frame_mut().push(v);
                }
                Opcode::LoadFalse => {
                    let v = self.false_.clone();
                    self.frame_mut().push(v);
                }
                Opcode::LoadEllipsis => {
                    let v = self.ellipsis.clone();
                    self.frame_mut().push(v);
                }
                Opcode::Assert => {
                    let msg_obj = self.pop_value()?;
                    let msg = self.str_of(&msg_obj)?;
                    let pred = self.pop_value()?;
                    if !self.is_truthy(&pred)? {
                        return Err(self.raise_ty(ExcType::AssertionError, msg));
                    }
                }
                Opcode::ExceptionMatch => {
                    let top = self.frame().top().clone();
                    let Payload::Exception(exc) = &top.payload else {
                        return Err(RunError::Fatal("EXCEPTION_MATCH without an exception on the stack".into()));
                    };
                    let name = self.frame().co.names[byte.arg as usize].0.clone();
                    let matched = exc.borrow().match_type(&name);
                    let b = self.new_bool(matched);
                    self.frame_mut().push(b);
                }
                Opcode::Raise => {
                    let msg_obj = self.pop_value()?;
                    let msg = if Rc::ptr_eq(&msg_obj, &self.none) {
                        String::new()
                    } else {
                        self.str_of(&msg_obj)?
                    };
                    let name = self.frame().co.names[byte.arg as usize].0.clone();
                    return Err(self.error(&name, msg));
                }
                Opcode::ReRaise => {
                    {
                        let top = self.frame().top();
                        let Payload::Exception(exc) = &top.payload else {
                            return Err(RunError::Fatal("RE_RAISE without an exception on the stack".into()));
                        };
                        exc.borrow_mut().is_re = true;
                    }
                    return Err(self.unwind());
                }
                Opcode::BuildList => {
                    let items = self.pop_n_values_reversed(byte.arg as usize)?;
                    let list = self.new_list(items.to_vec());
                    self.frame_mut().push(list);
                }
                Opcode::BuildMap => {
                    let items = self.pop_n_values_reversed(byte.arg as usize * 2)?;
                    let Some(dict_ty) = self.builtins.get_own_attr("dict") else {
                        return Err(RunError::Fatal("builtins.dict is not registered".into()));
                    };
                    let obj = self.call(&dict_ty, Args::new(), &Args::new(), false)?;
                    for pair in items.chunks(2) {
                        self.call_method(&obj, "__setitem__", smallvec![pair[0].clone(), pair[1].clone()])?;
                    }
                    self.frame_mut().push(obj);
                }
                Opcode::BuildSet => {
                    let items = self.pop_n_values_reversed(byte.arg as usize)?;
                    let list = self.new_list(items.to_vec());
                    let Some(set_ty) = self.builtins.get_own_attr("set") else {
                        return Err(RunError::Fatal("builtins.set is not registered".into()));
                    };
                    let obj = self.call(&set_ty, smallvec![list], &Args::new(), false)?;
                    self.frame_mut().push(obj);
                }
                Opcode::DupTop => {
                    let value = self.top_value()?;
                    self.frame_mut().push(value);
                }
                Opcode::Call => {
                    let packed = byte.arg as u32;
                    let argc = (packed & 0xFFFF) as usize;
                    let kwargc = ((packed >> 16) & 0xFFFF) as usize;
                    let kwargs = if kwargc > 0 {
                        self.pop_n_values_reversed(kwargc * 2)?
                    } else {
                        Args::new()
                    };
                    let args = self.pop_n_values_reversed(argc)?;
                    let callable = self.pop_value()?;
                    let ret = self.call(&callable, args, &kwargs, true)?;
                    if Rc::ptr_eq(&ret, &self.op_call) {
                        return Ok(ret);
                    }
                    self.frame_mut().push(ret);
                }
                Opcode::JumpAbsolute => self.frame_mut().jump_abs(byte.arg as usize),
                Opcode::SafeJumpAbsolute => self.frame_mut().jump_abs_safe(byte.arg as usize),
                Opcode::Goto => {
                    let name = self.frame().co.names[byte.arg as usize].0.clone();
                    match self.frame().co.labels.get(&name).copied() {
                        Some(target) => self.frame_mut().jump_abs_safe(target),
                        None => {
                            return Err(self.raise_ty(ExcType::KeyError, format!("label '{name}' not found")));
                        }
                    }
                }
                Opcode::GetIter => {
                    let obj = self.pop_value()?;
                    let Some(iter_obj) = self.make_iterator(&obj)? else {
                        let ty = self.obj_type_name(&obj);
                        return Err(self.type_error(format!("'{ty}' object is not iterable")));
                    };
                    self.check_type(&iter_obj, self.tp_native_iterator)?;
                    let var = self.frame_mut().pop();
                    self.as_lvalue(&var)?;
                    let Payload::Iter(cell) = &iter_obj.payload else {
                        unreachable!("checked just above")
                    };
                    cell.borrow_mut().var = Some(var);
                    self.frame_mut().push(iter_obj);
                }
                Opcode::ForIter => {
                    // top() is always the iterator here, never a reference.
                    let iter_obj = self.frame().top().clone();
                    match self.iter_next(&iter_obj)? {
                        Some(value) => {
                            let Payload::Iter(cell) = &iter_obj.payload else {
                                return Err(RunError::Fatal("FOR_ITER over a non-iterator".into()));
                            };
                            let var = cell.borrow().var.clone();
                            let Some(var) = var else {
                                return Err(RunError::Fatal("iterator without an attached reference".into()));
                            };
                            let r = self.as_lvalue(&var)?;
                            r.set(self, value)?;
                        }
                        None => {
                            let end = self.frame().co.blocks[byte.block as usize].end;
                            self.frame_mut().jump_abs_safe(end);
                        }
                    }
                }
                Opcode::LoopContinue => {
                    let start = self.frame().co.blocks[byte.block as usize].start;
                    self.frame_mut().jump_abs(start);
                }
                Opcode::LoopBreak => {
                    let end = self.frame().co.blocks[byte.block as usize].end;
                    self.frame_mut().jump_abs_safe(end);
                }
                Opcode::JumpIfFalseOrPop => {
                    let value = self.top_value()?;
                    if self.is_truthy(&value)? {
                        self.frame_mut().pop();
                    } else {
                        self.frame_mut().set_top(value);
                        self.frame_mut().jump_abs(byte.arg as usize);
                    }
                }
                Opcode::JumpIfTrueOrPop => {
                    let value = self.top_value()?;
                    if self.is_truthy(&value)? {
                        self.frame_mut().set_top(value);
                        self.frame_mut().jump_abs(byte.arg as usize);
                    } else {
                        self.frame_mut().pop();
                    }
                }
                Opcode::BuildSlice => {
                    let stop_obj = self.pop_value()?;
                    let start_obj = self.pop_value()?;
                    let start = if Rc::ptr_eq(&start_obj, &self.none) {
                        None
                    } else {
                        Some(self.cast_int(&start_obj)?)
                    };
                    let stop = if Rc::ptr_eq(&stop_obj, &self.none) {
                        None
                    } else {
                        Some(self.cast_int(&stop_obj)?)
                    };
                    let slice = self.new_slice(Slice { start, stop });
                    self.frame_mut().push(slice);
                }
                Opcode::ImportName => {
                    let name = self.frame().co.names[byte.arg as usize].0.clone();
                    let module = self.import_name(&name)?;
                    self.frame_mut().push(module);
                }
                Opcode::YieldValue => return Ok(self.op_yield.clone()),
                Opcode::WithEnter => {
                    let obj = self.pop_value()?;
                    self.call_method(&obj, "__enter__", Args::new())?;
                }
                Opcode::WithExit => {
                    let obj = self.pop_value()?;
                    self.call_method(&obj, "__exit__", Args::new())?;
                }
                Opcode::TryBlockEnter => self.frame_mut().on_try_block_enter(byte.block),
                Opcode::TryBlockExit => self.frame_mut().on_try_block_exit(),
            }
        }

        // Normal termination: the stack contract depends on the compile mode;
        // violations indicate a compiler bug, not a user error.
        match self.frame().co.mode {
            CompileMode::Eval | CompileMode::Json => {
                if self.frame().stack_size() != 1 {
                    return Err(RunError::Fatal(
                        "value stack must hold exactly one value at EVAL/JSON termination".into(),
                    ));
                }
                self.pop_value()
            }
            CompileMode::Exec => {
                if self.frame().stack_size() != 0 {
                    return Err(RunError::Fatal("value stack must be empty at EXEC termination".into()));
                }
                Ok(self.none.clone())
            }
        }
    }
}

/// Indexes a special-method table, treating an out-of-range arg as a
/// compiler bug.
fn special_method(table: &'static [&'static str], arg: i32) -> RunResult<&'static str> {
    table
        .get(arg as usize)
        .copied()
        .ok_or_else(|| RunError::Fatal(format!("special-method index {arg} out of range")))
}
