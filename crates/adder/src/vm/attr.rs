//! Attribute resolution, coercions, and hashing.

use std::rc::Rc;

use smallvec::smallvec;

use crate::{
    exception::{ExcType, RunResult},
    function::Args,
    object::{Payload, PyVar},
    vm::Vm,
};

impl Vm {
    /// Attribute lookup with type-chain walking and method binding.
    ///
    /// `super` proxies redirect the class-chain start: the proxy chain is
    /// followed to the root object, and the walk begins at the root's type
    /// advanced one `__base__` step per proxy layer. An own attribute of the
    /// root wins without binding. A function found on the chain is returned
    /// as a fresh bound method of `obj`.
    pub(crate) fn get_attr(&mut self, obj: &PyVar, name: &str, throw_on_miss: bool) -> RunResult<Option<PyVar>> {
        // `__class__` is synthesized from the type tag rather than stored on
        // every instance.
        if name == "__class__" {
            return Ok(Some(self.type_of(obj)));
        }
        let mut cls: PyVar;
        if self.is_type(obj, self.tp_super) {
            let mut depth = 1usize;
            let mut root = match &obj.payload {
                Payload::Super(inner) => inner.clone(),
                _ => unreachable!("super object without super payload"),
            };
            while self.is_type(&root, self.tp_super) {
                root = match &root.payload {
                    Payload::Super(inner) => inner.clone(),
                    _ => break,
                };
                depth += 1;
            }
            cls = self.type_of(&root);
            for _ in 0..depth {
                cls = cls.get_own_attr("__base__").unwrap_or_else(|| self.none.clone());
            }
            if let Some(value) = root.get_own_attr(name) {
                return Ok(Some(value));
            }
        } else {
            if let Some(value) = obj.get_own_attr(name) {
                return Ok(Some(value));
            }
            cls = self.type_of(obj);
        }

        while !Rc::ptr_eq(&cls, &self.none) {
            if let Some(found) = cls.get_own_attr(name) {
                if self.is_type(&found, self.tp_function) || self.is_type(&found, self.tp_native_function) {
                    return Ok(Some(self.new_bound_method(obj.clone(), found)));
                }
                return Ok(Some(found));
            }
            cls = cls.get_own_attr("__base__").unwrap_or_else(|| self.none.clone());
        }
        if throw_on_miss {
            Err(self.attribute_error(obj, name))
        } else {
            Ok(None)
        }
    }

    /// Attribute write. `super` proxies resolve to their underlying object;
    /// targets without an attribute map (immutable primitives) reject the
    /// write.
    pub(crate) fn set_attr(&mut self, obj: &PyVar, name: &str, value: PyVar) -> RunResult<()> {
        let mut target = obj.clone();
        while self.is_type(&target, self.tp_super) {
            target = match &target.payload {
                Payload::Super(inner) => inner.clone(),
                _ => break,
            };
        }
        if !target.is_attr_valid() {
            return Err(self.type_error("cannot set attribute"));
        }
        let key = self.intern(name);
        target.set_own_attr(key, value);
        Ok(())
    }

    /// Invokes the unbound method `name` found on `args[0]`'s type chain.
    pub(crate) fn fast_call(&mut self, name: &str, args: Args) -> RunResult<PyVar> {
        let mut cls = self.type_of(&args[0]);
        while !Rc::ptr_eq(&cls, &self.none) {
            if let Some(func) = cls.get_own_attr(name) {
                return self.call(&func, args, &Args::new(), false);
            }
            cls = cls.get_own_attr("__base__").unwrap_or_else(|| self.none.clone());
        }
        let receiver = args[0].clone();
        Err(self.attribute_error(&receiver, name))
    }

    /// Looks up `name` on `obj` (binding methods) and calls it.
    pub(crate) fn call_method(&mut self, obj: &PyVar, name: &str, args: Args) -> RunResult<PyVar> {
        let func = self
            .get_attr(obj, name, true)?
            .expect("throwing get_attr returned no value");
        self.call(&func, args, &Args::new(), false)
    }

    // ---------------------------------------------------------------- coercions

    /// Truthiness: bools as-is, `None` false, numbers against zero, `__len__`
    /// against zero if defined, everything else true.
    pub(crate) fn is_truthy(&mut self, obj: &PyVar) -> RunResult<bool> {
        match obj.payload {
            Payload::Bool(b) => return Ok(b),
            Payload::Int(i) => return Ok(i != 0),
            Payload::Float(f) => return Ok(f != 0.0),
            _ => {}
        }
        if Rc::ptr_eq(obj, &self.none) {
            return Ok(false);
        }
        if let Some(len_fn) = self.get_attr(obj, "__len__", false)? {
            let ret = self.call(&len_fn, Args::new(), &Args::new(), false)?;
            let len = self.cast_int(&ret)?;
            return Ok(len > 0);
        }
        Ok(true)
    }

    /// Booleanisation to the shared singletons. Idempotent.
    pub(crate) fn as_bool(&mut self, obj: &PyVar) -> RunResult<PyVar> {
        let truthy = self.is_truthy(obj)?;
        Ok(self.new_bool(truthy))
    }

    /// `__str__` if defined, else repr.
    pub(crate) fn as_str(&mut self, obj: &PyVar) -> RunResult<PyVar> {
        if let Some(str_fn) = self.get_attr(obj, "__str__", false)? {
            return self.call(&str_fn, Args::new(), &Args::new(), false);
        }
        self.as_repr(obj)
    }

    /// `<class 'N'>` for types, else `__repr__`.
    pub(crate) fn as_repr(&mut self, obj: &PyVar) -> RunResult<PyVar> {
        if self.is_type(obj, self.tp_type) {
            let name = obj
                .get_own_attr("__name__")
                .and_then(|n| n.as_str().map(str::to_owned))
                .unwrap_or_else(|| "?".into());
            return Ok(self.new_str(&format!("<class '{name}'>")));
        }
        self.call_method(obj, "__repr__", Args::new())
    }

    /// String coercion straight to a Rust string.
    pub(crate) fn str_of(&mut self, obj: &PyVar) -> RunResult<String> {
        let s = self.as_str(obj)?;
        self.cast_str(&s)
    }

    /// Repr coercion straight to a Rust string.
    pub(crate) fn repr_of(&mut self, obj: &PyVar) -> RunResult<String> {
        let s = self.as_repr(obj)?;
        self.cast_str(&s)
    }

    /// Numeric negation for int and float; anything else is a `TypeError`.
    pub(crate) fn num_negated(&mut self, obj: &PyVar) -> RunResult<PyVar> {
        match obj.payload {
            Payload::Int(i) => Ok(self.new_int(i.wrapping_neg())),
            Payload::Float(f) => Ok(self.new_float(-f)),
            _ => Err(self.type_error("unsupported operand type(s) for -")),
        }
    }

    /// Normalises a possibly-negative index against `size`.
    pub(crate) fn normalized_index(&mut self, index: i64, size: usize) -> RunResult<usize> {
        let size_i = size as i64;
        let adjusted = if index < 0 { index + size_i } else { index };
        if adjusted < 0 || adjusted >= size_i {
            return Err(self.index_error(format!("{adjusted} not in [0, {size_i})")));
        }
        Ok(adjusted as usize)
    }

    // ---------------------------------------------------------------- hashing & equality

    /// Total hash over the hashable builtins; everything else raises
    /// `TypeError("unhashable type: …")`.
    ///
    /// Equal values hash equal across types: bools hash as their integer
    /// value and integral floats hash as the integer they equal.
    pub(crate) fn hash(&mut self, obj: &PyVar) -> RunResult<i64> {
        match &obj.payload {
            Payload::Int(i) => Ok(*i),
            Payload::Bool(b) => Ok(i64::from(*b)),
            Payload::Float(f) => {
                let f = *f;
                if f.trunc() == f && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f as i64)
                } else {
                    Ok(f.to_bits() as i64)
                }
            }
            Payload::Str(s) => Ok(hash_str(s)),
            Payload::TypeIndex(_) => Ok(Rc::as_ptr(obj) as i64),
            Payload::Tuple(items) => {
                // Bernstein-style fold with the golden-ratio mixer.
                let mut x: i64 = 1_000_003;
                for item in items.iter() {
                    let y = self.hash(item)?;
                    x ^= y
                        .wrapping_add(0x9e37_79b9)
                        .wrapping_add(x.wrapping_shl(6))
                        .wrapping_add(x >> 2);
                }
                Ok(x)
            }
            _ => {
                let ty = self.obj_type_name(obj);
                Err(self.raise_ty(ExcType::TypeError, format!("unhashable type: '{ty}'")))
            }
        }
    }

    /// Value equality: structural over builtins, `__eq__` dispatch otherwise.
    pub(crate) fn py_equals(&mut self, a: &PyVar, b: &PyVar) -> RunResult<bool> {
        if Rc::ptr_eq(a, b) {
            return Ok(true);
        }
        match (&a.payload, &b.payload) {
            (Payload::Int(x), Payload::Int(y)) => return Ok(x == y),
            (Payload::Bool(x), Payload::Bool(y)) => return Ok(x == y),
            (Payload::Float(x), Payload::Float(y)) => return Ok(x == y),
            (Payload::Int(x), Payload::Float(y)) | (Payload::Float(y), Payload::Int(x)) => {
                return Ok((*x as f64) == *y);
            }
            (Payload::Str(x), Payload::Str(y)) => return Ok(x == y),
            (Payload::Tuple(x), Payload::Tuple(y)) => {
                if x.len() != y.len() {
                    return Ok(false);
                }
                let pairs: Vec<(PyVar, PyVar)> =
                    x.iter().cloned().zip(y.iter().cloned()).collect();
                for (l, r) in pairs {
                    if !self.py_equals(&l, &r)? {
                        return Ok(false);
                    }
                }
                return Ok(true);
            }
            (Payload::List(x), Payload::List(y)) => {
                let (xs, ys) = (x.borrow().clone(), y.borrow().clone());
                if xs.len() != ys.len() {
                    return Ok(false);
                }
                for (l, r) in xs.iter().zip(ys.iter()) {
                    if !self.py_equals(l, r)? {
                        return Ok(false);
                    }
                }
                return Ok(true);
            }
            _ => {}
        }
        // Sequences compare structurally only; dispatching `__eq__` here
        // would route straight back into this function.
        if matches!(a.payload, Payload::List(_) | Payload::Tuple(_))
            || matches!(b.payload, Payload::List(_) | Payload::Tuple(_))
        {
            return Ok(false);
        }
        let ret = self.fast_call("__eq__", smallvec![a.clone(), b.clone()])?;
        self.is_truthy(&ret)
    }

    // ---------------------------------------------------------------- checked casts

    pub(crate) fn cast_int(&mut self, obj: &PyVar) -> RunResult<i64> {
        match obj.as_int() {
            Some(i) => Ok(i),
            None => {
                let got = self.obj_type_name(obj);
                Err(self.type_error(format!("expected 'int', but got '{got}'")))
            }
        }
    }

    pub(crate) fn cast_str(&mut self, obj: &PyVar) -> RunResult<String> {
        match obj.as_str() {
            Some(s) => Ok(s.to_owned()),
            None => {
                let got = self.obj_type_name(obj);
                Err(self.type_error(format!("expected 'str', but got '{got}'")))
            }
        }
    }

    /// Widens int or float to f64; anything else is a `TypeError`.
    pub(crate) fn num_to_float(&mut self, obj: &PyVar) -> RunResult<f64> {
        match obj.payload {
            Payload::Int(i) => Ok(i as f64),
            Payload::Float(f) => Ok(f),
            _ => {
                let got = self.obj_type_name(obj);
                Err(self.type_error(format!("expected 'int' or 'float', got '{got}'")))
            }
        }
    }
}

/// Bernstein hash over the string bytes.
fn hash_str(s: &str) -> i64 {
    let mut h: i64 = 5381;
    for byte in s.as_bytes() {
        h = h.wrapping_mul(33).wrapping_add(i64::from(*byte));
    }
    h
}

/// Single-quoted escaped form used by `str.__repr__`, the disassembler, and
/// error messages.
pub(crate) fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
