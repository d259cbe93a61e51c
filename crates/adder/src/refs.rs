//! First-class l-values.
//!
//! A reference names a storage location — a variable, an attribute, an index,
//! or a destructuring pattern of further references — and is resolved to a
//! value only when required. The four variants form a closed sum type; the
//! evaluation loop guarantees references never survive on the value stack
//! past the point where a value is needed.

use smallvec::smallvec;

use crate::{
    code::NameScope,
    exception::{RunError, RunResult},
    intern::Name,
    object::{Payload, PyVar},
    vm::Vm,
};

/// Payload of a `_ref` object.
#[derive(Debug)]
pub(crate) enum Ref {
    Name(NameRef),
    Attr(AttrRef),
    Index(IndexRef),
    Tuple(TupleRef),
}

/// A variable reference: interned name plus scope tag.
#[derive(Debug, Clone)]
pub(crate) struct NameRef {
    pub name: Name,
    pub scope: NameScope,
}

/// An attribute reference: target object plus name.
#[derive(Debug)]
pub(crate) struct AttrRef {
    pub obj: PyVar,
    pub attr: NameRef,
}

/// A subscript reference: target object plus index handle.
#[derive(Debug)]
pub(crate) struct IndexRef {
    pub obj: PyVar,
    pub index: PyVar,
}

/// A destructuring pattern: ordered inner references (each a `_ref` object).
#[derive(Debug)]
pub(crate) struct TupleRef {
    pub items: Vec<PyVar>,
}

impl Ref {
    pub fn get(&self, vm: &mut Vm) -> RunResult<PyVar> {
        match self {
            Self::Name(r) => r.get(vm),
            Self::Attr(r) => {
                let found = vm.get_attr(&r.obj, &r.attr.name, true)?;
                Ok(found.expect("throwing get_attr returned no value"))
            }
            Self::Index(r) => vm.call_method(&r.obj, "__getitem__", smallvec![r.index.clone()]),
            Self::Tuple(r) => {
                let mut values = Vec::with_capacity(r.items.len());
                for item in &r.items {
                    values.push(vm.deref(item)?);
                }
                Ok(vm.new_tuple(values))
            }
        }
    }

    pub fn set(&self, vm: &mut Vm, value: PyVar) -> RunResult<()> {
        match self {
            Self::Name(r) => r.set(vm, value),
            Self::Attr(r) => vm.set_attr(&r.obj, &r.attr.name, value),
            Self::Index(r) => {
                vm.call_method(&r.obj, "__setitem__", smallvec![r.index.clone(), value])?;
                Ok(())
            }
            Self::Tuple(r) => r.set(vm, &value),
        }
    }

    pub fn del(&self, vm: &mut Vm) -> RunResult<()> {
        match self {
            Self::Name(r) => r.del(vm),
            Self::Attr(r) => {
                if !r.obj.is_attr_valid() {
                    return Err(vm.type_error("cannot delete attribute"));
                }
                let removed = r
                    .obj
                    .attrs
                    .as_ref()
                    .expect("attr map checked above")
                    .borrow_mut()
                    .shift_remove(&*r.attr.name);
                if removed.is_none() {
                    return Err(vm.attribute_error(&r.obj, &r.attr.name));
                }
                Ok(())
            }
            Self::Index(r) => {
                vm.call_method(&r.obj, "__delitem__", smallvec![r.index.clone()])?;
                Ok(())
            }
            Self::Tuple(r) => {
                for item in &r.items {
                    let inner = vm.as_lvalue(item)?;
                    inner.del(vm)?;
                }
                Ok(())
            }
        }
    }
}

impl NameRef {
    pub fn get(&self, vm: &mut Vm) -> RunResult<PyVar> {
        let frame = vm.frame();
        if let Some(value) = frame.locals.get(&*self.name) {
            return Ok(value.clone());
        }
        if let Some(value) = vm.globals_get(&self.name) {
            return Ok(value);
        }
        if let Some(value) = vm.builtins().get_own_attr(&self.name) {
            return Ok(value);
        }
        Err(vm.name_error(&self.name))
    }

    pub fn set(&self, vm: &mut Vm, value: PyVar) -> RunResult<()> {
        match self.scope {
            NameScope::Local => {
                vm.frame_mut().locals.insert(self.name.clone(), value);
                Ok(())
            }
            NameScope::Global => {
                if vm.frame().locals.contains_key(&*self.name) {
                    vm.frame_mut().locals.insert(self.name.clone(), value);
                } else {
                    vm.globals_set(self.name.clone(), value);
                }
                Ok(())
            }
            NameScope::Attr | NameScope::Special => {
                Err(RunError::Fatal(format!("name '{}' has a non-storable scope", self.name)))
            }
        }
    }

    pub fn del(&self, vm: &mut Vm) -> RunResult<()> {
        if vm.frame_mut().locals.shift_remove(&*self.name).is_some() {
            return Ok(());
        }
        match self.scope {
            NameScope::Local => Err(vm.name_error(&self.name)),
            NameScope::Global => {
                if vm.globals_del(&self.name) {
                    Ok(())
                } else {
                    Err(vm.name_error(&self.name))
                }
            }
            NameScope::Attr | NameScope::Special => {
                Err(RunError::Fatal(format!("name '{}' has a non-storable scope", self.name)))
            }
        }
    }
}

impl TupleRef {
    fn set(&self, vm: &mut Vm, value: &PyVar) -> RunResult<()> {
        let values: Vec<PyVar> = match &value.payload {
            Payload::Tuple(items) => items.to_vec(),
            Payload::List(items) => items.borrow().clone(),
            _ => return Err(vm.type_error("only tuple or list can be unpacked")),
        };
        if values.len() > self.items.len() {
            return Err(vm.value_error("too many values to unpack"));
        }
        if values.len() < self.items.len() {
            return Err(vm.value_error("not enough values to unpack"));
        }
        for (item, val) in self.items.iter().zip(values) {
            let inner = vm.as_lvalue(item)?;
            inner.set(vm, val)?;
        }
        Ok(())
    }
}
