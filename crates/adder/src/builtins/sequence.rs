//! `list`, `tuple`, and `range` methods, plus the `dict` and `set` container
//! types registered through the native type registrar.

use std::fmt::Write as _;

use crate::{
    dict::Dict,
    exception::RunResult,
    function::Args,
    iter::{IterKind, PyIter, RangeIter},
    object::{Payload, PyObject, PyVar, Range},
    vm::{NativeTypeDesc, Vm},
};

use super::string::clamp_slice;

pub(super) fn register(vm: &mut Vm) {
    let list_ty = vm.type_by_name("list").expect("list type missing");
    vm.bind_func(&list_ty, "__new__", -1, list_new);
    vm.bind_method(&list_ty, "append", 1, list_append);
    vm.bind_method(&list_ty, "__len__", 0, list_len);
    vm.bind_method(&list_ty, "__getitem__", 1, list_getitem);
    vm.bind_method(&list_ty, "__setitem__", 2, list_setitem);
    vm.bind_method(&list_ty, "__delitem__", 1, list_delitem);
    vm.bind_method(&list_ty, "__contains__", 1, list_contains);
    vm.bind_method(&list_ty, "__add__", 1, list_add);
    vm.bind_method(&list_ty, "__mul__", 1, list_mul);
    vm.bind_method(&list_ty, "__eq__", 1, seq_eq);
    vm.bind_method(&list_ty, "__ne__", 1, seq_ne);
    vm.bind_method(&list_ty, "__iter__", 0, list_iter);
    vm.bind_method(&list_ty, "__repr__", 0, list_repr);

    let tuple_ty = vm.type_by_name("tuple").expect("tuple type missing");
    vm.bind_method(&tuple_ty, "__len__", 0, tuple_len);
    vm.bind_method(&tuple_ty, "__getitem__", 1, tuple_getitem);
    vm.bind_method(&tuple_ty, "__contains__", 1, tuple_contains);
    vm.bind_method(&tuple_ty, "__eq__", 1, seq_eq);
    vm.bind_method(&tuple_ty, "__ne__", 1, seq_ne);
    vm.bind_method(&tuple_ty, "__iter__", 0, tuple_iter);
    vm.bind_method(&tuple_ty, "__repr__", 0, tuple_repr);

    let range_ty = vm.type_by_name("range").expect("range type missing");
    vm.bind_func(&range_ty, "__new__", -1, range_new);
    vm.bind_method(&range_ty, "__len__", 0, range_len);
    vm.bind_method(&range_ty, "__iter__", 0, range_iter);
    vm.bind_method(&range_ty, "__repr__", 0, range_repr);

    let builtins = vm.builtins.clone();
    let dict_ty = vm.register_type(
        &builtins,
        &NativeTypeDesc {
            name: "dict",
            register: register_dict,
        },
    );
    vm.tp_dict = dict_ty.type_payload().expect("dict type object");
    let set_ty = vm.register_type(
        &builtins,
        &NativeTypeDesc {
            name: "set",
            register: register_set,
        },
    );
    vm.tp_set = set_ty.type_payload().expect("set type object");
}

fn register_dict(vm: &mut Vm, _module: &PyVar, ty: &PyVar) {
    vm.bind_func(ty, "__new__", -1, dict_new);
    vm.bind_method(ty, "__setitem__", 2, dict_setitem);
    vm.bind_method(ty, "__getitem__", 1, dict_getitem);
    vm.bind_method(ty, "__delitem__", 1, dict_delitem);
    vm.bind_method(ty, "__len__", 0, dict_len);
    vm.bind_method(ty, "__contains__", 1, dict_contains);
    vm.bind_method(ty, "__repr__", 0, dict_repr);
}

fn register_set(vm: &mut Vm, _module: &PyVar, ty: &PyVar) {
    vm.bind_func(ty, "__new__", -1, set_new);
    vm.bind_method(ty, "add", 1, set_add);
    vm.bind_method(ty, "__len__", 0, set_len);
    vm.bind_method(ty, "__contains__", 1, set_contains);
    vm.bind_method(ty, "__repr__", 0, set_repr);
}

fn list_items(vm: &mut Vm, obj: &PyVar) -> RunResult<Vec<PyVar>> {
    match &obj.payload {
        Payload::List(items) => Ok(items.borrow().clone()),
        _ => {
            let ty = vm.obj_type_name(obj);
            Err(vm.type_error(format!("expected 'list', but got '{ty}'")))
        }
    }
}

// ---------------------------------------------------------------- list

fn list_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    match args.len() {
        0 => Ok(vm.new_list(Vec::new())),
        1 => {
            let arg = args[0].clone();
            let Some(iter_obj) = vm.make_iterator(&arg)? else {
                let ty = vm.obj_type_name(&arg);
                return Err(vm.type_error(format!("'{ty}' object is not iterable")));
            };
            let mut items = Vec::new();
            while let Some(value) = vm.iter_next(&iter_obj)? {
                items.push(value);
            }
            Ok(vm.new_list(items))
        }
        n => Err(vm.type_error(format!("list() takes at most 1 argument ({n} given)"))),
    }
}

fn list_append(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::List(items) = &args[0].payload else {
        return Err(vm.type_error("expected 'list'"));
    };
    items.borrow_mut().push(args[1].clone());
    Ok(vm.none.clone())
}

fn list_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = list_items(vm, &args[0].clone())?;
    Ok(vm.new_int(items.len() as i64))
}

fn list_getitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = list_items(vm, &args[0].clone())?;
    match args[1].payload {
        Payload::Int(index) => {
            let index = vm.normalized_index(index, items.len())?;
            Ok(items[index].clone())
        }
        Payload::Slice(slice) => {
            let (start, stop) = clamp_slice(slice.start, slice.stop, items.len());
            Ok(vm.new_list(items[start..stop].to_vec()))
        }
        _ => {
            let ty = vm.obj_type_name(&args[1]);
            Err(vm.type_error(format!("list indices must be int or slice, not '{ty}'")))
        }
    }
}

fn list_setitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let index = vm.cast_int(&args[1])?;
    let Payload::List(items) = &args[0].payload else {
        return Err(vm.type_error("expected 'list'"));
    };
    let len = items.borrow().len();
    let index = vm.normalized_index(index, len)?;
    items.borrow_mut()[index] = args[2].clone();
    Ok(vm.none.clone())
}

fn list_delitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let index = vm.cast_int(&args[1])?;
    let Payload::List(items) = &args[0].payload else {
        return Err(vm.type_error("expected 'list'"));
    };
    let len = items.borrow().len();
    let index = vm.normalized_index(index, len)?;
    items.borrow_mut().remove(index);
    Ok(vm.none.clone())
}

fn list_contains(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = list_items(vm, &args[0].clone())?;
    let needle = args[1].clone();
    for item in &items {
        if vm.py_equals(item, &needle)? {
            return Ok(vm.new_bool(true));
        }
    }
    Ok(vm.new_bool(false))
}

fn list_add(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let mut items = list_items(vm, &args[0].clone())?;
    let rhs = list_items(vm, &args[1].clone())?;
    items.extend(rhs);
    Ok(vm.new_list(items))
}

fn list_mul(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = list_items(vm, &args[0].clone())?;
    let n = vm.cast_int(&args[1])?;
    let count = if n < 0 { 0 } else { n as usize };
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(vm.new_list(out))
}

/// Shared element-wise equality for lists and tuples.
fn seq_eq(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let (a, b) = (args[0].clone(), args[1].clone());
    let equal = vm.py_equals(&a, &b)?;
    Ok(vm.new_bool(equal))
}

fn seq_ne(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let eq = seq_eq(vm, args)?;
    let truthy = vm.is_truthy(&eq)?;
    Ok(vm.new_bool(!truthy))
}

fn list_iter(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_iter(PyIter::new(IterKind::List {
        obj: args[0].clone(),
        index: 0,
    })))
}

fn list_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = list_items(vm, &args[0].clone())?;
    let mut out = String::from("[");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&vm.repr_of(item)?);
    }
    out.push(']');
    Ok(vm.new_str(&out))
}

// ---------------------------------------------------------------- tuple

fn tuple_items(vm: &mut Vm, obj: &PyVar) -> RunResult<Vec<PyVar>> {
    match &obj.payload {
        Payload::Tuple(items) => Ok(items.to_vec()),
        _ => {
            let ty = vm.obj_type_name(obj);
            Err(vm.type_error(format!("expected 'tuple', but got '{ty}'")))
        }
    }
}

fn tuple_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = tuple_items(vm, &args[0].clone())?;
    Ok(vm.new_int(items.len() as i64))
}

fn tuple_getitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = tuple_items(vm, &args[0].clone())?;
    match args[1].payload {
        Payload::Int(index) => {
            let index = vm.normalized_index(index, items.len())?;
            Ok(items[index].clone())
        }
        Payload::Slice(slice) => {
            let (start, stop) = clamp_slice(slice.start, slice.stop, items.len());
            Ok(vm.new_tuple(items[start..stop].to_vec()))
        }
        _ => {
            let ty = vm.obj_type_name(&args[1]);
            Err(vm.type_error(format!("tuple indices must be int or slice, not '{ty}'")))
        }
    }
}

fn tuple_contains(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = tuple_items(vm, &args[0].clone())?;
    let needle = args[1].clone();
    for item in &items {
        if vm.py_equals(item, &needle)? {
            return Ok(vm.new_bool(true));
        }
    }
    Ok(vm.new_bool(false))
}

fn tuple_iter(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_iter(PyIter::new(IterKind::Tuple {
        obj: args[0].clone(),
        index: 0,
    })))
}

fn tuple_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let items = tuple_items(vm, &args[0].clone())?;
    let mut out = String::from("(");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&vm.repr_of(item)?);
    }
    if items.len() == 1 {
        out.push(',');
    }
    out.push(')');
    Ok(vm.new_str(&out))
}

// ---------------------------------------------------------------- range

fn range_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let (start, stop, step) = match args.len() {
        1 => (0, vm.cast_int(&args[0])?, 1),
        2 => (vm.cast_int(&args[0])?, vm.cast_int(&args[1])?, 1),
        3 => (vm.cast_int(&args[0])?, vm.cast_int(&args[1])?, vm.cast_int(&args[2])?),
        n => return Err(vm.type_error(format!("range() expects 1 to 3 arguments ({n} given)"))),
    };
    if step == 0 {
        return Err(vm.value_error("range() arg 3 must not be zero"));
    }
    Ok(vm.new_range(Range { start, stop, step }))
}

fn range_payload(vm: &mut Vm, obj: &PyVar) -> RunResult<Range> {
    match obj.payload {
        Payload::Range(r) => Ok(r),
        _ => {
            let ty = vm.obj_type_name(obj);
            Err(vm.type_error(format!("expected 'range', but got '{ty}'")))
        }
    }
}

fn range_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let r = range_payload(vm, &args[0].clone())?;
    Ok(vm.new_int(r.len()))
}

fn range_iter(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let r = range_payload(vm, &args[0].clone())?;
    Ok(vm.new_iter(PyIter::new(IterKind::Range(RangeIter::new(r)))))
}

fn range_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let r = range_payload(vm, &args[0].clone())?;
    let mut out = String::new();
    if r.step == 1 {
        let _ = write!(out, "range({}, {})", r.start, r.stop);
    } else {
        let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
    }
    Ok(vm.new_str(&out))
}

// ---------------------------------------------------------------- dict

fn dict_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    if !args.is_empty() {
        return Err(vm.type_error(format!("dict() takes no arguments ({} given)", args.len())));
    }
    Ok(PyObject::new(vm.tp_dict, Payload::Dict(std::cell::RefCell::new(Dict::new()))))
}

fn dict_setitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let key = args[1].clone();
    let hash = vm.hash(&key)?;
    let Payload::Dict(dict) = &args[0].payload else {
        return Err(vm.type_error("expected 'dict'"));
    };
    dict.borrow_mut().set(hash, key, args[2].clone());
    Ok(vm.none.clone())
}

fn dict_getitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let key = args[1].clone();
    let hash = vm.hash(&key)?;
    let found = {
        let Payload::Dict(dict) = &args[0].payload else {
            return Err(vm.type_error("expected 'dict'"));
        };
        let d = dict.borrow();
        d.get(hash, &key)
    };
    match found {
        Some(value) => Ok(value),
        None => {
            let repr = vm.repr_of(&key)?;
            Err(vm.raise_ty(crate::exception::ExcType::KeyError, repr))
        }
    }
}

fn dict_delitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let key = args[1].clone();
    let hash = vm.hash(&key)?;
    let removed = {
        let Payload::Dict(dict) = &args[0].payload else {
            return Err(vm.type_error("expected 'dict'"));
        };
        let mut d = dict.borrow_mut();
        d.remove(hash, &key)
    };
    match removed {
        Some(_) => Ok(vm.none.clone()),
        None => {
            let repr = vm.repr_of(&key)?;
            Err(vm.raise_ty(crate::exception::ExcType::KeyError, repr))
        }
    }
}

fn dict_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::Dict(dict) = &args[0].payload else {
        return Err(vm.type_error("expected 'dict'"));
    };
    let len = dict.borrow().len();
    Ok(vm.new_int(len as i64))
}

fn dict_contains(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let key = args[1].clone();
    let hash = vm.hash(&key)?;
    let Payload::Dict(dict) = &args[0].payload else {
        return Err(vm.type_error("expected 'dict'"));
    };
    let contained = dict.borrow().contains(hash, &key);
    Ok(vm.new_bool(contained))
}

fn dict_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let pairs: Vec<(PyVar, PyVar)> = {
        let Payload::Dict(dict) = &args[0].payload else {
            return Err(vm.type_error("expected 'dict'"));
        };
        let d = dict.borrow();
        d.pairs().map(|(k, v)| (k.clone(), v.clone())).collect()
    };
    let mut out = String::from("{");
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&vm.repr_of(key)?);
        out.push_str(": ");
        out.push_str(&vm.repr_of(value)?);
    }
    out.push('}');
    Ok(vm.new_str(&out))
}

// ---------------------------------------------------------------- set

fn set_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let obj = PyObject::new(vm.tp_set, Payload::Dict(std::cell::RefCell::new(Dict::new())));
    match args.len() {
        0 => Ok(obj),
        1 => {
            let arg = args[0].clone();
            let Some(iter_obj) = vm.make_iterator(&arg)? else {
                let ty = vm.obj_type_name(&arg);
                return Err(vm.type_error(format!("'{ty}' object is not iterable")));
            };
            while let Some(value) = vm.iter_next(&iter_obj)? {
                let hash = vm.hash(&value)?;
                let Payload::Dict(entries) = &obj.payload else {
                    unreachable!("set payload created above")
                };
                let none = vm.none.clone();
                entries.borrow_mut().set(hash, value, none);
            }
            Ok(obj)
        }
        n => Err(vm.type_error(format!("set() takes at most 1 argument ({n} given)"))),
    }
}

fn set_add(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let value = args[1].clone();
    let hash = vm.hash(&value)?;
    let Payload::Dict(entries) = &args[0].payload else {
        return Err(vm.type_error("expected 'set'"));
    };
    let none = vm.none.clone();
    entries.borrow_mut().set(hash, value, none);
    Ok(vm.none.clone())
}

fn set_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::Dict(entries) = &args[0].payload else {
        return Err(vm.type_error("expected 'set'"));
    };
    let len = entries.borrow().len();
    Ok(vm.new_int(len as i64))
}

fn set_contains(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let key = args[1].clone();
    let hash = vm.hash(&key)?;
    let Payload::Dict(entries) = &args[0].payload else {
        return Err(vm.type_error("expected 'set'"));
    };
    let contained = entries.borrow().contains(hash, &key);
    Ok(vm.new_bool(contained))
}

fn set_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let keys: Vec<PyVar> = {
        let Payload::Dict(entries) = &args[0].payload else {
            return Err(vm.type_error("expected 'set'"));
        };
        let e = entries.borrow();
        e.pairs().map(|(k, _)| k.clone()).collect()
    };
    if keys.is_empty() {
        return Ok(vm.new_str("set()"));
    }
    let mut out = String::from("{");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&vm.repr_of(key)?);
    }
    out.push('}');
    Ok(vm.new_str(&out))
}
