//! `str` methods.
//!
//! Indexing and length are character-based, not byte-based.

use crate::{
    exception::RunResult,
    function::Args,
    iter::{IterKind, PyIter},
    object::{Payload, PyVar},
    vm::{Vm, attr::escape_str},
};

pub(super) fn register(vm: &mut Vm) {
    let str_ty = vm.type_by_name("str").expect("str type missing");
    vm.bind_method(&str_ty, "__add__", 1, str_add);
    vm.bind_method(&str_ty, "__mul__", 1, str_mul);
    vm.bind_method(&str_ty, "__len__", 0, str_len);
    vm.bind_method(&str_ty, "__getitem__", 1, str_getitem);
    vm.bind_method(&str_ty, "__contains__", 1, str_contains);
    vm.bind_method(&str_ty, "__iter__", 0, str_iter);
    vm.bind_method(&str_ty, "__repr__", 0, str_repr);
    vm.bind_method(&str_ty, "__str__", 0, str_str);
    vm.bind_method(&str_ty, "__eq__", 1, str_eq);
    vm.bind_method(&str_ty, "__ne__", 1, str_ne);
    vm.bind_method(&str_ty, "__lt__", 1, str_lt);
    vm.bind_method(&str_ty, "__le__", 1, str_le);
    vm.bind_method(&str_ty, "__gt__", 1, str_gt);
    vm.bind_method(&str_ty, "__ge__", 1, str_ge);
}

fn str_add(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    match args[1].as_str() {
        Some(b) => Ok(vm.new_str(&format!("{a}{b}"))),
        None => {
            let ty = vm.obj_type_name(&args[1]);
            Err(vm.type_error(format!("can only concatenate str to str, not '{ty}'")))
        }
    }
}

fn str_mul(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    let n = vm.cast_int(&args[1])?;
    let count = if n < 0 { 0 } else { n as usize };
    Ok(vm.new_str(&a.repeat(count)))
}

fn str_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    Ok(vm.new_int(a.chars().count() as i64))
}

fn str_getitem(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    match args[1].payload {
        Payload::Int(index) => {
            let len = a.chars().count();
            let index = vm.normalized_index(index, len)?;
            let c = a.chars().nth(index).expect("index checked against length");
            Ok(vm.new_str(&c.to_string()))
        }
        Payload::Slice(slice) => {
            let chars: Vec<char> = a.chars().collect();
            let (start, stop) = clamp_slice(slice.start, slice.stop, chars.len());
            let section: String = chars[start..stop].iter().collect();
            Ok(vm.new_str(&section))
        }
        _ => {
            let ty = vm.obj_type_name(&args[1]);
            Err(vm.type_error(format!("str indices must be int or slice, not '{ty}'")))
        }
    }
}

/// Clamps optional slice bounds to `[0, len]`, Python-style.
pub(super) fn clamp_slice(start: Option<i64>, stop: Option<i64>, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let norm = |bound: Option<i64>, default: i64| -> i64 {
        let mut v = bound.unwrap_or(default);
        if v < 0 {
            v += len_i;
        }
        v.clamp(0, len_i)
    };
    let start = norm(start, 0);
    let stop = norm(stop, len_i);
    if start >= stop {
        (start as usize, start as usize)
    } else {
        (start as usize, stop as usize)
    }
}

fn str_contains(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    let needle = vm.cast_str(&args[1])?;
    Ok(vm.new_bool(a.contains(&needle)))
}

fn str_iter(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_iter(PyIter::new(IterKind::Str {
        obj: args[0].clone(),
        offset: 0,
    })))
}

fn str_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    Ok(vm.new_str(&escape_str(&a)))
}

fn str_str(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    vm.check_type(&args[0].clone(), vm.tp_str)?;
    Ok(args[0].clone())
}

macro_rules! str_cmp {
    ($name:ident, $cmp:expr) => {
        fn $name(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
            let a = vm.cast_str(&args[0])?;
            let b = vm.cast_str(&args[1])?;
            let cmp: fn(&str, &str) -> bool = $cmp;
            Ok(vm.new_bool(cmp(&a, &b)))
        }
    };
}

str_cmp!(str_lt, |a, b| a < b);
str_cmp!(str_le, |a, b| a <= b);
str_cmp!(str_gt, |a, b| a > b);
str_cmp!(str_ge, |a, b| a >= b);

fn str_eq(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_str(&args[0])?;
    let equal = args[1].as_str().is_some_and(|b| a == b);
    Ok(vm.new_bool(equal))
}

fn str_ne(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let eq = str_eq(vm, args)?;
    let truthy = vm.is_truthy(&eq)?;
    Ok(vm.new_bool(!truthy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_bounds_clamp_like_python() {
        assert_eq!(clamp_slice(None, None, 5), (0, 5));
        assert_eq!(clamp_slice(Some(1), Some(3), 5), (1, 3));
        assert_eq!(clamp_slice(Some(-2), None, 5), (3, 5));
        assert_eq!(clamp_slice(None, Some(-1), 5), (0, 4));
        assert_eq!(clamp_slice(Some(4), Some(2), 5), (4, 4));
        assert_eq!(clamp_slice(Some(10), Some(20), 5), (5, 5));
    }
}
