//! Operator methods for `int` and `float`.
//!
//! Mixed int/float arithmetic promotes to float. Division and modulo by zero
//! raise `ZeroDivisionError`; `__truediv__` always yields float. Equality
//! against a foreign type answers False instead of raising; ordering against
//! a foreign type raises `TypeError`.

use crate::{
    exception::RunResult,
    function::Args,
    object::{Payload, PyVar},
    vm::Vm,
};

pub(super) fn register(vm: &mut Vm) {
    let int_ty = vm.type_by_name("int").expect("int type missing");
    vm.bind_method(&int_ty, "__add__", 1, int_add);
    vm.bind_method(&int_ty, "__sub__", 1, int_sub);
    vm.bind_method(&int_ty, "__mul__", 1, int_mul);
    vm.bind_method(&int_ty, "__truediv__", 1, int_truediv);
    vm.bind_method(&int_ty, "__floordiv__", 1, int_floordiv);
    vm.bind_method(&int_ty, "__mod__", 1, int_mod);
    vm.bind_method(&int_ty, "__pow__", 1, int_pow);
    vm.bind_method(&int_ty, "__lshift__", 1, int_lshift);
    vm.bind_method(&int_ty, "__rshift__", 1, int_rshift);
    vm.bind_method(&int_ty, "__and__", 1, int_and);
    vm.bind_method(&int_ty, "__or__", 1, int_or);
    vm.bind_method(&int_ty, "__xor__", 1, int_xor);
    vm.bind_method(&int_ty, "__lt__", 1, int_lt);
    vm.bind_method(&int_ty, "__le__", 1, int_le);
    vm.bind_method(&int_ty, "__eq__", 1, int_eq);
    vm.bind_method(&int_ty, "__ne__", 1, int_ne);
    vm.bind_method(&int_ty, "__gt__", 1, int_gt);
    vm.bind_method(&int_ty, "__ge__", 1, int_ge);
    vm.bind_method(&int_ty, "__repr__", 0, int_repr);

    let float_ty = vm.type_by_name("float").expect("float type missing");
    vm.bind_method(&float_ty, "__add__", 1, float_add);
    vm.bind_method(&float_ty, "__sub__", 1, float_sub);
    vm.bind_method(&float_ty, "__mul__", 1, float_mul);
    vm.bind_method(&float_ty, "__truediv__", 1, float_truediv);
    vm.bind_method(&float_ty, "__floordiv__", 1, float_floordiv);
    vm.bind_method(&float_ty, "__mod__", 1, float_mod);
    vm.bind_method(&float_ty, "__pow__", 1, float_pow);
    vm.bind_method(&float_ty, "__lt__", 1, float_lt);
    vm.bind_method(&float_ty, "__le__", 1, float_le);
    vm.bind_method(&float_ty, "__eq__", 1, float_eq);
    vm.bind_method(&float_ty, "__ne__", 1, float_ne);
    vm.bind_method(&float_ty, "__gt__", 1, float_gt);
    vm.bind_method(&float_ty, "__ge__", 1, float_ge);
    vm.bind_method(&float_ty, "__repr__", 0, float_repr);
}

/// Right operand of an int operation, promoted if float.
enum IntRhs {
    Int(i64),
    Float(f64),
}

fn int_rhs(args: &Args) -> Option<IntRhs> {
    match args[1].payload {
        Payload::Int(i) => Some(IntRhs::Int(i)),
        Payload::Float(f) => Some(IntRhs::Float(f)),
        _ => None,
    }
}

fn operand_type_error(vm: &mut Vm, op: &str, lhs: &PyVar, rhs: &PyVar) -> crate::exception::RunError {
    let l = vm.obj_type_name(lhs);
    let r = vm.obj_type_name(rhs);
    vm.type_error(format!("unsupported operand type(s) for {op}: '{l}' and '{r}'"))
}

/// Floor division rounding toward negative infinity.
fn floordiv(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }
}

/// Modulo with the sign of the divisor.
fn pymod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) { r + b } else { r }
}

/// Integer power by repeated squaring, wrapping on overflow.
fn ipow(mut base: i64, mut exp: u64) -> i64 {
    let mut result: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    result
}

macro_rules! int_arith {
    ($name:ident, $op:literal, $int_case:expr, $float_case:expr) => {
        fn $name(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
            let a = vm.cast_int(&args[0])?;
            match int_rhs(args) {
                Some(IntRhs::Int(b)) => $int_case(vm, a, b),
                Some(IntRhs::Float(b)) => $float_case(vm, a as f64, b),
                None => {
                    let (lhs, rhs) = (args[0].clone(), args[1].clone());
                    Err(operand_type_error(vm, $op, &lhs, &rhs))
                }
            }
        }
    };
}

int_arith!(
    int_add,
    "+",
    |vm: &mut Vm, a: i64, b: i64| Ok(vm.new_int(a.wrapping_add(b))),
    |vm: &mut Vm, a: f64, b: f64| Ok(vm.new_float(a + b))
);
int_arith!(
    int_sub,
    "-",
    |vm: &mut Vm, a: i64, b: i64| Ok(vm.new_int(a.wrapping_sub(b))),
    |vm: &mut Vm, a: f64, b: f64| Ok(vm.new_float(a - b))
);
int_arith!(
    int_mul,
    "*",
    |vm: &mut Vm, a: i64, b: i64| Ok(vm.new_int(a.wrapping_mul(b))),
    |vm: &mut Vm, a: f64, b: f64| Ok(vm.new_float(a * b))
);
int_arith!(
    int_truediv,
    "/",
    |vm: &mut Vm, a: i64, b: i64| {
        if b == 0 {
            return Err(vm.zero_division_error());
        }
        Ok(vm.new_float(a as f64 / b as f64))
    },
    |vm: &mut Vm, a: f64, b: f64| {
        if b == 0.0 {
            return Err(vm.zero_division_error());
        }
        Ok(vm.new_float(a / b))
    }
);
int_arith!(
    int_floordiv,
    "//",
    |vm: &mut Vm, a: i64, b: i64| {
        if b == 0 {
            return Err(vm.zero_division_error());
        }
        Ok(vm.new_int(floordiv(a, b)))
    },
    |vm: &mut Vm, a: f64, b: f64| {
        if b == 0.0 {
            return Err(vm.zero_division_error());
        }
        Ok(vm.new_float((a / b).floor()))
    }
);
int_arith!(
    int_mod,
    "%",
    |vm: &mut Vm, a: i64, b: i64| {
        if b == 0 {
            return Err(vm.zero_division_error());
        }
        Ok(vm.new_int(pymod(a, b)))
    },
    |vm: &mut Vm, a: f64, b: f64| {
        if b == 0.0 {
            return Err(vm.zero_division_error());
        }
        Ok(vm.new_float(a.rem_euclid(b)))
    }
);
int_arith!(
    int_pow,
    "**",
    |vm: &mut Vm, a: i64, b: i64| {
        if b < 0 {
            Ok(vm.new_float((a as f64).powi(b as i32)))
        } else {
            Ok(vm.new_int(ipow(a, b as u64)))
        }
    },
    |vm: &mut Vm, a: f64, b: f64| Ok(vm.new_float(a.powf(b)))
);

macro_rules! int_bitwise {
    ($name:ident, $op:literal, $apply:expr) => {
        fn $name(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
            let a = vm.cast_int(&args[0])?;
            match args[1].payload {
                Payload::Int(b) => {
                    let apply: fn(i64, i64) -> i64 = $apply;
                    Ok(vm.new_int(apply(a, b)))
                }
                _ => {
                    let (lhs, rhs) = (args[0].clone(), args[1].clone());
                    Err(operand_type_error(vm, $op, &lhs, &rhs))
                }
            }
        }
    };
}

int_bitwise!(int_lshift, "<<", |a, b| a.wrapping_shl(b as u32));
int_bitwise!(int_rshift, ">>", |a, b| a.wrapping_shr(b as u32));
int_bitwise!(int_and, "&", |a, b| a & b);
int_bitwise!(int_or, "|", |a, b| a | b);
int_bitwise!(int_xor, "^", |a, b| a ^ b);

macro_rules! int_cmp {
    ($name:ident, $op:literal, $cmp:expr) => {
        fn $name(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
            let a = vm.cast_int(&args[0])?;
            let cmp: fn(f64, f64) -> bool = $cmp;
            match int_rhs(args) {
                Some(IntRhs::Int(b)) => Ok(vm.new_bool(cmp(a as f64, b as f64))),
                Some(IntRhs::Float(b)) => Ok(vm.new_bool(cmp(a as f64, b))),
                None => {
                    let (lhs, rhs) = (args[0].clone(), args[1].clone());
                    Err(operand_type_error(vm, $op, &lhs, &rhs))
                }
            }
        }
    };
}

int_cmp!(int_lt, "<", |a, b| a < b);
int_cmp!(int_le, "<=", |a, b| a <= b);
int_cmp!(int_gt, ">", |a, b| a > b);
int_cmp!(int_ge, ">=", |a, b| a >= b);

fn int_eq(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_int(&args[0])?;
    let equal = match int_rhs(args) {
        Some(IntRhs::Int(b)) => a == b,
        Some(IntRhs::Float(b)) => (a as f64) == b,
        None => false,
    };
    Ok(vm.new_bool(equal))
}

fn int_ne(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let eq = int_eq(vm, args)?;
    let truthy = vm.is_truthy(&eq)?;
    Ok(vm.new_bool(!truthy))
}

fn int_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.cast_int(&args[0])?;
    Ok(vm.new_str(&a.to_string()))
}

// ---------------------------------------------------------------- float

fn float_rhs(vm: &mut Vm, args: &Args, op: &str) -> RunResult<f64> {
    match args[1].payload {
        Payload::Int(i) => Ok(i as f64),
        Payload::Float(f) => Ok(f),
        _ => {
            let (lhs, rhs) = (args[0].clone(), args[1].clone());
            Err(operand_type_error(vm, op, &lhs, &rhs))
        }
    }
}

macro_rules! float_arith {
    ($name:ident, $op:literal, $apply:expr) => {
        fn $name(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
            let a = vm.num_to_float(&args[0])?;
            let b = float_rhs(vm, args, $op)?;
            let apply: fn(&mut Vm, f64, f64) -> RunResult<PyVar> = $apply;
            apply(vm, a, b)
        }
    };
}

float_arith!(float_add, "+", |vm, a, b| Ok(vm.new_float(a + b)));
float_arith!(float_sub, "-", |vm, a, b| Ok(vm.new_float(a - b)));
float_arith!(float_mul, "*", |vm, a, b| Ok(vm.new_float(a * b)));
float_arith!(float_truediv, "/", |vm, a, b| {
    if b == 0.0 {
        return Err(vm.zero_division_error());
    }
    Ok(vm.new_float(a / b))
});
float_arith!(float_floordiv, "//", |vm, a, b| {
    if b == 0.0 {
        return Err(vm.zero_division_error());
    }
    Ok(vm.new_float((a / b).floor()))
});
float_arith!(float_mod, "%", |vm, a, b| {
    if b == 0.0 {
        return Err(vm.zero_division_error());
    }
    Ok(vm.new_float(a.rem_euclid(b)))
});
float_arith!(float_pow, "**", |vm, a, b| Ok(vm.new_float(a.powf(b))));

macro_rules! float_cmp {
    ($name:ident, $op:literal, $cmp:expr) => {
        fn $name(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
            let a = vm.num_to_float(&args[0])?;
            let b = float_rhs(vm, args, $op)?;
            let cmp: fn(f64, f64) -> bool = $cmp;
            Ok(vm.new_bool(cmp(a, b)))
        }
    };
}

float_cmp!(float_lt, "<", |a, b| a < b);
float_cmp!(float_le, "<=", |a, b| a <= b);
float_cmp!(float_gt, ">", |a, b| a > b);
float_cmp!(float_ge, ">=", |a, b| a >= b);

fn float_eq(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let a = vm.num_to_float(&args[0])?;
    let equal = match args[1].payload {
        Payload::Int(i) => a == i as f64,
        Payload::Float(f) => a == f,
        _ => false,
    };
    Ok(vm.new_bool(equal))
}

fn float_ne(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let eq = float_eq(vm, args)?;
    let truthy = vm.is_truthy(&eq)?;
    Ok(vm.new_bool(!truthy))
}

fn float_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::Float(f) = args[0].payload else {
        return Err(vm.type_error("expected 'float'"));
    };
    let mut buffer = ryu::Buffer::new();
    Ok(vm.new_str(buffer.format(f)))
}
