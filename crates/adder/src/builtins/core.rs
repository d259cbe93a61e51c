//! Object/type/Exception methods, conversions, and the builtins-module
//! functions.

use std::rc::Rc;

use crate::{
    code::CompileMode,
    exception::RunResult,
    function::Args,
    object::{NameDict, Payload, PyObject, PyVar},
    vm::{Vm, attr::escape_str},
};

pub(super) fn register(vm: &mut Vm) {
    // Public type names on the builtins module.
    let builtins = vm.builtins.clone();
    for name in ["type", "object", "bool", "int", "float", "str", "list", "tuple", "range"] {
        let ty = vm.type_by_name(name).expect("built-in type missing");
        let key = vm.intern(name);
        builtins.set_own_attr(key, ty);
    }

    let object_ty = vm.type_by_name("object").expect("object type missing");
    vm.bind_method(&object_ty, "__repr__", 0, object_repr);
    vm.bind_method(&object_ty, "__eq__", 1, object_eq);
    vm.bind_method(&object_ty, "__ne__", 1, object_ne);

    let type_ty = vm.type_by_name("type").expect("type type missing");
    vm.bind_func(&type_ty, "__new__", 1, type_new);

    let bool_ty = vm.type_by_name("bool").expect("bool type missing");
    vm.bind_func(&bool_ty, "__new__", 1, bool_new);
    vm.bind_method(&bool_ty, "__repr__", 0, bool_repr);

    let int_ty = vm.type_by_name("int").expect("int type missing");
    vm.bind_func(&int_ty, "__new__", 1, int_new);

    let float_ty = vm.type_by_name("float").expect("float type missing");
    vm.bind_func(&float_ty, "__new__", 1, float_new);

    let str_ty = vm.type_by_name("str").expect("str type missing");
    vm.bind_func(&str_ty, "__new__", 1, str_new);

    let none_ty = vm.type_by_name("NoneType").expect("NoneType missing");
    vm.bind_method(&none_ty, "__repr__", 0, none_repr);

    let ellipsis_ty = vm.type_by_name("ellipsis").expect("ellipsis type missing");
    vm.bind_method(&ellipsis_ty, "__repr__", 0, ellipsis_repr);

    let exc_ty = vm.type_by_name("Exception").expect("Exception type missing");
    vm.bind_method(&exc_ty, "__repr__", 0, exception_repr);
    vm.bind_method(&exc_ty, "__str__", 0, exception_str);

    vm.bind_func(&builtins, "print", -1, builtin_print);
    vm.bind_func(&builtins, "len", 1, builtin_len);
    vm.bind_func(&builtins, "repr", 1, builtin_repr);
    vm.bind_func(&builtins, "hash", 1, builtin_hash);
    vm.bind_func(&builtins, "id", 1, builtin_id);
    vm.bind_func(&builtins, "iter", 1, builtin_iter);
    vm.bind_func(&builtins, "next", 1, builtin_next);
    vm.bind_func(&builtins, "super", 1, builtin_super);
    vm.bind_func(&builtins, "eval", 1, builtin_eval);
}

fn object_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let ty = vm.obj_type_name(&args[0]);
    let addr = Rc::as_ptr(&args[0]) as usize;
    Ok(vm.new_str(&format!("<{ty} object at {addr:#x}>")))
}

fn object_eq(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_bool(Rc::ptr_eq(&args[0], &args[1])))
}

fn object_ne(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_bool(!Rc::ptr_eq(&args[0], &args[1])))
}

fn type_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.type_of(&args[0]))
}

fn bool_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    vm.as_bool(&arg)
}

fn bool_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::Bool(b) = args[0].payload else {
        return Err(vm.type_error("expected 'bool'"));
    };
    Ok(vm.new_str(if b { "True" } else { "False" }))
}

fn int_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    match &args[0].payload {
        Payload::Int(_) => Ok(args[0].clone()),
        Payload::Bool(b) => Ok(vm.new_int(i64::from(*b))),
        Payload::Float(f) => Ok(vm.new_int(f.trunc() as i64)),
        Payload::Str(s) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(vm.new_int(i)),
            Err(_) => {
                let msg = format!("invalid literal for int(): {}", escape_str(s));
                Err(vm.value_error(msg))
            }
        },
        _ => {
            let ty = vm.obj_type_name(&args[0]);
            Err(vm.type_error(format!("int() argument must be a number or str, not '{ty}'")))
        }
    }
}

fn float_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    match &args[0].payload {
        Payload::Float(_) => Ok(args[0].clone()),
        Payload::Int(i) => Ok(vm.new_float(*i as f64)),
        Payload::Bool(b) => Ok(vm.new_float(f64::from(u8::from(*b)))),
        Payload::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) => Ok(vm.new_float(f)),
            Err(_) => {
                let msg = format!("invalid literal for float(): {}", escape_str(s));
                Err(vm.value_error(msg))
            }
        },
        _ => {
            let ty = vm.obj_type_name(&args[0]);
            Err(vm.type_error(format!("float() argument must be a number or str, not '{ty}'")))
        }
    }
}

fn str_new(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    vm.as_str(&arg)
}

fn none_repr(vm: &mut Vm, _args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_str("None"))
}

fn ellipsis_repr(vm: &mut Vm, _args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_str("..."))
}

fn exception_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::Exception(exc) = &args[0].payload else {
        return Err(vm.type_error("expected 'Exception'"));
    };
    let (name, msg) = {
        let exc = exc.borrow();
        (exc.type_name.clone(), exc.msg.clone())
    };
    Ok(vm.new_str(&format!("{name}({})", escape_str(&msg))))
}

fn exception_str(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let Payload::Exception(exc) = &args[0].payload else {
        return Err(vm.type_error("expected 'Exception'"));
    };
    let msg = exc.borrow().msg.clone();
    Ok(vm.new_str(&msg))
}

fn builtin_print(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let mut pieces = Vec::with_capacity(args.len());
    for arg in args.iter() {
        pieces.push(vm.str_of(arg)?);
    }
    let mut line = pieces.join(" ");
    line.push('\n');
    vm.writer.stdout_write(&line);
    Ok(vm.none.clone())
}

fn builtin_len(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    vm.fast_call("__len__", smallvec::smallvec![arg])
}

fn builtin_repr(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    vm.as_repr(&arg)
}

fn builtin_hash(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    let h = vm.hash(&arg)?;
    Ok(vm.new_int(h))
}

fn builtin_id(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(vm.new_int(Rc::as_ptr(&args[0]) as i64))
}

fn builtin_iter(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    match vm.make_iterator(&arg)? {
        Some(iter_obj) => Ok(iter_obj),
        None => {
            let ty = vm.obj_type_name(&arg);
            Err(vm.type_error(format!("'{ty}' object is not iterable")))
        }
    }
}

fn builtin_next(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let arg = args[0].clone();
    match vm.iter_next(&arg)? {
        Some(value) => Ok(value),
        None => Ok(vm.none.clone()),
    }
}

fn builtin_super(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    Ok(PyObject::new(vm.tp_super, Payload::Super(args[0].clone())))
}

fn builtin_eval(vm: &mut Vm, args: &mut Args) -> RunResult<PyVar> {
    let source = vm.cast_str(&args[0])?;
    let code = vm.compile(&source, "<eval>", CompileMode::Eval)?;
    let module = vm.frame().module.clone();
    vm.exec_code(code, module, NameDict::default())
}
