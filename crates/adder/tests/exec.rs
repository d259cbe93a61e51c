//! End-to-end scenarios over hand-assembled code objects.
//!
//! The compiler is an external collaborator, so these tests drive the VM the
//! way a compiler backend would: assemble bytecode with `CodeBuilder`, hand
//! it to `run_code`, and observe output through the capture writer.

use std::rc::Rc;

use adder::{
    BlockKind, CodeBuilder, CodeObject, CollectStringPrint, CompileError, CompileMode, Function, NameScope,
    Opcode, ResourceLimits, SourceCompiler, Vm,
};
use pretty_assertions::assert_eq;

fn capture_vm() -> (Vm, CollectStringPrint) {
    let sink = CollectStringPrint::new();
    let vm = Vm::with_writer(Box::new(sink.clone()));
    (vm, sink)
}

fn exec_builder(name: &str) -> CodeBuilder {
    CodeBuilder::new(name, "<test>", CompileMode::Exec)
}

fn eval_builder(name: &str) -> CodeBuilder {
    CodeBuilder::new(name, "<test>", CompileMode::Eval)
}

/// Emits `LOAD_NAME print` and, after the argument emitter runs, the call and
/// discard of the result.
fn emit_print(b: &mut CodeBuilder, emit_args: impl FnOnce(&mut CodeBuilder) -> i32) {
    let print = b.add_name("print", NameScope::Global);
    b.emit_arg(Opcode::LoadName, print);
    let argc = emit_args(b);
    b.emit_arg(Opcode::Call, argc);
    b.emit(Opcode::PopTop);
}

#[test]
fn arithmetic_prints_seven() {
    // print(1 + 2 * 3)
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let one = b.add_const(vm.new_int(1));
    let two = b.add_const(vm.new_int(2));
    let three = b.add_const(vm.new_int(3));
    emit_print(&mut b, |b| {
        b.emit_arg(Opcode::LoadConst, one);
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::LoadConst, three);
        b.emit_arg(Opcode::BinaryOp, 2); // __mul__
        b.emit_arg(Opcode::BinaryOp, 0); // __add__
        1
    });
    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "7\n");
}

#[test]
fn tuple_unpack_prints_both_values() {
    // a, b = 1, 2
    // print(a, b)
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let a = b.add_name("a", NameScope::Global);
    let bn = b.add_name("b", NameScope::Global);
    let one = b.add_const(vm.new_int(1));
    let two = b.add_const(vm.new_int(2));
    b.emit_arg(Opcode::LoadNameRef, a);
    b.emit_arg(Opcode::LoadNameRef, bn);
    b.emit_arg(Opcode::BuildSmartTuple, 2);
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::LoadConst, two);
    b.emit_arg(Opcode::BuildSmartTuple, 2);
    b.emit(Opcode::StoreRef);
    emit_print(&mut b, |b| {
        let a = b.add_name("a", NameScope::Global);
        let bn = b.add_name("b", NameScope::Global);
        b.emit_arg(Opcode::LoadName, a);
        b.emit_arg(Opcode::LoadName, bn);
        2
    });
    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "1 2\n");
}

#[test]
fn tuple_unpack_round_trips() {
    // a, b, c = [10, 20, 30]; then (a, b, c) reads back the same sequence.
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    for name in ["a", "b", "c"] {
        let idx = b.add_name(name, NameScope::Global);
        b.emit_arg(Opcode::LoadNameRef, idx);
    }
    b.emit_arg(Opcode::BuildSmartTuple, 3);
    for value in [10, 20, 30] {
        let idx = b.add_const(vm.new_int(value));
        b.emit_arg(Opcode::LoadConst, idx);
    }
    b.emit_arg(Opcode::BuildList, 3);
    b.emit(Opcode::StoreRef);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_some(), "{}", sink.error_output());

    let mut b = eval_builder("<probe>");
    for name in ["a", "b", "c"] {
        let idx = b.add_name(name, NameScope::Global);
        b.emit_arg(Opcode::LoadName, idx);
    }
    b.emit_arg(Opcode::BuildSmartTuple, 3);
    let value = vm.run_code(&Rc::new(b.build()), None).expect("probe failed");
    let items = value.sequence_items().expect("expected a tuple");
    let ints: Vec<i64> = items.iter().map(|v| v.int_value().unwrap()).collect();
    assert_eq!(ints, vec![10, 20, 30]);
}

/// `def f(): yield 1; yield 2` as a hand-assembled generator code object.
fn two_yield_generator(vm: &Vm) -> Function {
    let mut b = exec_builder("f");
    b.set_generator();
    let one = b.add_const(vm.new_int(1));
    let two = b.add_const(vm.new_int(2));
    b.emit_arg(Opcode::LoadConst, one);
    b.emit(Opcode::YieldValue);
    b.emit_arg(Opcode::LoadConst, two);
    b.emit(Opcode::YieldValue);
    Function::new(Rc::from("f"), Rc::new(b.build()), Vec::new())
}

#[test]
fn generator_for_loop_prints_values() {
    // def f(): yield 1; yield 2
    // for x in f(): print(x)
    let (mut vm, sink) = capture_vm();
    let f = vm.new_function(two_yield_generator(&vm));

    let mut b = exec_builder("<module>");
    let f_const = b.add_const(f);
    b.emit_arg(Opcode::LoadConst, f_const);
    b.emit(Opcode::StoreFunction);

    let x = b.add_name("x", NameScope::Global);
    let f_name = b.add_name("f", NameScope::Global);
    b.emit_arg(Opcode::LoadNameRef, x);
    b.emit_arg(Opcode::LoadName, f_name);
    b.emit_arg(Opcode::Call, 0);
    b.emit(Opcode::GetIter);
    b.enter_block(BlockKind::For);
    b.emit(Opcode::ForIter);
    emit_print(&mut b, |b| {
        let x = b.add_name("x", NameScope::Global);
        b.emit_arg(Opcode::LoadName, x);
        1
    });
    b.emit(Opcode::LoopContinue);
    b.exit_block();
    b.emit(Opcode::PopTop); // the iterator

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "1\n2\n");
}

#[test]
fn exhausted_generator_keeps_reporting_none() {
    // g = f(); [next(g), next(g), next(g), next(g)]
    let (mut vm, sink) = capture_vm();
    let f = vm.new_function(two_yield_generator(&vm));

    let mut b = eval_builder("<module>");
    let f_const = b.add_const(f);
    let g = b.add_name("g", NameScope::Global);
    b.emit_arg(Opcode::LoadConst, f_const);
    b.emit_arg(Opcode::Call, 0);
    b.emit_arg(Opcode::StoreName, g);
    let next = b.add_name("next", NameScope::Global);
    for _ in 0..4 {
        b.emit_arg(Opcode::LoadName, next);
        let g = b.add_name("g", NameScope::Global);
        b.emit_arg(Opcode::LoadName, g);
        b.emit_arg(Opcode::Call, 1);
    }
    b.emit_arg(Opcode::BuildList, 4);
    let value = vm.run_code(&Rc::new(b.build()), None).unwrap_or_else(|| {
        panic!("stderr: {}", sink.error_output());
    });
    let items = value.sequence_items().expect("expected a list");
    assert_eq!(items[0].int_value(), Some(1));
    assert_eq!(items[1].int_value(), Some(2));
    let none = vm.none();
    assert!(Rc::ptr_eq(&items[2], &none));
    assert!(Rc::ptr_eq(&items[3], &none));
}

#[test]
fn try_except_catches_and_prints_message() {
    // try: raise ValueError('x')
    // except ValueError as e: print(e)
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let msg = b.add_const(vm.new_str("x"));
    let value_error = b.add_name("ValueError", NameScope::Special);

    b.enter_block(BlockKind::Try);
    b.emit(Opcode::TryBlockEnter);
    b.emit_arg(Opcode::LoadConst, msg);
    b.emit_arg(Opcode::Raise, value_error);
    b.emit(Opcode::TryBlockExit);
    b.exit_block();

    // Handler: the in-flight exception is the single stack input.
    b.emit_arg(Opcode::ExceptionMatch, value_error);
    let to_reraise = b.emit_jump(Opcode::PopJumpIfFalse);
    let e = b.add_name("e", NameScope::Global);
    b.emit_arg(Opcode::StoreName, e);
    emit_print(&mut b, |b| {
        let e = b.add_name("e", NameScope::Global);
        b.emit_arg(Opcode::LoadName, e);
        1
    });
    let to_done = b.emit_jump(Opcode::JumpAbsolute);
    b.patch_jump(to_reraise);
    b.emit(Opcode::ReRaise);
    b.patch_jump(to_done);

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "x\n");
    assert_eq!(sink.error_output(), "");
}

#[test]
fn unmatched_handler_reraises_to_host() {
    // try: raise ValueError('boom')
    // except KeyError: ...        -> surfaces to the host
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let msg = b.add_const(vm.new_str("boom"));
    let value_error = b.add_name("ValueError", NameScope::Special);
    let key_error = b.add_name("KeyError", NameScope::Special);

    b.enter_block(BlockKind::Try);
    b.emit(Opcode::TryBlockEnter);
    b.emit_arg(Opcode::LoadConst, msg);
    b.emit_arg(Opcode::Raise, value_error);
    b.emit(Opcode::TryBlockExit);
    b.exit_block();

    b.emit_arg(Opcode::ExceptionMatch, key_error);
    let to_reraise = b.emit_jump(Opcode::PopJumpIfFalse);
    b.emit(Opcode::PopTop);
    let to_done = b.emit_jump(Opcode::JumpAbsolute);
    b.patch_jump(to_reraise);
    b.emit(Opcode::ReRaise);
    b.patch_jump(to_done);

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_none());
    assert!(sink.error_output().contains("ValueError: boom"), "{}", sink.error_output());
}

#[test]
fn class_hierarchy_reports_class_name() {
    // class A: pass
    // class B(A): pass
    // print(B().__class__.__name__)
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let a = b.add_name("A", NameScope::Global);
    let bn = b.add_name("B", NameScope::Global);

    b.emit(Opcode::LoadNone); // method terminator
    b.emit(Opcode::LoadNone); // base -> object
    b.emit_arg(Opcode::BuildClass, a);

    b.emit(Opcode::LoadNone);
    b.emit_arg(Opcode::LoadName, a);
    b.emit_arg(Opcode::BuildClass, bn);

    let class_attr = b.add_name("__class__", NameScope::Attr);
    let name_attr = b.add_name("__name__", NameScope::Attr);
    emit_print(&mut b, |b| {
        let bn = b.add_name("B", NameScope::Global);
        b.emit_arg(Opcode::LoadName, bn);
        b.emit_arg(Opcode::Call, 0);
        b.emit_arg(Opcode::BuildAttr, (class_attr << 1) | 1);
        b.emit_arg(Opcode::BuildAttr, (name_attr << 1) | 1);
        1
    });

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "B\n");
}

/// `def f(n): return f(n + 1)` against a given recursion limit.
fn unbounded_recursion(vm: &Vm) -> Function {
    let mut b = exec_builder("f");
    let f = b.add_name("f", NameScope::Global);
    let n = b.add_name("n", NameScope::Local);
    let one = b.add_const(vm.new_int(1));
    b.emit_arg(Opcode::LoadName, f);
    b.emit_arg(Opcode::LoadName, n);
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::BinaryOp, 0);
    b.emit_arg(Opcode::Call, 1);
    b.emit(Opcode::ReturnValue);
    Function::new(Rc::from("f"), Rc::new(b.build()), vec![Rc::from("n")])
}

#[test]
fn infinite_recursion_surfaces_recursion_error_and_resets() {
    let sink = CollectStringPrint::new();
    let mut vm = Vm::with_options(Box::new(sink.clone()), ResourceLimits { max_recursion_depth: 32 });
    let f = vm.new_function(unbounded_recursion(&vm));

    let mut b = exec_builder("<module>");
    let f_const = b.add_const(f);
    b.emit_arg(Opcode::LoadConst, f_const);
    b.emit(Opcode::StoreFunction);
    let f_name = b.add_name("f", NameScope::Global);
    let zero = b.add_const(vm.new_int(0));
    b.emit_arg(Opcode::LoadName, f_name);
    b.emit_arg(Opcode::LoadConst, zero);
    b.emit_arg(Opcode::Call, 1);
    b.emit(Opcode::PopTop);

    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    let err = sink.error_output();
    assert!(err.contains("RecursionError: maximum recursion depth exceeded"), "{err}");
    assert!(err.contains("Traceback (most recent call last):"), "{err}");
    assert!(err.contains("line"), "{err}");

    // The call stack was reset: the VM still runs fresh code.
    let mut b = eval_builder("<probe>");
    let seven = b.add_const(vm.new_int(7));
    b.emit_arg(Opcode::LoadConst, seven);
    let value = vm.run_code(&Rc::new(b.build()), None).expect("vm unusable after reset");
    assert_eq!(value.int_value(), Some(7));
}

/// `def f(n): if n == 0: return 0; return f(n - 1)`
fn bounded_recursion(vm: &Vm) -> Function {
    let mut b = exec_builder("f");
    let f = b.add_name("f", NameScope::Global);
    let n = b.add_name("n", NameScope::Local);
    let zero = b.add_const(vm.new_int(0));
    let one = b.add_const(vm.new_int(1));
    b.emit_arg(Opcode::LoadName, n);
    b.emit_arg(Opcode::LoadConst, zero);
    b.emit_arg(Opcode::CompareOp, 2); // __eq__
    let recurse = b.emit_jump(Opcode::PopJumpIfFalse);
    b.emit_arg(Opcode::LoadConst, zero);
    b.emit(Opcode::ReturnValue);
    b.patch_jump(recurse);
    b.emit_arg(Opcode::LoadName, f);
    b.emit_arg(Opcode::LoadName, n);
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::BinaryOp, 1); // __sub__
    b.emit_arg(Opcode::Call, 1);
    b.emit(Opcode::ReturnValue);
    Function::new(Rc::from("f"), Rc::new(b.build()), vec![Rc::from("n")])
}

#[test]
fn recursion_succeeds_at_limit_and_fails_one_past_it() {
    // With a limit of L frames, the module frame leaves room for L - 1 calls
    // of f; f(L - 2) therefore succeeds and f(L - 1) raises.
    let limit = 16usize;
    let run = |depth: i64| -> (Option<i64>, String) {
        let sink = CollectStringPrint::new();
        let mut vm = Vm::with_options(
            Box::new(sink.clone()),
            ResourceLimits {
                max_recursion_depth: limit,
            },
        );
        let f = vm.new_function(bounded_recursion(&vm));
        let mut b = eval_builder("<module>");
        let f_const = b.add_const(f);
        b.emit_arg(Opcode::LoadConst, f_const);
        b.emit(Opcode::StoreFunction);
        let f_name = b.add_name("f", NameScope::Global);
        let d = b.add_const(vm.new_int(depth));
        b.emit_arg(Opcode::LoadName, f_name);
        b.emit_arg(Opcode::LoadConst, d);
        b.emit_arg(Opcode::Call, 1);
        let result = vm.run_code(&Rc::new(b.build()), None);
        (result.and_then(|v| v.int_value()), sink.error_output())
    };

    let (ok, err) = run(limit as i64 - 2);
    assert_eq!(ok, Some(0), "{err}");
    let (failed, err) = run(limit as i64 - 1);
    assert_eq!(failed, None);
    assert!(err.contains("RecursionError"), "{err}");
}

#[test]
fn while_loop_with_break_prints_final_count() {
    // i = 0
    // while True: i = i + 1; if i == 3: break
    // print(i)
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let i = b.add_name("i", NameScope::Global);
    let zero = b.add_const(vm.new_int(0));
    let one = b.add_const(vm.new_int(1));
    let three = b.add_const(vm.new_int(3));
    b.emit_arg(Opcode::LoadConst, zero);
    b.emit_arg(Opcode::StoreName, i);

    b.enter_block(BlockKind::While);
    b.emit_arg(Opcode::LoadName, i);
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::BinaryOp, 0);
    b.emit_arg(Opcode::StoreName, i);
    b.emit_arg(Opcode::LoadName, i);
    b.emit_arg(Opcode::LoadConst, three);
    b.emit_arg(Opcode::CompareOp, 2); // __eq__
    let no_break = b.emit_jump(Opcode::PopJumpIfFalse);
    b.emit(Opcode::LoopBreak);
    b.patch_jump(no_break);
    b.emit(Opcode::LoopContinue);
    b.exit_block();

    emit_print(&mut b, |b| {
        let i = b.add_name("i", NameScope::Global);
        b.emit_arg(Opcode::LoadName, i);
        1
    });

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "3\n");
}

#[test]
fn safe_jump_out_of_try_block_truncates_stack() {
    // Leftover operands inside the try block must vanish when the jump
    // leaves it: EXEC termination then sees an empty stack.
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let junk = b.add_const(vm.new_int(99));
    b.enter_block(BlockKind::Try);
    b.emit(Opcode::TryBlockEnter);
    b.emit_arg(Opcode::LoadConst, junk);
    b.emit_arg(Opcode::LoadConst, junk);
    let out = b.emit_jump(Opcode::SafeJumpAbsolute);
    b.emit(Opcode::TryBlockExit);
    b.exit_block();
    b.emit(Opcode::ReRaise); // handler; never reached
    b.patch_jump(out);
    b.emit(Opcode::NoOp);

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.error_output(), "");
}

#[test]
fn goto_jumps_to_label_and_missing_label_raises() {
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let target = b.add_name("end", NameScope::Special);
    b.emit_arg(Opcode::Goto, target);
    emit_print(&mut b, |b| {
        let skipped = b.add_const(vm.new_str("skipped"));
        b.emit_arg(Opcode::LoadConst, skipped);
        1
    });
    b.add_label("end");
    b.emit(Opcode::NoOp);
    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "");

    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let missing = b.add_name("nowhere", NameScope::Special);
    b.emit_arg(Opcode::Goto, missing);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    assert!(
        sink.error_output().contains("KeyError: label 'nowhere' not found"),
        "{}",
        sink.error_output()
    );
}

#[test]
fn with_block_calls_enter_and_exit() {
    // class CM: __enter__/__exit__ print markers
    // ctx = CM()
    // with ctx: print('body')
    let (mut vm, sink) = capture_vm();

    let marker_method = |vm: &Vm, name: &str, marker: &str| -> Function {
        let mut b = exec_builder(name);
        let print = b.add_name("print", NameScope::Global);
        let text = b.add_const(vm.new_str(marker));
        b.emit_arg(Opcode::LoadName, print);
        b.emit_arg(Opcode::LoadConst, text);
        b.emit_arg(Opcode::Call, 1);
        b.emit(Opcode::PopTop);
        b.emit(Opcode::LoadNone);
        b.emit(Opcode::ReturnValue);
        Function::new(Rc::from(name), Rc::new(b.build()), vec![Rc::from("self")])
    };
    let enter = vm.new_function(marker_method(&vm, "__enter__", "enter"));
    let exit = vm.new_function(marker_method(&vm, "__exit__", "exit"));

    let mut b = exec_builder("<module>");
    let cm = b.add_name("CM", NameScope::Global);
    let ctx = b.add_name("ctx", NameScope::Global);
    let enter_const = b.add_const(enter);
    let exit_const = b.add_const(exit);
    b.emit(Opcode::LoadNone); // method terminator
    b.emit_arg(Opcode::LoadConst, enter_const);
    b.emit_arg(Opcode::LoadConst, exit_const);
    b.emit(Opcode::LoadNone); // base
    b.emit_arg(Opcode::BuildClass, cm);

    b.emit_arg(Opcode::LoadName, cm);
    b.emit_arg(Opcode::Call, 0);
    b.emit_arg(Opcode::StoreName, ctx);

    b.emit_arg(Opcode::LoadName, ctx);
    b.emit(Opcode::WithEnter);
    emit_print(&mut b, |b| {
        let body = b.add_const(vm.new_str("body"));
        b.emit_arg(Opcode::LoadConst, body);
        1
    });
    b.emit_arg(Opcode::LoadName, ctx);
    b.emit(Opcode::WithExit);

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "enter\nbody\nexit\n");
}

#[test]
fn super_delegates_method_lookup_to_base() {
    // class A: def tag(self): return 'A'
    // class B(A): def tag(self): return super(self).tag() + 'B'
    // print(B().tag())
    let (mut vm, sink) = capture_vm();

    let a_tag = {
        let mut b = exec_builder("tag");
        let a_str = b.add_const(vm.new_str("A"));
        b.emit_arg(Opcode::LoadConst, a_str);
        b.emit(Opcode::ReturnValue);
        vm.new_function(Function::new(Rc::from("tag"), Rc::new(b.build()), vec![Rc::from("self")]))
    };
    let b_tag = {
        let mut b = exec_builder("tag");
        let sup = b.add_name("super", NameScope::Global);
        let selfn = b.add_name("self", NameScope::Local);
        let tag_attr = b.add_name("tag", NameScope::Attr);
        let b_str = b.add_const(vm.new_str("B"));
        b.emit_arg(Opcode::LoadName, sup);
        b.emit_arg(Opcode::LoadName, selfn);
        b.emit_arg(Opcode::Call, 1);
        b.emit_arg(Opcode::BuildAttr, (tag_attr << 1) | 1);
        b.emit_arg(Opcode::Call, 0);
        b.emit_arg(Opcode::LoadConst, b_str);
        b.emit_arg(Opcode::BinaryOp, 0); // str concat
        b.emit(Opcode::ReturnValue);
        vm.new_function(Function::new(Rc::from("tag"), Rc::new(b.build()), vec![Rc::from("self")]))
    };

    let mut b = exec_builder("<module>");
    let a = b.add_name("A", NameScope::Global);
    let bn = b.add_name("B", NameScope::Global);
    let a_tag_const = b.add_const(a_tag);
    let b_tag_const = b.add_const(b_tag);

    b.emit(Opcode::LoadNone);
    b.emit_arg(Opcode::LoadConst, a_tag_const);
    b.emit(Opcode::LoadNone);
    b.emit_arg(Opcode::BuildClass, a);

    b.emit(Opcode::LoadNone);
    b.emit_arg(Opcode::LoadConst, b_tag_const);
    b.emit_arg(Opcode::LoadName, a);
    b.emit_arg(Opcode::BuildClass, bn);

    let tag_attr = b.add_name("tag", NameScope::Attr);
    emit_print(&mut b, |b| {
        let bn = b.add_name("B", NameScope::Global);
        b.emit_arg(Opcode::LoadName, bn);
        b.emit_arg(Opcode::Call, 0);
        b.emit_arg(Opcode::BuildAttr, (tag_attr << 1) | 1);
        b.emit_arg(Opcode::Call, 0);
        1
    });

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "AB\n");
}

#[test]
fn division_by_zero_raises() {
    let (mut vm, sink) = capture_vm();
    let mut b = eval_builder("<module>");
    let one = b.add_const(vm.new_int(1));
    let zero = b.add_const(vm.new_int(0));
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::LoadConst, zero);
    b.emit_arg(Opcode::BinaryOp, 3); // __truediv__
    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    assert!(
        sink.error_output().contains("ZeroDivisionError: division by zero"),
        "{}",
        sink.error_output()
    );
}

#[test]
fn negative_indices_normalise_and_overflow_raises() {
    // xs = [1, 2, 3]; xs[-1] == 3, xs[3] -> IndexError
    let (mut vm, sink) = capture_vm();
    let mut b = eval_builder("<module>");
    let xs = b.add_name("xs", NameScope::Global);
    for value in [1, 2, 3] {
        let idx = b.add_const(vm.new_int(value));
        b.emit_arg(Opcode::LoadConst, idx);
    }
    b.emit_arg(Opcode::BuildList, 3);
    b.emit_arg(Opcode::StoreName, xs);
    let minus_one = b.add_const(vm.new_int(-1));
    b.emit_arg(Opcode::LoadName, xs);
    b.emit_arg(Opcode::LoadConst, minus_one);
    b.emit_arg(Opcode::BuildIndex, 1); // r-value
    let value = vm.run_code(&Rc::new(b.build()), None).unwrap_or_else(|| {
        panic!("stderr: {}", sink.error_output());
    });
    assert_eq!(value.int_value(), Some(3));

    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let xs = b.add_name("xs", NameScope::Global);
    for value in [1, 2, 3] {
        let idx = b.add_const(vm.new_int(value));
        b.emit_arg(Opcode::LoadConst, idx);
    }
    b.emit_arg(Opcode::BuildList, 3);
    b.emit_arg(Opcode::StoreName, xs);
    let three = b.add_const(vm.new_int(3));
    b.emit_arg(Opcode::LoadName, xs);
    b.emit_arg(Opcode::LoadConst, three);
    b.emit_arg(Opcode::BuildIndex, 1);
    b.emit(Opcode::PopTop);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    assert!(sink.error_output().contains("IndexError"), "{}", sink.error_output());
}

#[test]
fn build_map_and_set_round_trip_through_containers() {
    // d = {'k': 1}; print(d['k']); s = {2, 2, 3}; print(len(s), 2 in s)
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let d = b.add_name("d", NameScope::Global);
    let k = b.add_const(vm.new_str("k"));
    let one = b.add_const(vm.new_int(1));
    b.emit_arg(Opcode::LoadConst, k);
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::BuildMap, 1);
    b.emit_arg(Opcode::StoreName, d);
    emit_print(&mut b, |b| {
        let d = b.add_name("d", NameScope::Global);
        let k = b.add_const(vm.new_str("k"));
        b.emit_arg(Opcode::LoadName, d);
        b.emit_arg(Opcode::LoadConst, k);
        b.emit_arg(Opcode::BuildIndex, 1);
        1
    });

    let s = b.add_name("s", NameScope::Global);
    let two = b.add_const(vm.new_int(2));
    let three = b.add_const(vm.new_int(3));
    b.emit_arg(Opcode::LoadConst, two);
    b.emit_arg(Opcode::LoadConst, two);
    b.emit_arg(Opcode::LoadConst, three);
    b.emit_arg(Opcode::BuildSet, 3);
    b.emit_arg(Opcode::StoreName, s);
    emit_print(&mut b, |b| {
        let len = b.add_name("len", NameScope::Global);
        let s = b.add_name("s", NameScope::Global);
        let two = b.add_const(vm.new_int(2));
        b.emit_arg(Opcode::LoadName, len);
        b.emit_arg(Opcode::LoadName, s);
        b.emit_arg(Opcode::Call, 1);
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::LoadName, s);
        b.emit_arg(Opcode::ContainsOp, 0);
        2
    });

    let result = vm.run_code(&Rc::new(b.build()), None);
    assert!(result.is_some(), "stderr: {}", sink.error_output());
    assert_eq!(sink.output(), "1\n2 True\n");
}

#[test]
fn boolean_short_circuit_jumps() {
    // False and 99 -> False; True or 99 -> True
    let (mut vm, sink) = capture_vm();
    let mut b = eval_builder("<and>");
    b.emit(Opcode::LoadFalse);
    let end = b.emit_jump(Opcode::JumpIfFalseOrPop);
    let ninety_nine = b.add_const(vm.new_int(99));
    b.emit_arg(Opcode::LoadConst, ninety_nine);
    b.patch_jump(end);
    let value = vm.run_code(&Rc::new(b.build()), None).unwrap_or_else(|| {
        panic!("stderr: {}", sink.error_output());
    });
    assert_eq!(value.bool_value(), Some(false));

    let mut b = eval_builder("<or>");
    b.emit(Opcode::LoadTrue);
    let end = b.emit_jump(Opcode::JumpIfTrueOrPop);
    let ninety_nine = b.add_const(vm.new_int(99));
    b.emit_arg(Opcode::LoadConst, ninety_nine);
    b.patch_jump(end);
    let value = vm.run_code(&Rc::new(b.build()), None).expect("or chain failed");
    assert_eq!(value.bool_value(), Some(true));
}

#[test]
fn build_string_concatenates_coerced_pieces() {
    let (mut vm, sink) = capture_vm();
    let mut b = eval_builder("<module>");
    let ab = b.add_const(vm.new_str("ab"));
    let seven = b.add_const(vm.new_int(7));
    let c = b.add_const(vm.new_str("c"));
    b.emit_arg(Opcode::LoadConst, ab);
    b.emit_arg(Opcode::LoadConst, seven);
    b.emit_arg(Opcode::LoadConst, c);
    b.emit_arg(Opcode::BuildString, 3);
    let value = vm.run_code(&Rc::new(b.build()), None).unwrap_or_else(|| {
        panic!("stderr: {}", sink.error_output());
    });
    assert_eq!(value.str_value(), Some("ab7c"));
}

#[test]
fn failing_assert_raises_assertion_error() {
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let msg = b.add_const(vm.new_str("broken invariant"));
    b.emit(Opcode::LoadFalse);
    b.emit_arg(Opcode::LoadConst, msg);
    b.emit(Opcode::Assert);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    assert!(
        sink.error_output().contains("AssertionError: broken invariant"),
        "{}",
        sink.error_output()
    );
}

#[test]
fn delete_ref_unbinds_names() {
    // x = 1; del x; x -> NameError
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let x = b.add_name("x", NameScope::Global);
    let one = b.add_const(vm.new_int(1));
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::StoreName, x);
    b.emit_arg(Opcode::LoadNameRef, x);
    b.emit(Opcode::DeleteRef);
    b.emit_arg(Opcode::LoadName, x);
    b.emit(Opcode::PopTop);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    assert!(
        sink.error_output().contains("NameError: name 'x' is not defined"),
        "{}",
        sink.error_output()
    );
}

#[test]
fn list_append_opcode_grows_the_comprehension_target() {
    // Comprehension shape: the list sits below the iteration scratch slot.
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let out = b.add_name("out", NameScope::Global);
    let scratch = b.add_const(vm.new_int(0));
    let five = b.add_const(vm.new_int(5));
    b.emit_arg(Opcode::BuildList, 0);
    b.emit_arg(Opcode::LoadConst, scratch);
    b.emit_arg(Opcode::LoadConst, five);
    b.emit(Opcode::ListAppend);
    b.emit(Opcode::PopTop); // scratch
    b.emit_arg(Opcode::StoreName, out);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_some(), "{}", sink.error_output());

    let mut b = eval_builder("<probe>");
    let out = b.add_name("out", NameScope::Global);
    b.emit_arg(Opcode::LoadName, out);
    let value = vm.run_code(&Rc::new(b.build()), None).expect("probe failed");
    let items = value.sequence_items().expect("expected a list");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].int_value(), Some(5));
}

// ---------------------------------------------------------------- compiler-backed

/// Table compiler covering the sources these tests import or eval.
#[derive(Debug)]
struct TableCompiler;

impl SourceCompiler for TableCompiler {
    fn compile(&self, vm: &Vm, source: &str, filename: &str, _mode: CompileMode) -> Result<CodeObject, CompileError> {
        match source {
            "ANSWER = 42" => {
                let mut b = CodeBuilder::new("<module>", filename, CompileMode::Exec);
                let answer = b.add_name("ANSWER", NameScope::Global);
                let forty_two = b.add_const(vm.new_int(42));
                b.emit_arg(Opcode::LoadConst, forty_two);
                b.emit_arg(Opcode::StoreName, answer);
                Ok(b.build())
            }
            "1 + 1" => {
                let mut b = CodeBuilder::new("<eval>", filename, CompileMode::Eval);
                let one = b.add_const(vm.new_int(1));
                b.emit_arg(Opcode::LoadConst, one);
                b.emit_arg(Opcode::LoadConst, one);
                b.emit_arg(Opcode::BinaryOp, 0);
                Ok(b.build())
            }
            other => Err(CompileError {
                msg: format!("unexpected source: {other}"),
            }),
        }
    }
}

#[test]
fn lazy_module_imports_on_first_use() {
    let (mut vm, sink) = capture_vm();
    vm.set_compiler(Box::new(TableCompiler));
    vm.add_lazy_module("answers", "ANSWER = 42");

    let mut b = eval_builder("<module>");
    let answers = b.add_name("answers", NameScope::Global);
    let answer_attr = b.add_name("ANSWER", NameScope::Attr);
    b.emit_arg(Opcode::ImportName, answers);
    b.emit_arg(Opcode::BuildAttr, (answer_attr << 1) | 1);
    let value = vm.run_code(&Rc::new(b.build()), None).unwrap_or_else(|| {
        panic!("stderr: {}", sink.error_output());
    });
    assert_eq!(value.int_value(), Some(42));
}

#[test]
fn unknown_module_raises_import_error() {
    let (mut vm, sink) = capture_vm();
    let mut b = exec_builder("<module>");
    let nope = b.add_name("nope", NameScope::Global);
    b.emit_arg(Opcode::ImportName, nope);
    b.emit(Opcode::PopTop);
    assert!(vm.run_code(&Rc::new(b.build()), None).is_none());
    assert!(
        sink.error_output().contains("ImportError: module 'nope' not found"),
        "{}",
        sink.error_output()
    );
}

#[test]
fn load_eval_fn_evaluates_source() {
    let (mut vm, sink) = capture_vm();
    vm.set_compiler(Box::new(TableCompiler));
    let mut b = eval_builder("<module>");
    let src = b.add_const(vm.new_str("1 + 1"));
    b.emit(Opcode::LoadEvalFn);
    b.emit_arg(Opcode::LoadConst, src);
    b.emit_arg(Opcode::Call, 1);
    let value = vm.run_code(&Rc::new(b.build()), None).unwrap_or_else(|| {
        panic!("stderr: {}", sink.error_output());
    });
    assert_eq!(value.int_value(), Some(2));
}

#[test]
fn disassembly_lists_instructions_and_pools() {
    let (mut vm, _sink) = capture_vm();
    let mut b = exec_builder("<module>");
    b.set_line(1);
    let one = b.add_const(vm.new_int(1));
    let x = b.add_name("x", NameScope::Global);
    b.emit_arg(Opcode::LoadConst, one);
    b.emit_arg(Opcode::StoreName, x);
    b.set_line(2);
    let jump = b.emit_jump(Opcode::JumpAbsolute);
    b.patch_jump(jump);
    b.emit(Opcode::NoOp);
    let co = Rc::new(b.build());
    let listing = vm.disassemble(&co);
    assert!(listing.contains("<module>:"), "{listing}");
    assert!(listing.contains("LOAD_CONST"), "{listing}");
    assert!(listing.contains("(1)"), "{listing}");
    assert!(listing.contains("STORE_NAME"), "{listing}");
    assert!(listing.contains("-> "), "{listing}");
    assert!(listing.contains("co_consts: [1]"), "{listing}");
    assert!(listing.contains("co_names: ['x']"), "{listing}");
}
