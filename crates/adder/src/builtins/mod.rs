//! The minimal builtin library, registered through the native binder at VM
//! construction.
//!
//! - `core` — object/type/Exception methods, conversions, module functions
//! - `number` — int and float operator methods
//! - `string` — str methods
//! - `sequence` — list, tuple, range, dict, and set

mod core;
mod number;
mod sequence;
mod string;

use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    core::register(vm);
    number::register(vm);
    string::register(vm);
    sequence::register(vm);
}
