//! Disassembler.

use std::rc::Rc;

use crate::{code::{CodeObject, NO_ARG, Opcode}, object::Payload, vm::attr::escape_str, vm::Vm};

/// Left-justifies `s` to `width`; longer strings are left as-is.
fn pad(s: &str, width: usize) -> String {
    if s.len() >= width {
        return s.to_owned();
    }
    format!("{s:<width$}")
}

impl Vm {
    /// Renders a human-readable listing of `co`, its constant and name
    /// pools, and (recursively) every function in its constant pool.
    pub fn disassemble(&mut self, co: &Rc<CodeObject>) -> String {
        let jump_targets: Vec<usize> = co
            .codes
            .iter()
            .filter(|b| {
                matches!(
                    b.op,
                    Opcode::JumpAbsolute | Opcode::SafeJumpAbsolute | Opcode::PopJumpIfFalse
                )
            })
            .map(|b| b.arg as usize)
            .collect();

        let mut out = String::new();
        out.push_str(&"-".repeat(54));
        out.push('\n');
        out.push_str(&co.name);
        out.push_str(":\n");

        let mut prev_line: Option<u32> = None;
        for (i, byte) in co.codes.iter().enumerate() {
            let line = if prev_line == Some(byte.line) {
                String::new()
            } else {
                if prev_line.is_some() {
                    out.push('\n');
                }
                prev_line = Some(byte.line);
                byte.line.to_string()
            };

            let pointer = if jump_targets.contains(&i) { "-> " } else { "   " };
            out.push_str(&pad(&line, 8));
            out.push_str(pointer);
            out.push_str(&pad(&i.to_string(), 3));
            out.push(' ');
            out.push_str(&pad(&byte.op.to_string(), 20));
            out.push(' ');

            let mut arg_str = if byte.arg == NO_ARG {
                String::new()
            } else {
                byte.arg.to_string()
            };
            if byte.op == Opcode::LoadConst {
                let repr = self
                    .repr_of(&co.consts[byte.arg as usize].clone())
                    .unwrap_or_else(|_| "<unrepresentable>".into());
                arg_str.push_str(&format!(" ({repr})"));
            }
            if matches!(byte.op, Opcode::LoadNameRef | Opcode::LoadName | Opcode::Raise) {
                arg_str.push_str(&format!(" ({})", escape_str(&co.names[byte.arg as usize].0)));
            }
            out.push_str(&pad(&arg_str, 20)); // may overflow
            out.push_str(&co.blocks[byte.block as usize].describe());
            if i != co.codes.len() - 1 {
                out.push('\n');
            }
        }

        let consts_list = self.new_list(co.consts.clone());
        let consts_repr = self
            .repr_of(&consts_list)
            .unwrap_or_else(|_| "<unrepresentable>".into());
        let names_list = self.new_list(co.names.iter().map(|(n, _)| self.new_str(n)).collect());
        let names_repr = self
            .repr_of(&names_list)
            .unwrap_or_else(|_| "<unrepresentable>".into());
        out.push('\n');
        out.push_str("co_consts: ");
        out.push_str(&consts_repr);
        out.push('\n');
        out.push_str("co_names: ");
        out.push_str(&names_repr);
        out.push('\n');

        for value in &co.consts {
            if let Payload::Function(function) = &value.payload {
                out.push_str(&self.disassemble(&function.code));
            }
        }
        out
    }
}
