//! Native iterator state, including suspended generators.
//!
//! Iterators are objects tagged `native_iterator` whose payload is a
//! [`PyIter`]: the attached destination reference installed by `GET_ITER`
//! plus the per-kind cursor. Advancement lives on the VM (the generator kind
//! re-enters the execution driver); see `vm::call`.

use crate::{frame::Frame, object::{PyVar, Range}};

/// Payload of a `native_iterator` object.
#[derive(Debug)]
pub(crate) struct PyIter {
    /// Destination reference (`_ref` object) the `FOR_ITER` opcode assigns
    /// produced values through. Installed by `GET_ITER`; a second `GET_ITER`
    /// over the same iterator overwrites it.
    pub var: Option<PyVar>,
    pub kind: IterKind,
}

impl PyIter {
    pub fn new(kind: IterKind) -> Self {
        Self { var: None, kind }
    }
}

#[derive(Debug)]
pub(crate) enum IterKind {
    Range(RangeIter),
    /// Cursor over a list; length is re-checked each step, so mutation during
    /// iteration shortens or extends the walk instead of invalidating it.
    List { obj: PyVar, index: usize },
    Tuple { obj: PyVar, index: usize },
    /// Character cursor over a string (byte offset of the next char).
    Str { obj: PyVar, offset: usize },
    Generator(Generator),
}

#[derive(Debug)]
pub(crate) struct RangeIter {
    pub current: i64,
    pub range: Range,
}

impl RangeIter {
    pub fn new(range: Range) -> Self {
        Self {
            current: range.start,
            range,
        }
    }

    /// Returns the next value of the range, or None when exhausted.
    pub fn step(&mut self) -> Option<i64> {
        let has_next = if self.range.step > 0 {
            self.current < self.range.stop
        } else {
            self.current > self.range.stop
        };
        if !has_next {
            return None;
        }
        let value = self.current;
        self.current += self.range.step;
        Some(value)
    }
}

/// Generator execution state: never run, suspended at a yield, or exhausted.
///
/// Once exhausted, every further resumption reports no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenState {
    New,
    Suspended,
    Exhausted,
}

/// A generator iterator: the nascent or suspended frame plus its state.
///
/// The frame migrates between this slot and the VM's call stack on each
/// resumption; the slot is empty exactly while the generator is running.
#[derive(Debug)]
pub(crate) struct Generator {
    pub frame: Option<Frame>,
    pub state: GenState,
}

impl Generator {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            state: GenState::New,
        }
    }
}
