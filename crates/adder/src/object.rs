//! The object model: shared handles, type tags, and payloads.
//!
//! Every runtime value is a [`PyVar`] — a shared-ownership handle to a heap
//! [`PyObject`]. An object carries a type tag into the VM's type table, an
//! optional attribute dictionary, and an intrinsic payload. Cyclic graphs
//! between user objects are possible and tolerated; the handle model is plain
//! reference counting.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    dict::Dict,
    exception::PyException,
    function::{Function, NativeFunc},
    intern::Name,
    iter::PyIter,
    refs::Ref,
};

/// Shared-ownership handle to a runtime object.
///
/// Clone is a refcount bump. Identity (`is`) is pointer equality.
pub type PyVar = Rc<PyObject>;

/// Insertion-order attribute mapping (name → handle).
pub(crate) type NameDict = IndexMap<Name, PyVar, ahash::RandomState>;

/// Index of a type object in the VM's type table, used as the fast type tag.
///
/// Tags are immutable once assigned; the table only grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type(pub(crate) u32);

impl Type {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A heap object: type tag, optional attribute map, intrinsic payload.
#[derive(Debug)]
pub struct PyObject {
    pub(crate) ty: Type,
    pub(crate) attrs: Option<RefCell<NameDict>>,
    pub(crate) payload: Payload,
}

/// The intrinsic value carried by an object.
///
/// `Dummy` is the distinguished placeholder used by instances, modules, and
/// the internal sentinels, whose state lives entirely in the attribute map
/// (or nowhere at all).
#[derive(Debug)]
pub(crate) enum Payload {
    Dummy,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Box<str>),
    List(RefCell<Vec<PyVar>>),
    Tuple(Box<[PyVar]>),
    Function(Rc<Function>),
    Native(NativeFunc),
    Iter(RefCell<PyIter>),
    BoundMethod(BoundMethod),
    Slice(Slice),
    Range(Range),
    Ref(Ref),
    Dict(RefCell<Dict>),
    Exception(RefCell<PyException>),
    /// Payload of a type object: the tag this type represents.
    TypeIndex(Type),
    /// Payload of a `super` proxy: the wrapped object (possibly another proxy).
    Super(PyVar),
}

/// The implicit binding of a self object with a function pulled from its type.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub obj: PyVar,
    pub method: PyVar,
}

/// `slice(start, stop)` — both bounds optional.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
}

/// `range(start, stop, step)` with a non-zero step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> i64 {
        let span = if self.step > 0 {
            self.stop - self.start
        } else {
            self.start - self.stop
        };
        if span <= 0 {
            return 0;
        }
        let step = self.step.abs();
        (span + step - 1) / step
    }
}

impl PyObject {
    /// Creates an object without an attribute map.
    pub(crate) fn new(ty: Type, payload: Payload) -> PyVar {
        Rc::new(Self {
            ty,
            attrs: None,
            payload,
        })
    }

    /// Creates an object with an (empty) attribute map.
    ///
    /// Type objects, modules, functions, and bare instances are the only
    /// objects with valid attribute maps; everything else rejects attribute
    /// writes.
    pub(crate) fn new_with_attrs(ty: Type, payload: Payload) -> PyVar {
        Rc::new(Self {
            ty,
            attrs: Some(RefCell::new(NameDict::default())),
            payload,
        })
    }

    pub(crate) fn is_attr_valid(&self) -> bool {
        self.attrs.is_some()
    }

    /// Reads an own attribute (no type-chain walk, no binding).
    pub(crate) fn get_own_attr(&self, name: &str) -> Option<PyVar> {
        self.attrs.as_ref()?.borrow().get(name).cloned()
    }

    /// Writes an own attribute. The caller must have checked `is_attr_valid`.
    pub(crate) fn set_own_attr(&self, name: Name, value: PyVar) {
        self.attrs
            .as_ref()
            .expect("attribute write on object without attribute map")
            .borrow_mut()
            .insert(name, value);
    }

    pub(crate) fn as_int(&self) -> Option<i64> {
        match self.payload {
            Payload::Int(i) => Some(i),
            _ => None,
        }
    }

    pub(crate) fn as_float(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_ref_payload(&self) -> Option<&Ref> {
        match &self.payload {
            Payload::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// The tag a type object stands for. Only valid on type objects.
    pub(crate) fn type_payload(&self) -> Option<Type> {
        match self.payload {
            Payload::TypeIndex(t) => Some(t),
            _ => None,
        }
    }

    // Public inspection helpers for hosts and integration tests.

    /// Returns the integer payload, if this is an `int`.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        self.as_int()
    }

    /// Returns the float payload, if this is a `float`.
    #[must_use]
    pub fn float_value(&self) -> Option<f64> {
        self.as_float()
    }

    /// Returns the string payload, if this is a `str`.
    #[must_use]
    pub fn str_value(&self) -> Option<&str> {
        self.as_str()
    }

    /// Returns the boolean payload, if this is a `bool`.
    #[must_use]
    pub fn bool_value(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Returns a snapshot of the element handles, if this is a list or tuple.
    #[must_use]
    pub fn sequence_items(&self) -> Option<Vec<PyVar>> {
        match &self.payload {
            Payload::List(items) => Some(items.borrow().clone()),
            Payload::Tuple(items) => Some(items.to_vec()),
            _ => None,
        }
    }
}
