//! Hash container backing the `dict` and `set` builtin types.
//!
//! Entries are insertion-ordered and keyed by the VM's total hash plus
//! structural equality over the hashable builtins (int, bool, float, str,
//! type, tuple). The caller computes the hash (hashing can raise); the
//! container itself never calls back into the VM.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::object::{Payload, PyVar};

/// A pre-hashed dict key.
#[derive(Debug)]
pub(crate) struct DictKey {
    pub hash: i64,
    pub key: PyVar,
}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i64(self.hash);
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && hashable_eq(&self.key, &other.key)
    }
}

impl Eq for DictKey {}

/// Structural equality over the hashable builtins.
///
/// Anything else compares by identity; unhashable values never become keys,
/// so the identity lane only covers type objects in practice.
pub(crate) fn hashable_eq(a: &PyVar, b: &PyVar) -> bool {
    match (&a.payload, &b.payload) {
        (Payload::Int(x), Payload::Int(y)) => x == y,
        (Payload::Bool(x), Payload::Bool(y)) => x == y,
        (Payload::Float(x), Payload::Float(y)) => x == y,
        (Payload::Str(x), Payload::Str(y)) => x == y,
        (Payload::Tuple(x), Payload::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| hashable_eq(l, r))
        }
        _ => std::rc::Rc::ptr_eq(a, b),
    }
}

/// Insertion-ordered mapping of pre-hashed handles to handles.
#[derive(Debug, Default)]
pub(crate) struct Dict {
    entries: IndexMap<DictKey, PyVar, ahash::RandomState>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, hash: i64, key: PyVar, value: PyVar) {
        self.entries.insert(DictKey { hash, key }, value);
    }

    pub fn get(&self, hash: i64, key: &PyVar) -> Option<PyVar> {
        self.entries.get(&DictKey { hash, key: key.clone() }).cloned()
    }

    pub fn remove(&mut self, hash: i64, key: &PyVar) -> Option<PyVar> {
        self.entries.shift_remove(&DictKey { hash, key: key.clone() })
    }

    pub fn contains(&self, hash: i64, key: &PyVar) -> bool {
        self.entries.contains_key(&DictKey { hash, key: key.clone() })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in insertion order, for repr and iteration.
    pub fn pairs(&self) -> impl Iterator<Item = (&PyVar, &PyVar)> {
        self.entries.iter().map(|(k, v)| (&k.key, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{PyObject, Type};

    fn int(i: i64) -> PyVar {
        PyObject::new(Type(3), Payload::Int(i))
    }

    fn s(v: &str) -> PyVar {
        PyObject::new(Type(5), Payload::Str(v.into()))
    }

    #[test]
    fn set_get_remove_round_trip() {
        let mut d = Dict::new();
        d.set(42, int(42), s("a"));
        d.set(7, s("seven"), s("b"));
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(42, &int(42)).unwrap().str_value(), Some("a"));
        assert_eq!(d.get(7, &s("seven")).unwrap().str_value(), Some("b"));
        assert!(d.get(42, &int(43)).is_none());
        assert!(d.remove(42, &int(42)).is_some());
        assert!(!d.contains(42, &int(42)));
    }

    #[test]
    fn insert_overwrites_equal_key() {
        let mut d = Dict::new();
        d.set(1, int(1), s("first"));
        d.set(1, int(1), s("second"));
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(1, &int(1)).unwrap().str_value(), Some("second"));
    }

    #[test]
    fn equal_hash_different_key_stays_distinct() {
        let mut d = Dict::new();
        d.set(9, int(9), s("int"));
        d.set(9, s("nine"), s("str"));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn pairs_iterate_in_insertion_order() {
        let mut d = Dict::new();
        d.set(2, int(2), s("x"));
        d.set(1, int(1), s("y"));
        let keys: Vec<i64> = d.pairs().map(|(k, _)| k.int_value().unwrap()).collect();
        assert_eq!(keys, vec![2, 1]);
    }
}
