//! Interned names.
//!
//! Attribute and variable names are small strings that repeat constantly
//! (`__init__`, `append`, loop variables). Names are shared `Rc<str>` handles;
//! the interner deduplicates them so equal names usually share one allocation
//! and clone for the price of a refcount bump.

use std::rc::Rc;

use ahash::AHashSet;

/// A shared, immutable name. Compares and hashes by string content.
pub type Name = Rc<str>;

/// Deduplicating pool of [`Name`] handles.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    pool: AHashSet<Name>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pooled handle for `s`, inserting it on first sight.
    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(name) = self.pool.get(s) {
            return name.clone();
        }
        let name: Name = Rc::from(s);
        self.pool.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_names_share_storage() {
        let mut interner = Interner::new();
        let a = interner.intern("__init__");
        let b = interner.intern("__init__");
        assert!(Rc::ptr_eq(&a, &b));
        let c = interner.intern("other");
        assert!(!Rc::ptr_eq(&a, &c));
    }
}
