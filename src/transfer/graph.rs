//! Reference-graph support: object identity across a transferred graph.
//!
//! A visitor that opts into a reference map probes the map on every object
//! it meets; a repeat visit emits a [`ReferenceIndex`] token instead of
//! revisiting. Each unique object is materialized exactly once into the
//! transfer's [`ReferenceStorage`], *registered before its children are
//! visited* (the deferred-receiver step), so cyclic graphs terminate.
//!
//! The product of a reference-preserving transfer is a
//! [`ReferentialValue`]: the root value (often itself just a reference
//! token) alongside the storage the tokens resolve against.

use crate::types::{ReferenceIndex, Value};

/// Index-keyed storage of materialized shared values. Indices are
/// allocated monotonically and never reused.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReferenceStorage {
    slots: Vec<Option<Value>>,
}

impl ReferenceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot ahead of materializing its value, so children can
    /// reference it while it is still under construction.
    pub fn allocate(&mut self) -> ReferenceIndex {
        self.slots.push(None);
        ReferenceIndex(self.slots.len() as u32 - 1)
    }

    /// Publish the finished value for a previously allocated slot.
    pub fn publish(&mut self, index: ReferenceIndex, value: Value) {
        self.slots[index.0 as usize] = Some(value);
    }

    pub fn resolve(&self, index: ReferenceIndex) -> Option<&Value> {
        self.slots.get(index.0 as usize).and_then(Option::as_ref)
    }

    /// Number of fully materialized values.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A value produced by a reference-preserving transfer, carrying the
/// storage its reference tokens resolve against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferentialValue {
    pub value: Value,
    pub references: ReferenceStorage,
}

impl ReferentialValue {
    /// A plain value with no shared substructure.
    pub fn plain(value: Value) -> Self {
        Self { value, references: ReferenceStorage::new() }
    }

    /// Resolve the root: a reference token dereferences into storage,
    /// anything else is returned as-is.
    pub fn root(&self) -> &Value {
        match &self.value {
            Value::Reference(index) => self
                .references
                .resolve(*index)
                .unwrap_or(&Value::Undefined),
            other => other,
        }
    }

    /// Resolve an arbitrary value of this graph one step.
    pub fn deref<'a>(&'a self, value: &'a Value) -> &'a Value {
        match value {
            Value::Reference(index) => self
                .references
                .resolve(*index)
                .unwrap_or(&Value::Undefined),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dictionary;

    #[test]
    fn storage_supports_cycles() {
        // o = {}; o.self = o: the slot is allocated before the children
        // are published, so the inner occurrence is a token.
        let mut storage = ReferenceStorage::new();
        let slot = storage.allocate();
        let mut object = Dictionary::new();
        object.insert("self".into(), Value::Reference(slot));
        storage.publish(slot, Value::Dictionary(object));

        let graph = ReferentialValue { value: Value::Reference(slot), references: storage };
        let root = graph.root();
        let inner = match root {
            Value::Dictionary(map) => map.get("self").unwrap(),
            _ => panic!("expected dictionary root"),
        };
        // Same identity: the inner token resolves to the root value.
        assert!(std::ptr::eq(graph.deref(inner), root));
    }

    #[test]
    fn indices_are_monotonic() {
        let mut storage = ReferenceStorage::new();
        let a = storage.allocate();
        let b = storage.allocate();
        assert_eq!(a, ReferenceIndex(0));
        assert_eq!(b, ReferenceIndex(1));
        storage.publish(a, Value::Int32(1));
        assert_eq!(storage.resolve(a), Some(&Value::Int32(1)));
        assert_eq!(storage.resolve(b), None);
    }
}
