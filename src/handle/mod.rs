//! Cross-thread persistent references into an agent's heap.
//!
//! A [`Remote<K>`] may be held and dropped on any host thread, but the
//! engine value it names can only be touched on the owning agent's
//! foreground thread. Dropping the last owner does not free the value
//! directly: it posts a handle-priority reset task to the owning agent's
//! runner, which clears the registry slot under the engine lock. During
//! agent teardown the registry is walked and every slot reset before the
//! engine is disposed; expiries that arrive later meet a defunct scheduler
//! and are dropped.

pub(crate) mod collected;
pub(crate) mod registry;

pub use collected::CollectedHandle;

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::agent::AgentShared;
use crate::context::AgentLock;
use crate::result::{Error, Result};

use registry::Slot;

/// Slot kind marker: a plain JavaScript value.
pub struct ValueKind;
/// Slot kind marker: a compiled module object.
pub struct ModuleKind;
/// Slot kind marker: a compiled script.
pub struct ScriptKind;
/// Slot kind marker: a realm.
pub struct RealmKind;

/// Maps a slot kind marker to its engine representation.
pub trait SlotKind: private::Sealed {
    type Engine: Clone;

    fn from_slot(slot: &Slot) -> Option<Self::Engine>;
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::ValueKind {}
    impl Sealed for super::ModuleKind {}
    impl Sealed for super::ScriptKind {}
    impl Sealed for super::RealmKind {}
}

impl SlotKind for ValueKind {
    type Engine = boa_engine::JsValue;

    fn from_slot(slot: &Slot) -> Option<Self::Engine> {
        match slot {
            Slot::Value(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl SlotKind for ModuleKind {
    type Engine = boa_engine::Module;

    fn from_slot(slot: &Slot) -> Option<Self::Engine> {
        match slot {
            Slot::Module(module) => Some(module.clone()),
            _ => None,
        }
    }
}

impl SlotKind for ScriptKind {
    type Engine = boa_engine::Script;

    fn from_slot(slot: &Slot) -> Option<Self::Engine> {
        match slot {
            Slot::Script(script) => Some(script.clone()),
            _ => None,
        }
    }
}

impl SlotKind for RealmKind {
    type Engine = boa_engine::realm::Realm;

    fn from_slot(slot: &Slot) -> Option<Self::Engine> {
        match slot {
            Slot::Realm(realm) => Some(realm.clone()),
            _ => None,
        }
    }
}

struct RemoteInner {
    slot: u32,
    agent: Weak<AgentShared>,
}

impl Drop for RemoteInner {
    fn drop(&mut self) {
        let Some(shared) = self.agent.upgrade() else {
            // Agent already gone; teardown reset the slot.
            return;
        };
        let slot = self.slot;
        // Deferred reset on the owning thread. If the scheduler is
        // defunct the task is dropped, which is fine: teardown already
        // cleared the registry.
        shared.runner.schedule_handle_task(Box::new(move |lock, _stop| {
            lock.host().registry.borrow_mut().release(slot);
        }));
    }
}

/// A thread-safe persistent reference to an engine-owned value of kind
/// `K`. Cloning shares ownership; the last drop schedules the deferred
/// reset.
pub struct Remote<K: SlotKind> {
    inner: Arc<RemoteInner>,
    _marker: PhantomData<fn() -> K>,
}

impl<K: SlotKind> Clone for Remote<K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), _marker: PhantomData }
    }
}

impl<K: SlotKind> Remote<K> {
    /// Take ownership of a freshly inserted registry slot. Must be called
    /// under the owning agent's lock.
    pub(crate) fn adopt(lock: &mut AgentLock<'_>, slot: u32) -> Self {
        let agent = Arc::downgrade(&lock.host().shared);
        Self {
            inner: Arc::new(RemoteInner { slot, agent }),
            _marker: PhantomData,
        }
    }

    pub(crate) fn slot(&self) -> u32 {
        self.inner.slot
    }

    /// Whether this handle belongs to the given agent.
    pub(crate) fn is_owned_by(&self, shared: &Arc<AgentShared>) -> bool {
        self.inner
            .agent
            .upgrade()
            .map(|owner| Arc::ptr_eq(&owner, shared))
            .unwrap_or(false)
    }

    /// Verify this handle belongs to the locked agent.
    pub(crate) fn check_environment(&self, lock: &mut AgentLock<'_>) -> Result<()> {
        let owner = self.inner.agent.upgrade();
        let matches = owner
            .map(|owner| Arc::ptr_eq(&owner, &lock.host().shared))
            .unwrap_or(false);
        if matches {
            Ok(())
        } else {
            Err(Error::logic("remote handle dereferenced against a foreign agent"))
        }
    }

    /// Dereference under the owning agent's lock.
    pub fn deref(&self, lock: &mut AgentLock<'_>) -> Result<K::Engine> {
        self.check_environment(lock)?;
        let registry = lock.host().registry.clone();
        let registry = registry.borrow();
        registry
            .get(self.slot())
            .and_then(K::from_slot)
            .ok_or_else(|| Error::logic("remote handle slot already reset"))
    }
}

impl<K: SlotKind> std::fmt::Debug for Remote<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Remote(slot = {})", self.inner.slot)
    }
}

impl<'host> AgentLock<'host> {
    /// Create a remote handle to a JavaScript value, pinning it in the
    /// agent's registry until the handle drops.
    pub fn remote_value(&mut self, value: boa_engine::JsValue) -> Remote<ValueKind> {
        let slot = self
            .host()
            .registry
            .borrow_mut()
            .insert(Slot::Value(value));
        Remote::adopt(self, slot)
    }
}
