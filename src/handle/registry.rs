//! The per-agent slot table backing remote handles.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::agent::AgentShared;

/// An engine-owned value pinned by a remote handle. Holding it here roots
/// it for the garbage collector.
pub(crate) enum Slot {
    Value(boa_engine::JsValue),
    Module(boa_engine::Module),
    Script(boa_engine::Script),
    Realm(boa_engine::realm::Realm),
}

/// Registry of live remote handles. Engine-thread only; the shared atomic
/// mirror makes the live count observable cross-thread.
pub(crate) struct Registry {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    shared: Arc<AgentShared>,
}

impl Registry {
    pub(crate) fn new(shared: Arc<AgentShared>) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), shared }
    }

    pub(crate) fn insert(&mut self, slot: Slot) -> u32 {
        self.shared.remote_count.fetch_add(1, Ordering::AcqRel);
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() as u32 - 1
            }
        }
    }

    pub(crate) fn get(&self, index: u32) -> Option<&Slot> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    /// Reset one persistent; the deferred half of a remote handle drop.
    pub(crate) fn release(&mut self, index: u32) {
        if let Some(entry) = self.slots.get_mut(index as usize) {
            if entry.take().is_some() {
                self.free.push(index);
                self.shared.remote_count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Teardown path: reset every persistent at once. Returns how many
    /// were live.
    pub(crate) fn clear(&mut self) -> usize {
        let mut cleared = 0;
        for entry in &mut self.slots {
            if entry.take().is_some() {
                cleared += 1;
            }
        }
        self.slots.clear();
        self.free.clear();
        self.shared.remote_count.store(0, Ordering::Release);
        cleared
    }
}
