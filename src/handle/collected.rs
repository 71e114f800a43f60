//! Host-owned objects whose lifetime follows engine collection.
//!
//! A collected handle pairs host data with an engine-owned cell: when the
//! engine collects the cell, the host data is destroyed on the owning
//! thread. If the agent tears down first, the autorelease pool destroys
//! every remaining handle unconditionally; the engine fires no callbacks
//! after disposal.
//!
//! Used for host state that should live exactly as long as an engine
//! object: closure state too big for inline storage, wrapped host buffers.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use boa_engine::object::ObjectInitializer;
use boa_engine::{JsData, JsObject};
use boa_gc::{empty_trace, Finalize, Trace};

use crate::context::RealmScope;

type PoolCell = Rc<RefCell<Option<Box<dyn Any>>>>;

/// Arena-style pool of collected handles, cleared when the agent dies.
pub(crate) struct AutoreleasePool {
    entries: RefCell<Vec<PoolCell>>,
}

impl AutoreleasePool {
    pub(crate) fn new() -> Self {
        Self { entries: RefCell::new(Vec::new()) }
    }

    /// Adopt host data into the pool, yielding a handle that can later be
    /// bound to an engine object.
    pub(crate) fn adopt<T: 'static>(&self, value: T) -> CollectedHandle<T> {
        let cell: PoolCell = Rc::new(RefCell::new(Some(Box::new(value))));
        let mut entries = self.entries.borrow_mut();
        // Compact cells whose data was already collected.
        entries.retain(|entry| entry.borrow().is_some());
        entries.push(cell.clone());
        CollectedHandle { cell, _marker: PhantomData }
    }

    /// Number of handles whose host data is still alive.
    pub(crate) fn live(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.borrow().is_some())
            .count()
    }

    /// Destroy all remaining handles. Teardown only.
    pub(crate) fn clear(&self) {
        for entry in self.entries.borrow_mut().drain(..) {
            entry.borrow_mut().take();
        }
    }
}

/// The engine half of a collected handle: an object whose collection
/// releases the pool slot.
#[derive(Debug, Finalize)]
struct CollectedCell {
    cell: PoolCell,
}

impl JsData for CollectedCell {}

// The cell holds no engine values.
unsafe impl Trace for CollectedCell {
    empty_trace!();
}

impl Drop for CollectedCell {
    fn drop(&mut self) {
        self.cell.borrow_mut().take();
    }
}

/// Host-side access to pool-owned data tied to an engine weak reference.
pub struct CollectedHandle<T: 'static> {
    cell: PoolCell,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Clone for CollectedHandle<T> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone(), _marker: PhantomData }
    }
}

impl<T: 'static> CollectedHandle<T> {
    /// Whether the engine (or the pool) has destroyed the data yet.
    pub fn is_live(&self) -> bool {
        self.cell.borrow().is_some()
    }

    /// Borrow the host data, if it is still alive.
    pub fn with<R>(&self, body: impl FnOnce(&T) -> R) -> Option<R> {
        let cell = self.cell.borrow();
        let value = cell.as_ref()?.downcast_ref::<T>()?;
        Some(body(value))
    }
}

impl<'lock, 'host> RealmScope<'lock, 'host> {
    /// Adopt host data into the agent's autorelease pool and bind it to a
    /// fresh engine object in this realm. When the engine collects the
    /// object the data is destroyed; when the agent tears down first, the
    /// pool destroys it.
    pub fn adopt<T: 'static>(&mut self, value: T) -> (CollectedHandle<T>, JsObject) {
        let handle = self.lock().host().pool.adopt(value);
        let cell = CollectedCell { cell: handle.cell.clone() };
        let object = ObjectInitializer::with_native_data(cell, self.context()).build();
        (handle, object)
    }
}
