//! Hierarchical worker-thread scheduler.
//!
//! A [`Layer`] is a container node whose children are other layers or
//! [`Runner`]s; a runner owns live worker threads. Stop requests cascade
//! down the graph, and a parent never finishes destruction while a child
//! exists. Threads register themselves before `spawn` returns, so a thread
//! can safely outlive the call site that spawned it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use smallvec::SmallVec;
use tracing::trace;

/// Cooperative cancellation token handed to every scheduled task.
///
/// Polling is advisory; long-running native work should check it. The
/// [`StopToken::never`] token is used while finalizing a queue so teardown
/// handlers run to completion.
#[derive(Debug, Clone)]
pub struct StopToken {
    flag: Option<Arc<AtomicBool>>,
}

impl StopToken {
    /// A token that never reports a stop request.
    pub fn never() -> Self {
        Self { flag: None }
    }

    pub fn stop_requested(&self) -> bool {
        match &self.flag {
            Some(flag) => flag.load(Ordering::Acquire),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StopSource {
    flag: Arc<AtomicBool>,
}

impl StopSource {
    pub(crate) fn token(&self) -> StopToken {
        StopToken { flag: Some(self.flag.clone()) }
    }

    pub(crate) fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// A node that can receive a cascaded stop request.
trait Stoppable: Send + Sync {
    fn request_stop(&self);
}

/// Child bookkeeping held by a layer. Children unregister themselves on
/// drop and notify the parent's condvar so `Drop` can wait for an empty
/// list.
struct Children {
    list: Mutex<SmallVec<[(usize, Weak<dyn Stoppable>); 4]>>,
    drained: Condvar,
    closed: AtomicBool,
}

impl Children {
    fn new() -> Self {
        Self {
            list: Mutex::new(SmallVec::new()),
            drained: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn insert(&self, id: usize, child: Weak<dyn Stoppable>) {
        self.list.lock().unwrap().push((id, child));
    }

    fn remove(&self, id: usize) {
        let mut list = self.list.lock().unwrap();
        list.retain(|(child_id, _)| *child_id != id);
        if list.len() <= 1 {
            self.drained.notify_all();
        }
    }

    fn request_stop(&self) {
        // Stop requests are delivered once; later cascades are no-ops.
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let list = self.list.lock().unwrap();
        for (_, child) in list.iter() {
            if let Some(child) = child.upgrade() {
                child.request_stop();
            }
        }
    }

    fn close(&self) {
        self.request_stop();
        let mut list = self.list.lock().unwrap();
        loop {
            list.retain(|(_, child)| child.strong_count() > 0);
            if list.is_empty() {
                return;
            }
            list = self.drained.wait(list).unwrap();
        }
    }
}

struct LayerInner {
    children: Children,
    parent: Option<Weak<LayerInner>>,
}

impl Stoppable for LayerInner {
    fn request_stop(&self) {
        self.children.request_stop();
    }
}

/// Container node of the scheduler graph. On destruction all children are
/// closed before continuing.
pub struct Layer {
    inner: Arc<LayerInner>,
}

impl Layer {
    /// A root layer with no parent.
    pub fn root() -> Self {
        Self {
            inner: Arc::new(LayerInner { children: Children::new(), parent: None }),
        }
    }

    /// A layer nested under `parent`.
    pub fn child_of(parent: &Layer) -> Self {
        let inner = Arc::new(LayerInner {
            children: Children::new(),
            parent: Some(Arc::downgrade(&parent.inner)),
        });
        parent.inner.children.insert(
            Arc::as_ptr(&inner) as usize,
            Arc::downgrade(&inner) as Weak<dyn Stoppable>,
        );
        Self { inner }
    }

    /// Cascade a stop request to every descendant. No-op if already
    /// stopped.
    pub fn request_stop(&self) {
        self.inner.children.request_stop();
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        self.inner.children.close();
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent.children.remove(Arc::as_ptr(&self.inner) as usize);
        }
    }
}

struct ThreadEntry {
    id: Option<thread::ThreadId>,
    stop: StopSource,
}

struct RunnerInner {
    threads: Mutex<SmallVec<[(usize, ThreadEntry); 4]>>,
    drained: Condvar,
    open: AtomicBool,
    next_id: Mutex<usize>,
}

impl RunnerInner {
    fn new() -> Self {
        Self {
            threads: Mutex::new(SmallVec::new()),
            drained: Condvar::new(),
            open: AtomicBool::new(true),
            next_id: Mutex::new(0),
        }
    }

    fn spawn<F>(self: &Arc<Self>, task: F) -> bool
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let entry_id;
        let token;
        {
            let mut threads = self.threads.lock().unwrap();
            if !self.open.load(Ordering::Acquire) {
                return false;
            }
            let mut next = self.next_id.lock().unwrap();
            entry_id = *next;
            *next += 1;
            drop(next);
            let entry = ThreadEntry { id: None, stop: StopSource::default() };
            token = entry.stop.token();
            // Registered before the thread exists: the spawn site may
            // return (and even drop its handle) while the thread runs.
            threads.push((entry_id, entry));
        }
        let inner = Arc::clone(self);
        let builder = thread::Builder::new().name("isolet-worker".into());
        let spawned = builder.spawn(move || {
            {
                let mut threads = inner.threads.lock().unwrap();
                if let Some((_, entry)) = threads.iter_mut().find(|(id, _)| *id == entry_id) {
                    entry.id = Some(thread::current().id());
                }
            }
            task(token);
            let mut threads = inner.threads.lock().unwrap();
            threads.retain(|(id, _)| *id != entry_id);
            if threads.len() <= 1 {
                inner.drained.notify_all();
            }
        });
        if spawned.is_err() {
            let mut threads = self.threads.lock().unwrap();
            threads.retain(|(id, _)| *id != entry_id);
            return false;
        }
        true
    }

    /// Wait for every thread not identified with the calling thread to
    /// drain, requesting their stop first.
    fn close_threads(&self) {
        let current = thread::current().id();
        let mut threads = self.threads.lock().unwrap();
        for (_, entry) in threads.iter() {
            entry.stop.request_stop();
        }
        loop {
            let all_self = threads
                .iter()
                .all(|(_, entry)| entry.id == Some(current));
            if all_self {
                return;
            }
            let (next, _timeout) = self
                .drained
                .wait_timeout(threads, Duration::from_millis(50))
                .unwrap();
            threads = next;
            for (_, entry) in threads.iter() {
                entry.stop.request_stop();
            }
        }
    }
}

impl Stoppable for RunnerInner {
    fn request_stop(&self) {
        let threads = self.threads.lock().unwrap();
        for (_, entry) in threads.iter() {
            entry.stop.request_stop();
        }
    }
}

/// Dispatches and owns worker threads. Each spawn launches a dedicated
/// thread running `task(stop_token)`.
pub struct Runner {
    inner: Arc<RunnerInner>,
    parent: Weak<LayerInner>,
}

impl Runner {
    pub fn new(parent: &Layer) -> Self {
        let inner = Arc::new(RunnerInner::new());
        parent.inner.children.insert(
            Arc::as_ptr(&inner) as usize,
            Arc::downgrade(&inner) as Weak<dyn Stoppable>,
        );
        Self { inner, parent: Arc::downgrade(&parent.inner) }
    }

    /// Launch a worker thread. Returns once the thread is registered.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        self.inner.spawn(task)
    }

    pub fn close_threads(&self) {
        self.inner.close_threads();
    }

    pub fn request_stop(&self) {
        Stoppable::request_stop(&*self.inner);
    }

    /// A shareable handle that may schedule for as long as the runner is
    /// open.
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle { inner: self.inner.clone() }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        trace!("closing runner threads");
        self.inner.open.store(false, Ordering::Release);
        self.inner.close_threads();
        if let Some(parent) = self.parent.upgrade() {
            parent.children.remove(Arc::as_ptr(&self.inner) as usize);
        }
    }
}

/// Shareable handle to a runner's thread pool.
#[derive(Clone)]
pub struct RunnerHandle {
    inner: Arc<RunnerInner>,
}

impl RunnerHandle {
    /// Spawn if the runner is still open; returns whether a thread was
    /// launched.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        self.inner.spawn(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn spawn_runs_and_drains() {
        let root = Layer::root();
        let runner = Runner::new(&root);
        let (tx, rx) = mpsc::channel();
        assert!(runner.spawn(move |_stop| {
            tx.send(7usize).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), 7);
        runner.close_threads();
    }

    #[test]
    fn stop_cascades_from_layer() {
        let root = Layer::root();
        let child = Layer::child_of(&root);
        let runner = Runner::new(&child);
        let started = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicBool::new(false));
        {
            let started = started.clone();
            let observed = observed.clone();
            runner.spawn(move |stop| {
                started.store(true, Ordering::SeqCst);
                while !stop.stop_requested() {
                    thread::sleep(Duration::from_millis(1));
                }
                observed.store(true, Ordering::SeqCst);
            });
        }
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        root.request_stop();
        runner.close_threads();
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn handle_refuses_after_close() {
        let root = Layer::root();
        let runner = Runner::new(&root);
        let handle = runner.handle();
        drop(runner);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let spawned = handle.spawn(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!spawned);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
