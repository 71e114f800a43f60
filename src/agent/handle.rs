//! Reference-counted agent handles.
//!
//! An [`Agent`] participates in an owning reference count on the agent's
//! shared state; dropping the last owning handle begins teardown. A handle
//! can be severed by its cluster, after which schedule calls no-op.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::agent::AgentShared;
use crate::context::AgentLock;
use crate::event::{Nestability, TaskPriority};
use crate::result::{Error, Result};
use crate::scheduler::StopToken;

/// An owning handle to an agent.
///
/// Cloning increments the owning count; dropping the last owning handle
/// releases the agent's self-reference and begins asynchronous teardown
/// once the foreground scheduler drains.
pub struct Agent {
    pub(crate) shared: Arc<AgentShared>,
}

impl Agent {
    pub(crate) fn first_handle(shared: &Arc<AgentShared>) -> Self {
        shared.handle_count.fetch_add(1, Ordering::AcqRel);
        Self { shared: shared.clone() }
    }

    /// Schedule a client task against this agent. The task receives the
    /// engine lock witness and a stop token once the foreground thread
    /// picks it up; the clock ticks at the start of the task.
    ///
    /// Returns `false` if the agent is severed or already torn down.
    pub fn schedule<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut AgentLock<'_>, &StopToken) + Send + 'static,
    {
        if self.shared.is_severed() {
            return false;
        }
        self.shared.runner.schedule_client_task(Box::new(
            move |lock: &mut AgentLock<'_>, stop: &StopToken| {
                lock.begin_tick();
                task(lock, stop);
            },
        ))
    }

    /// Schedule blocking host work attached to this agent's lifetime onto
    /// a worker thread. The task receives a stop token wired into the
    /// cluster's stop cascade; it holds no engine lock.
    pub fn schedule_async<F>(&self, task: F) -> bool
    where
        F: FnOnce(&StopToken) + Send + 'static,
    {
        if self.shared.is_severed() {
            return false;
        }
        self.shared.async_pool.spawn(move |stop| task(&stop))
    }

    /// Schedule a client task after `delay` on the agent's delayed heap.
    pub fn schedule_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(&mut AgentLock<'_>, &StopToken) + Send + 'static,
    {
        if self.shared.is_severed() {
            return false;
        }
        self.shared.runner.schedule_delayed(
            delay,
            TaskPriority::UserVisible,
            Nestability::NonNestable,
            Box::new(move |lock: &mut AgentLock<'_>, stop: &StopToken| {
                lock.begin_tick();
                task(lock, stop);
            }),
        )
    }

    /// Schedule a task and block until it reports back. The convenience
    /// form of the `future`-returning operations; calling it from the
    /// agent's own foreground thread would deadlock and is a logic error.
    pub fn join<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut AgentLock<'_>) -> Result<T> + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        let scheduled = self.schedule(move |lock, _stop| {
            let _ = sender.send(task(lock));
        });
        if !scheduled {
            return Err(Error::Terminated);
        }
        receiver.recv().map_err(|_| Error::Terminated)?
    }

    /// Schedule at handle priority without advancing the clock; setup
    /// operations (realm creation, compilation) ride this path so the
    /// deterministic clock only ticks for evaluation tasks.
    pub(crate) fn join_untick<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut AgentLock<'_>) -> Result<T> + Send + 'static,
    {
        if self.shared.is_severed() {
            return Err(Error::Terminated);
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        let scheduled = self.shared.runner.schedule_handle_task(Box::new(
            move |lock: &mut AgentLock<'_>, _stop: &StopToken| {
                let _ = sender.send(task(lock));
            },
        ));
        if !scheduled {
            return Err(Error::Terminated);
        }
        receiver.recv().map_err(|_| Error::Terminated)?
    }

    /// A non-owning observer of this agent's teardown, usable after the
    /// last owning handle has dropped.
    pub fn disposal_watch(&self) -> DisposalWatch {
        DisposalWatch { shared: self.shared.clone() }
    }

    /// Mint an owning handle from shared state, if owners still remain.
    pub(crate) fn revive(shared: &Arc<AgentShared>) -> Option<Agent> {
        if shared.handle_count.load(Ordering::Acquire) == 0 {
            return None;
        }
        shared.handle_count.fetch_add(1, Ordering::AcqRel);
        Some(Agent { shared: shared.clone() })
    }

    /// A non-owning reference to this agent.
    pub fn downgrade(&self) -> WeakAgent {
        WeakAgent { shared: Arc::downgrade(&self.shared) }
    }

    /// A posting surface specialized to `priority` over this agent's
    /// foreground runner.
    pub fn task_runner(&self, priority: crate::event::TaskPriority) -> crate::event::TaskRunnerView {
        self.shared.runner.task_runner_for(priority)
    }

    /// Live remote handles registered against this agent. Observable from
    /// any thread; reaches zero before the engine is disposed.
    pub fn remote_handle_count(&self) -> usize {
        self.shared.remote_count.load(Ordering::Acquire)
    }

    /// Forcibly null the client connection without waiting for handles to
    /// drop. Subsequent schedule calls no-op.
    pub fn sever(&self) {
        self.shared.sever();
    }

    /// Block until the agent's engine has been disposed, up to `timeout`.
    /// Intended for shutdown sequencing and tests.
    pub fn wait_for_disposal(&self, timeout: Duration) -> bool {
        self.shared.wait_disposed(timeout)
    }
}

impl Clone for Agent {
    fn clone(&self) -> Self {
        self.shared.handle_count.fetch_add(1, Ordering::AcqRel);
        Self { shared: self.shared.clone() }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if self.shared.handle_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.begin_teardown();
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("handles", &self.shared.handle_count.load(Ordering::Relaxed))
            .field("severed", &self.shared.is_severed())
            .finish()
    }
}

/// Observes an agent's teardown without owning it. Holding one does not
/// keep the agent alive or delay disposal.
#[derive(Clone)]
pub struct DisposalWatch {
    shared: Arc<AgentShared>,
}

impl DisposalWatch {
    /// Block until the engine has been disposed, up to `timeout`.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.shared.wait_disposed(timeout)
    }

    /// Live remote-registry slots; reaches zero before engine disposal.
    pub fn remote_handle_count(&self) -> usize {
        self.shared.remote_count.load(Ordering::Acquire)
    }
}

/// A weak agent reference; upgrading fails once every owning handle has
/// dropped.
#[derive(Clone)]
pub struct WeakAgent {
    shared: Weak<AgentShared>,
}

impl WeakAgent {
    pub fn upgrade(&self) -> Option<Agent> {
        let shared = self.shared.upgrade()?;
        // Racing against the final drop: only revive while owners remain.
        if shared.handle_count.load(Ordering::Acquire) == 0 {
            return None;
        }
        shared.handle_count.fetch_add(1, Ordering::AcqRel);
        Some(Agent { shared })
    }
}
