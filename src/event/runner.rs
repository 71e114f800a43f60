//! Single-consumer binding of a task queue to one agent thread.
//!
//! The consumer loop lives in [`crate::agent`]; this type owns the shared
//! queue state, the condition variable predicated on "non-empty or stop
//! requested", and the scheduling entry points used by agent handles and
//! remote-handle expiry.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::trace;

use super::queue::TaskQueue;
use super::{AgentTask, Nestability, TaskPriority};
use crate::context::AgentLock;
use crate::scheduler::{StopSource, StopToken};

struct RunnerState {
    queue: TaskQueue<AgentTask>,
    /// Set by `terminate`; the consumer exits at the next scan.
    stopping: bool,
    /// Set once the queue is finalized; later pushes are dropped.
    defunct: bool,
    consumer: Option<ThreadId>,
}

/// The single consumer thread's view of one agent's task queue.
pub struct ForegroundRunner {
    state: Mutex<RunnerState>,
    wake: Condvar,
    stop: StopSource,
}

pub(crate) enum Popped {
    Task(AgentTask),
    Stopped,
}

impl ForegroundRunner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RunnerState {
                queue: TaskQueue::default(),
                stopping: false,
                defunct: false,
                consumer: None,
            }),
            wake: Condvar::new(),
            stop: StopSource::default(),
        })
    }

    /// Push at user-visible priority, non-nestable. Returns whether the
    /// task was accepted.
    pub(crate) fn schedule_client_task(&self, task: AgentTask) -> bool {
        self.schedule(TaskPriority::UserVisible, Nestability::NonNestable, task)
    }

    /// Push at user-blocking priority, nestable. Used for handle
    /// maintenance; the consumer drains this band ahead of client work,
    /// so a post from the consumer thread itself runs as soon as the
    /// current task returns.
    pub(crate) fn schedule_handle_task(&self, task: AgentTask) -> bool {
        self.schedule(TaskPriority::UserBlocking, Nestability::Nestable, task)
    }

    pub(crate) fn schedule(
        &self,
        priority: TaskPriority,
        nestability: Nestability,
        task: AgentTask,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.defunct {
            return false;
        }
        state.queue.push(priority, nestability, task);
        drop(state);
        self.wake.notify_one();
        true
    }

    pub(crate) fn schedule_delayed(
        &self,
        delay: Duration,
        priority: TaskPriority,
        nestability: Nestability,
        task: AgentTask,
    ) -> bool {
        let timeout = Instant::now() + delay;
        let mut state = self.state.lock().unwrap();
        if state.defunct {
            return false;
        }
        state.queue.push_delayed(timeout, priority, nestability, task);
        drop(state);
        // The consumer recomputes its deadline on every wake.
        self.wake.notify_one();
        true
    }

    /// Request stop on the consumer thread; returns without joining.
    pub(crate) fn terminate(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopping = true;
        self.stop.request_stop();
        drop(state);
        self.wake.notify_all();
    }

    /// The stop token observed by tasks run on this runner.
    pub(crate) fn stop_token(&self) -> StopToken {
        self.stop.token()
    }

    pub(crate) fn bind_consumer(&self) {
        self.state.lock().unwrap().consumer = Some(thread::current().id());
    }

    /// Blocking scan: flush delayed work, pop one task, or sleep until
    /// the next deadline / push / stop request.
    pub(crate) fn pop_blocking(&self) -> Popped {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(
            state.consumer,
            Some(thread::current().id()),
            "pop_blocking called off the consumer thread"
        );
        loop {
            if state.stopping {
                return Popped::Stopped;
            }
            let deadline = state.queue.flush_delayed(Instant::now());
            if let Some(entry) = state.queue.pop(false) {
                return Popped::Task(entry.task);
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    let wait = deadline.saturating_duration_since(now);
                    self.wake.wait_timeout(state, wait).unwrap().0
                }
                None => self.wake.wait(state).unwrap(),
            };
        }
    }

    /// Mark the queue defunct and drop every queued task without running
    /// it. Used when the engine never came up, so blocked callers observe
    /// their reply channels closing.
    pub(crate) fn poison(&self) {
        let dropped = {
            let mut state = self.state.lock().unwrap();
            state.defunct = true;
            state.stopping = true;
            state.queue.finalize()
        };
        trace!(tasks = dropped.len(), "poisoned foreground queue");
        drop(dropped);
    }

    /// Finalize the queue: run remaining user-blocking tasks with a
    /// non-cancellable stop token so teardown handlers complete, then
    /// drop the rest. Later pushes are discarded.
    pub(crate) fn finalize(&self, scope: &mut AgentLock<'_>) {
        let drained = {
            let mut state = self.state.lock().unwrap();
            state.defunct = true;
            state.queue.finalize()
        };
        trace!(tasks = drained.len(), "finalizing foreground queue");
        let token = StopToken::never();
        for task in drained {
            task(scope, &token);
        }
    }

    /// A view specialized to one priority, handed out where the engine
    /// (or host code) asks for a task runner.
    pub fn task_runner_for(self: &Arc<Self>, priority: TaskPriority) -> TaskRunnerView {
        TaskRunnerView { runner: Arc::clone(self), priority }
    }
}

/// A priority-specialized posting surface over a foreground runner, handed
/// out where the engine or host code asks for a task runner.
#[derive(Clone)]
pub struct TaskRunnerView {
    runner: Arc<ForegroundRunner>,
    priority: TaskPriority,
}

impl TaskRunnerView {
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Post a nestable task at this view's priority.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut AgentLock<'_>, &StopToken) + Send + 'static,
    {
        self.runner
            .schedule(self.priority, Nestability::Nestable, Box::new(task))
    }

    /// Post a task that must not run inside another task.
    pub fn post_non_nestable<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut AgentLock<'_>, &StopToken) + Send + 'static,
    {
        self.runner
            .schedule(self.priority, Nestability::NonNestable, Box::new(task))
    }

    /// Post a nestable task that becomes eligible after `delay`.
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(&mut AgentLock<'_>, &StopToken) + Send + 'static,
    {
        self.runner
            .schedule_delayed(delay, self.priority, Nestability::Nestable, Box::new(task))
    }
}
