//! Agent lifecycle: the engine host and its foreground thread.
//!
//! An agent splits into two halves. [`AgentShared`] is the `Send + Sync`
//! half: the task queue, handle count, severance flag and teardown latch,
//! reachable from any host thread through [`Agent`](crate::agent::handle::Agent)
//! handles. [`AgentHost`] is the engine half (the boa context, scratch
//! realm, remote-handle registry, autorelease pool and module loader) and
//! lives on the stack of the foreground consumer thread for the agent's
//! whole life, which is what makes the engine lock protocol sound: at most
//! one thread can ever reach the engine, by construction.

pub(crate) mod handle;

pub use handle::{Agent, DisposalWatch, WeakAgent};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use boa_engine::job::{JobQueue, NativeJob};
use boa_engine::Context;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::context::AgentLock;
use crate::event::runner::{ForegroundRunner, Popped};
use crate::handle::registry::Registry;
use crate::handle::collected::AutoreleasePool;
use crate::module::loader::ShuttleLoader;
use crate::platform::{AgentCtx, CurrentAgentGuard, HOOKS};
use crate::scheduler::RunnerHandle;

/// Behavior record supplied at agent creation.
pub struct Behavior {
    pub clock: Clock,
    /// Seeds `Math.random` on first realm creation, then clears.
    pub random_seed: Option<f64>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self { clock: Clock::system(), random_seed: None }
    }
}

impl Behavior {
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock, random_seed: None }
    }

    pub fn random_seed(mut self, seed: f64) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

/// The `Send + Sync` half of an agent.
pub(crate) struct AgentShared {
    pub(crate) runner: Arc<ForegroundRunner>,
    /// Worker layer for `schedule_async`; shares the cluster's threads.
    pub(crate) async_pool: RunnerHandle,
    /// Owning handle count; the last drop begins teardown.
    pub(crate) handle_count: AtomicUsize,
    pub(crate) severed: AtomicBool,
    /// Live remote-registry slots, mirrored for cross-thread observation.
    pub(crate) remote_count: AtomicUsize,
    disposed: Mutex<bool>,
    disposed_signal: Condvar,
}

impl AgentShared {
    fn new(async_pool: RunnerHandle) -> Arc<Self> {
        Arc::new(Self {
            runner: ForegroundRunner::new(),
            async_pool,
            handle_count: AtomicUsize::new(0),
            severed: AtomicBool::new(false),
            remote_count: AtomicUsize::new(0),
            disposed: Mutex::new(false),
            disposed_signal: Condvar::new(),
        })
    }

    pub(crate) fn is_severed(&self) -> bool {
        self.severed.load(Ordering::Acquire)
    }

    /// Null out the client connection: subsequent schedules no-op. Does
    /// not wait for the handle count to reach zero.
    pub(crate) fn sever(&self) {
        self.severed.store(true, Ordering::Release);
        self.runner.terminate();
    }

    pub(crate) fn begin_teardown(&self) {
        trace!("agent teardown requested");
        self.runner.terminate();
    }

    fn mark_disposed(&self) {
        *self.disposed.lock().unwrap() = true;
        self.disposed_signal.notify_all();
    }

    pub(crate) fn wait_disposed(&self, timeout: std::time::Duration) -> bool {
        let guard = self.disposed.lock().unwrap();
        let (guard, _) = self
            .disposed_signal
            .wait_timeout_while(guard, timeout, |disposed| !*disposed)
            .unwrap();
        *guard
    }
}

/// A pollable promise-job queue, drained to completion at the end of each
/// evaluation step.
#[derive(Default)]
pub(crate) struct AgentJobQueue(RefCell<VecDeque<NativeJob>>);

impl AgentJobQueue {
    fn next(&self) -> Option<NativeJob> {
        self.0.borrow_mut().pop_front()
    }
}

impl JobQueue for AgentJobQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        self.0.borrow_mut().push_back(job);
    }

    fn enqueue_future_job(&self, future: boa_engine::job::FutureJob, context: &mut Context) {
        // No reactor on the foreground thread; resolve inline.
        let job = futures_lite_block_on(future);
        self.enqueue_promise_job(job, context);
    }

    fn run_jobs(&self, context: &mut Context) {
        while let Some(job) = self.next() {
            // A failed job surfaces through the promise it belongs to.
            let _ = job.call(context);
        }
    }
}

/// Minimal executor for the rare engine-produced future job.
fn futures_lite_block_on<F: std::future::Future>(future: F) -> F::Output {
    use std::task::{Context as TaskContext, Poll, RawWaker, RawWakerVTable, Waker};

    fn noop_raw_waker() -> RawWaker {
        fn clone(_: *const ()) -> RawWaker {
            noop_raw_waker()
        }
        fn noop(_: *const ()) {}
        RawWaker::new(std::ptr::null(), &RawWakerVTable::new(clone, noop, noop, noop))
    }

    let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
    let mut task_context = TaskContext::from_waker(&waker);
    let mut future = std::pin::pin!(future);
    loop {
        match future.as_mut().poll(&mut task_context) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}

/// The engine half of an agent. Owned by the foreground consumer thread.
pub(crate) struct AgentHost {
    pub(crate) context: Context,
    /// Clock and seed latch, installed thread-locally during each tick.
    pub(crate) ctx: Rc<AgentCtx>,
    pub(crate) registry: Rc<RefCell<Registry>>,
    pub(crate) pool: AutoreleasePool,
    pub(crate) loader: Rc<ShuttleLoader>,
    /// Weakly-held scratch realm, lazily created for compilation when no
    /// user realm is active.
    pub(crate) scratch_realm: Option<boa_engine::realm::Realm>,
    pub(crate) shared: Arc<AgentShared>,
}

impl AgentHost {
    fn new(shared: Arc<AgentShared>, behavior: Behavior) -> Option<Self> {
        let ctx = AgentCtx::new(behavior.clock, behavior.random_seed);
        let loader = Rc::new(ShuttleLoader::new());
        let job_queue = Rc::new(AgentJobQueue::default());
        let context = Context::builder()
            .host_hooks(&HOOKS)
            .job_queue(job_queue)
            .module_loader(loader.clone())
            .build();
        let context = match context {
            Ok(context) => context,
            Err(error) => {
                debug!(%error, "engine construction failed");
                return None;
            }
        };
        let registry = Rc::new(RefCell::new(Registry::new(shared.clone())));
        loader.attach(registry.clone(), Arc::downgrade(&shared));
        Some(Self {
            context,
            ctx,
            registry,
            pool: AutoreleasePool::new(),
            loader,
            scratch_realm: None,
            shared,
        })
    }

    pub(crate) fn clock_time_ms(&self) -> i64 {
        self.ctx.clock.borrow().clock_time_ms()
    }

    /// The cached weakly-held realm used for compiling when no user realm
    /// is active.
    pub(crate) fn scratch_realm(&mut self) -> crate::result::Result<boa_engine::realm::Realm> {
        if let Some(realm) = &self.scratch_realm {
            return Ok(realm.clone());
        }
        let realm = self
            .context
            .create_realm()
            .map_err(|error| crate::result::Error::Logic(format!(
                "scratch context creation failed: {error}"
            )))?;
        self.scratch_realm = Some(realm.clone());
        Ok(realm)
    }

    /// Teardown under the (implicit) engine lock: reset every persistent,
    /// clear the autorelease pool, then let the engine drop.
    fn teardown(mut self) {
        let count = self.registry.borrow_mut().clear();
        trace!(remotes = count, "cleared remote handle registry");
        self.pool.clear();
        self.loader.clear();
        self.scratch_realm = None;
        boa_gc::force_collect();
        // Dropping `self.context` disposes the engine.
    }
}

/// Entry point of an agent's foreground thread: build the engine, pump
/// the queue, tear down.
pub(crate) fn foreground_main(shared: Arc<AgentShared>, behavior: Behavior) {
    shared.runner.bind_consumer();
    let runner = shared.runner.clone();
    let host = AgentHost::new(shared.clone(), behavior);
    let mut host = match host {
        Some(host) => host,
        None => {
            // Blocked callers see their reply channels close instead of
            // waiting on an engine that never came up.
            runner.poison();
            shared.mark_disposed();
            return;
        }
    };
    trace!("agent foreground thread running");

    let token = runner.stop_token();
    loop {
        match runner.pop_blocking() {
            Popped::Task(task) => {
                let _current = CurrentAgentGuard::install(host.ctx.clone());
                let mut lock = AgentLock::new(&mut host);
                task(&mut lock, &token);
            }
            Popped::Stopped => break,
        }
    }

    // Finalize runs remaining user-blocking tasks (remote resets,
    // teardown handlers) with a non-cancellable token.
    {
        let _current = CurrentAgentGuard::install(host.ctx.clone());
        let mut lock = AgentLock::new(&mut host);
        runner.finalize(&mut lock);
    }

    host.teardown();
    debug!("agent disposed");
    shared.mark_disposed();
}

/// Spawn a new agent onto `threads` and hand back its first owning
/// handle. The engine is constructed asynchronously on the new thread.
pub(crate) fn spawn_agent(
    threads: &RunnerHandle,
    async_pool: RunnerHandle,
    behavior: Behavior,
) -> Option<Agent> {
    let shared = AgentShared::new(async_pool);
    let agent = Agent::first_handle(&shared);
    let thread_shared = shared.clone();
    if !threads.spawn(move |_stop| foreground_main(thread_shared, behavior)) {
        return None;
    }
    Some(agent)
}
