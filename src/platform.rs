//! The process-wide platform delegate.
//!
//! One [`Platform`] exists per process, acquired through a weak+strong pair
//! behind a mutex so multiple clusters can coexist or race re-initialization
//! safely. It advertises the worker-thread count, posts worker and delayed
//! worker tasks onto a background pool, supplies entropy, and routes
//! wall-clock queries through the current agent's clock when an agent is
//! current on the calling thread.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use boa_engine::context::HostHooks;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::clock::Clock;
use crate::scheduler::{Layer, Runner, StopToken};

/// Engine-thread-local context of the agent currently holding the lock.
///
/// Installed by the foreground consumer for the duration of each tick;
/// `Date.now()` and the entropy source dispatch through it.
pub(crate) struct AgentCtx {
    pub(crate) clock: RefCell<Clock>,
    /// Pending `Math.random` seed; consumed on first realm creation.
    pub(crate) random_seed: Cell<Option<f64>>,
    /// The give-seed latch, set only while a realm is being created.
    pub(crate) give_seed: Cell<bool>,
}

impl AgentCtx {
    pub(crate) fn new(clock: Clock, random_seed: Option<f64>) -> Rc<Self> {
        Rc::new(Self {
            clock: RefCell::new(clock),
            random_seed: Cell::new(random_seed),
            give_seed: Cell::new(false),
        })
    }

    /// If the give-seed latch is set, returns and clears the seed.
    pub(crate) fn take_random_seed(&self) -> Option<f64> {
        if self.give_seed.get() {
            self.random_seed.take()
        } else {
            None
        }
    }
}

thread_local! {
    static CURRENT_AGENT: RefCell<Option<Rc<AgentCtx>>> = const { RefCell::new(None) };
}

/// RAII installation of the current agent on this thread.
pub(crate) struct CurrentAgentGuard {
    previous: Option<Rc<AgentCtx>>,
}

impl CurrentAgentGuard {
    pub(crate) fn install(ctx: Rc<AgentCtx>) -> Self {
        let previous = CURRENT_AGENT.with(|current| current.borrow_mut().replace(ctx));
        Self { previous }
    }
}

impl Drop for CurrentAgentGuard {
    fn drop(&mut self) {
        CURRENT_AGENT.with(|current| {
            *current.borrow_mut() = self.previous.take();
        });
    }
}

pub(crate) fn with_current_agent<R>(f: impl FnOnce(&AgentCtx) -> R) -> Option<R> {
    CURRENT_AGENT.with(|current| current.borrow().as_ref().map(|ctx| f(ctx)))
}

fn wall_clock_time_ms() -> i64 {
    Clock::system().clock_time_ms()
}

/// Wall-clock milliseconds, routed through the current agent's clock
/// variant when an agent is current on this thread.
pub fn clock_time_ms() -> i64 {
    with_current_agent(|ctx| ctx.clock.borrow().clock_time_ms())
        .unwrap_or_else(wall_clock_time_ms)
}

/// Fill `buffer` with entropy. Defers to the current agent's latched seed
/// if one is pending (context-local `Math.random` seeding); otherwise
/// fills from the OS RNG.
pub fn fill_entropy(buffer: &mut [u8]) {
    let seeded = with_current_agent(|ctx| ctx.take_random_seed()).flatten();
    match seeded {
        Some(seed) => {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed.to_bits());
            rng.fill_bytes(buffer);
        }
        None => OsRng.fill_bytes(buffer),
    }
}

/// Engine-facing host hooks; one static instance serves every context and
/// dispatches through the thread's current agent.
#[derive(Debug)]
pub struct DelegateHooks;

impl HostHooks for DelegateHooks {
    fn utc_now(&self) -> i64 {
        clock_time_ms()
    }
}

pub(crate) static HOOKS: DelegateHooks = DelegateHooks;

struct PlatformShared {
    holder: Mutex<Weak<Platform>>,
}

static SHARED: Lazy<PlatformShared> = Lazy::new(|| PlatformShared {
    holder: Mutex::new(Weak::new()),
});

/// The global platform: a root scheduler layer plus the background worker
/// pool. The worker runner is declared first so it drains before the root
/// layer waits on its children.
pub struct Platform {
    workers: Runner,
    root: Layer,
}

impl Platform {
    /// Acquire the process-wide platform, initializing it if no strong
    /// reference remains. The holder mutex precludes torn
    /// re-initialization.
    pub fn acquire() -> Arc<Platform> {
        let mut holder = SHARED.holder.lock().unwrap();
        if let Some(platform) = holder.upgrade() {
            return platform;
        }
        debug!("initializing process platform");
        let root = Layer::root();
        let workers = Runner::new(&root);
        let platform = Arc::new(Platform { workers, root });
        *holder = Arc::downgrade(&platform);
        platform
    }

    /// Number of background worker threads the pool will run in parallel.
    pub fn worker_count(&self) -> usize {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    /// The root scheduler layer; cluster layers nest under it.
    pub(crate) fn root_layer(&self) -> &Layer {
        &self.root
    }

    /// Post a task to the background pool.
    pub fn post_worker_task<F>(&self, task: F) -> bool
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        self.workers.spawn(task)
    }

    /// Post a task to the background pool after `delay`. The wait polls
    /// the stop token so teardown is not held up by sleeping workers.
    pub fn post_delayed_worker_task<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        self.workers.spawn(move |stop| {
            let slice = Duration::from_millis(10);
            let mut remaining = delay;
            while !remaining.is_zero() {
                if stop.stop_requested() {
                    return;
                }
                let nap = remaining.min(slice);
                thread::sleep(nap);
                remaining -= nap;
            }
            task(stop);
        })
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        debug!("shutting down process platform");
        self.root.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn platform_is_shared_and_reinitializable() {
        let first = Platform::acquire();
        let second = Platform::acquire();
        assert!(Arc::ptr_eq(&first, &second));
        drop(first);
        drop(second);
        // All strong references gone; the next acquire re-initializes.
        let third = Platform::acquire();
        assert!(third.worker_count() >= 1);
    }

    #[test]
    fn worker_tasks_run() {
        let platform = Platform::acquire();
        let (tx, rx) = mpsc::channel();
        assert!(platform.post_worker_task(move |_| {
            tx.send(1u8).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), 1);
    }

    #[test]
    fn clock_routing_defaults_to_wall_time() {
        let ctx = AgentCtx::new(Clock::deterministic(10, 5), None);
        let before = clock_time_ms();
        assert!(before > 1_000_000);
        {
            ctx.clock.borrow_mut().begin_tick();
            let _guard = CurrentAgentGuard::install(ctx.clone());
            assert_eq!(clock_time_ms(), 10);
        }
        assert!(clock_time_ms() > 1_000_000);
    }

    #[test]
    fn entropy_defers_to_latched_seed() {
        let ctx = AgentCtx::new(Clock::system(), Some(42.0));
        let _guard = CurrentAgentGuard::install(ctx.clone());

        // Latch closed: strong RNG path, seed untouched.
        let mut open = [0u8; 8];
        fill_entropy(&mut open);
        assert_eq!(ctx.random_seed.get(), Some(42.0));

        ctx.give_seed.set(true);
        let mut first = [0u8; 8];
        fill_entropy(&mut first);
        // Seed consumed; the next fill is strong again.
        assert_eq!(ctx.random_seed.get(), None);

        let ctx2 = AgentCtx::new(Clock::system(), Some(42.0));
        ctx2.give_seed.set(true);
        let mut second = [0u8; 8];
        {
            let _guard2 = CurrentAgentGuard::install(ctx2);
            fill_entropy(&mut second);
        }
        assert_eq!(first, second);
    }
}
