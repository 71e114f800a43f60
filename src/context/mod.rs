//! Lock witnesses and realm scopes.
//!
//! An [`AgentLock`] proves the caller is on an agent's foreground thread
//! with the engine lock held; it exists only inside scheduled tasks. A
//! [`RealmScope`] additionally proves a realm has been entered, restoring
//! the previous realm on drop. Entering a realm while already inside one
//! is allowed.

use boa_engine::{js_string, Context, JsValue, NativeFunction, Source};
use boa_gc::{Finalize, Trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::{Agent, AgentHost};
use crate::handle::registry::Slot;
use crate::handle::{RealmKind, Remote};
use crate::module::{ModuleRecord, ModuleRequest, Origin, Script};
use crate::result::{Error, Result};
use crate::transfer::engine::{error_value_from_js, value_from_js};
use crate::transfer::{to_value, IntoTransfer};
use crate::types::Value;

/// Witness that the current thread holds an agent's engine lock.
pub struct AgentLock<'host> {
    pub(crate) host: &'host mut AgentHost,
}

impl<'host> AgentLock<'host> {
    pub(crate) fn new(host: &'host mut AgentHost) -> Self {
        Self { host }
    }

    pub(crate) fn host(&mut self) -> &mut AgentHost {
        self.host
    }

    /// Advance the agent's clock; called once at the start of each client
    /// task.
    pub(crate) fn begin_tick(&mut self) {
        self.host.ctx.clock.borrow_mut().begin_tick();
    }

    /// The agent's virtual time, in milliseconds since the Unix epoch.
    pub fn clock_time_ms(&self) -> i64 {
        self.host.clock_time_ms()
    }

    /// Force a garbage collection pass on this agent's heap.
    pub fn collect_garbage(&mut self) {
        boa_gc::force_collect();
    }

    /// Collected handles whose host data is still alive.
    pub fn collected_handle_count(&self) -> usize {
        self.host.pool.live()
    }

    /// Create a realm in this agent. The first realm creation consumes
    /// the behavior's random seed: `Math.random` in that realm draws a
    /// deterministic stream.
    pub(crate) fn make_realm_slot(&mut self) -> Result<Remote<RealmKind>> {
        let ctx = self.host.ctx.clone();
        // Latch give-seed for the duration of realm creation only; the
        // seed is consumed on the thread holding the engine lock.
        ctx.give_seed.set(true);
        let realm = self.host.context.create_realm();
        let seed = ctx.take_random_seed();
        ctx.give_seed.set(false);
        let realm = realm.map_err(|error| {
            Error::Logic(format!("realm creation failed: {error}"))
        })?;
        if let Some(seed) = seed {
            install_seeded_random(&mut self.host.context, &realm, seed)?;
        }
        let slot = self
            .host
            .registry
            .borrow_mut()
            .insert(Slot::Realm(realm));
        Ok(Remote::adopt(self, slot))
    }

    /// Enter the realm behind `remote`, yielding a scope that restores
    /// the previous realm on drop.
    pub fn enter_realm<'lock>(
        &'lock mut self,
        remote: &Remote<RealmKind>,
    ) -> Result<RealmScope<'lock, 'host>> {
        remote.check_environment(self)?;
        let realm = {
            let registry = self.host.registry.borrow();
            match registry.get(remote.slot()) {
                Some(Slot::Realm(realm)) => realm.clone(),
                _ => return Err(Error::logic("realm handle does not resolve")),
            }
        };
        let outer = self.host.context.enter_realm(realm);
        Ok(RealmScope { lock: self, outer: Some(outer) })
    }

    /// Enter the agent's scratch realm, used for compiling when no user
    /// realm is active.
    pub fn enter_scratch<'lock>(&'lock mut self) -> Result<RealmScope<'lock, 'host>> {
        let realm = self.host.scratch_realm()?;
        let outer = self.host.context.enter_realm(realm);
        Ok(RealmScope { lock: self, outer: Some(outer) })
    }
}

/// `Math.random` state for a seeded realm. Engine-owned; collected with
/// the function object.
#[derive(Trace, Finalize)]
struct SeededRandom {
    #[unsafe_ignore_trace]
    rng: std::cell::RefCell<StdRng>,
}

fn install_seeded_random(
    context: &mut Context,
    realm: &boa_engine::realm::Realm,
    seed: f64,
) -> Result<()> {
    let outer = context.enter_realm(realm.clone());
    let result = (|| -> std::result::Result<(), boa_engine::JsError> {
        let math = context
            .global_object()
            .get(js_string!("Math"), context)?;
        let Some(math) = math.as_object().cloned() else {
            return Ok(());
        };
        let random = NativeFunction::from_copy_closure_with_captures(
            |_this, _args, state: &SeededRandom, _context| {
                Ok(JsValue::from(state.rng.borrow_mut().gen::<f64>()))
            },
            SeededRandom {
                rng: std::cell::RefCell::new(StdRng::seed_from_u64(seed.to_bits())),
            },
        )
        .to_js_function(context.realm());
        math.set(js_string!("random"), random, true, context)?;
        Ok(())
    })();
    context.enter_realm(outer);
    result.map_err(|error| Error::Logic(format!("seeding Math.random failed: {error}")))
}

/// Witness that a realm is entered on top of an agent lock. Cannot
/// outlive its source lock.
pub struct RealmScope<'lock, 'host> {
    lock: &'lock mut AgentLock<'host>,
    outer: Option<boa_engine::realm::Realm>,
}

impl<'lock, 'host> RealmScope<'lock, 'host> {
    pub(crate) fn context(&mut self) -> &mut Context {
        &mut self.lock.host.context
    }

    pub(crate) fn lock(&mut self) -> &mut AgentLock<'host> {
        self.lock
    }

    pub fn clock_time_ms(&self) -> i64 {
        self.lock.clock_time_ms()
    }

    /// Evaluate source text in this realm, transferring the completion
    /// value out.
    pub fn eval(&mut self, source: &str) -> Result<Value> {
        let context = self.context();
        match context.eval(Source::from_bytes(source.as_bytes())) {
            Ok(value) => {
                context.run_jobs();
                let transferred = value_from_js(&value, context)?;
                Ok(transferred)
            }
            Err(error) => {
                let value = error_value_from_js(&error, context);
                Err(Error::Runtime(value))
            }
        }
    }

    /// Evaluate source text and pin the result behind a remote handle,
    /// keeping it alive in this agent's heap until the handle drops.
    pub fn eval_remote(&mut self, source: &str) -> Result<Remote<crate::handle::ValueKind>> {
        let value = {
            let context = self.context();
            context
                .eval(Source::from_bytes(source.as_bytes()))
                .map_err(|error| Error::Runtime(error_value_from_js(&error, context)))?
        };
        Ok(self.lock.remote_value(value))
    }

    /// Evaluate source text with reference-preserving transfer: shared
    /// and cyclic substructures of the result keep their identity as
    /// reference tokens.
    pub fn eval_graph(&mut self, source: &str) -> Result<crate::transfer::graph::ReferentialValue> {
        let context = self.context();
        match context.eval(Source::from_bytes(source.as_bytes())) {
            Ok(value) => {
                context.run_jobs();
                Ok(crate::transfer::engine::graph_from_js(&value, context)?)
            }
            Err(error) => {
                let value = error_value_from_js(&error, context);
                Err(Error::Runtime(value))
            }
        }
    }

    /// Write a global property from a reference-preserving graph,
    /// reproducing shared identity inside the engine.
    pub fn set_global_graph(
        &mut self,
        name: &str,
        value: &crate::transfer::graph::ReferentialValue,
    ) -> Result<()> {
        let context = self.context();
        let js_value = crate::transfer::engine::graph_to_js(value, context)?;
        context
            .global_object()
            .set(boa_engine::JsString::from(name), js_value, true, context)
            .map_err(|error| Error::Runtime(error_value_from_js(&error, context)))?;
        Ok(())
    }

    /// Read a global property, transferring it out of the engine.
    pub fn get_global(&mut self, name: &str) -> Result<Value> {
        let context = self.context();
        let value = context
            .global_object()
            .get(boa_engine::JsString::from(name), context)
            .map_err(|error| Error::Runtime(error_value_from_js(&error, context)))?;
        Ok(value_from_js(&value, context)?)
    }

    /// Write a global property, transferring a host value in.
    pub fn set_global(&mut self, name: &str, value: &dyn ErasedSource) -> Result<()> {
        let host_value = value.to_value_erased()?;
        let context = self.context();
        let js_value = crate::transfer::engine::value_to_js(&host_value, context)?;
        context
            .global_object()
            .set(boa_engine::JsString::from(name), js_value, true, context)
            .map_err(|error| Error::Runtime(error_value_from_js(&error, context)))?;
        Ok(())
    }
}

impl Drop for RealmScope<'_, '_> {
    fn drop(&mut self) {
        if let Some(outer) = self.outer.take() {
            self.lock.host.context.enter_realm(outer);
        }
    }
}

/// Object-safe adapter so `set_global` can take any transfer source.
pub trait ErasedSource {
    fn to_value_erased(&self) -> Result<Value>;
}

impl<T: IntoTransfer> ErasedSource for T {
    fn to_value_erased(&self) -> Result<Value> {
        Ok(to_value(self)?)
    }
}

/// A host-side handle to a realm: an agent-scoped global plus context.
///
/// Operations schedule onto the owning agent's foreground runner and block
/// on the result.
#[derive(Clone)]
pub struct Realm {
    pub(crate) agent: Agent,
    pub(crate) remote: Remote<RealmKind>,
}

impl Realm {
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// The remote handle naming this realm inside its agent.
    pub fn remote(&self) -> &Remote<RealmKind> {
        &self.remote
    }

    /// Run a closure inside this realm on the agent thread and wait for
    /// its result.
    pub fn with<T, F>(&self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RealmScope<'_, '_>) -> Result<T> + Send + 'static,
    {
        let remote = self.remote.clone();
        self.agent.join(move |lock| {
            let mut scope = lock.enter_realm(&remote)?;
            body(&mut scope)
        })
    }

    /// Evaluate source text in this realm.
    pub fn eval(&self, source: &str) -> Result<Value> {
        let source = source.to_owned();
        self.with(move |scope| scope.eval(&source))
    }

    /// Run a compiled script in this realm, returning the transferred
    /// completion value.
    pub fn run_script(&self, script: &Script) -> Result<Value> {
        let script = script.clone();
        self.with(move |scope| script.run(scope))
    }

    /// Link a compiled module's graph. The callback resolves each
    /// `(specifier, referrer_name, attributes)` request to a module; it
    /// is invoked with the engine lock released and cannot re-enter the
    /// agent.
    pub fn link_module<F>(&self, module: &ModuleRecord, link_action: F) -> Result<()>
    where
        F: FnMut(&crate::module::LinkRequest) -> Result<ModuleRecord> + Send + 'static,
    {
        let module = module.clone();
        self.with(move |scope| module.link(scope, link_action))
    }

    /// Drive a linked module's evaluation; the graph must be synchronous.
    pub fn evaluate_module(&self, module: &ModuleRecord) -> Result<Value> {
        let module = module.clone();
        self.with(move |scope| module.evaluate(scope))
    }

    /// Create a synthetic module whose exports are produced by `factory`,
    /// evaluated inside the agent.
    pub fn create_synthetic_module<F>(&self, origin: Origin, factory: F) -> Result<ModuleRecord>
    where
        F: FnOnce() -> Vec<(String, Value)> + Send + 'static,
    {
        self.with(move |scope| ModuleRecord::create_synthetic(scope, origin, factory()))
    }

    /// Compile a module in this realm, returning the record and its
    /// requests.
    pub fn compile_module(
        &self,
        source: &str,
        origin: Option<Origin>,
    ) -> Result<(ModuleRecord, Vec<ModuleRequest>)> {
        let source = source.to_owned();
        self.with(move |scope| ModuleRecord::compile_in(scope, &source, origin))
    }

    pub fn set_global(&self, name: &str, value: impl IntoTransfer + Send + 'static) -> Result<()> {
        let name = name.to_owned();
        self.with(move |scope| scope.set_global(&name, &value))
    }

    pub fn get_global(&self, name: &str) -> Result<Value> {
        let name = name.to_owned();
        self.with(move |scope| scope.get_global(&name))
    }
}

impl Agent {
    /// Create a realm (an agent-scoped global + context) and hand back a
    /// host-side handle to it.
    pub fn create_realm(&self) -> Result<Realm> {
        let remote = self.join_untick(|lock| lock.make_realm_slot())?;
        Ok(Realm { agent: self.clone(), remote })
    }

    /// Compile a script against the agent's scratch realm.
    pub fn compile_script(&self, source: &str, origin: Option<Origin>) -> Result<Script> {
        let source = source.to_owned();
        let agent = self.clone();
        self.join_untick(move |lock| Script::compile(lock, &source, origin, agent))
    }

    /// Compile a module against the agent's scratch realm, returning the
    /// record and its enumerated requests.
    pub fn compile_module(
        &self,
        source: &str,
        origin: Option<Origin>,
    ) -> Result<(ModuleRecord, Vec<ModuleRequest>)> {
        let source = source.to_owned();
        self.join_untick(move |lock| {
            let mut scope = lock.enter_scratch()?;
            ModuleRecord::compile_in(&mut scope, &source, origin)
        })
    }
}

impl Realm {
    /// Pull a global out of this realm directly into a typed host value.
    pub fn get_global_as<T>(&self, name: &str) -> Result<T>
    where
        T: crate::transfer::FromTransfer + Send + 'static,
    {
        let value = self.get_global(name)?;
        Ok(crate::transfer::transfer::<T>(&value)?)
    }
}
