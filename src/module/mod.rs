//! Compiled sources: scripts, module records and synthetic modules.
//!
//! Both [`Script`] and [`ModuleRecord`] wrap a remote handle to an
//! engine-compiled artifact plus an owning agent handle. A module record
//! moves through `compiled → linked → evaluated | failed`; linking drives
//! the engine's resolver through the agent's
//! [shuttle loader](loader::ShuttleLoader), and evaluation rejects graphs
//! that turn out to be asynchronous at top level.

pub(crate) mod loader;

pub use loader::LinkRequest;

use std::path::Path;
use std::sync::{Arc, Mutex};

use boa_engine::builtins::promise::PromiseState;
use boa_engine::{js_string, Context, JsError, JsString, JsValue, Source};
use boa_gc::{Finalize, Trace};
use indexmap::IndexMap;

use crate::agent::Agent;
use crate::context::{AgentLock, RealmScope};
use crate::handle::registry::Slot;
use crate::handle::{ModuleKind, Remote, ScriptKind};
use crate::result::{Error, Result};
use crate::transfer::engine::{error_value_from_js, value_from_js, value_to_js};
use crate::types::{ErrorValue, StackFrame, Value};

/// Position inside a compiled source; 0-indexed internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// Name and position attached to compiled sources, used for referrer
/// names and stack-trace rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Origin {
    pub name: Option<String>,
    pub location: Option<SourceLocation>,
}

impl Origin {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), location: None }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }

    /// A single rendered stack frame pointing at this origin.
    pub(crate) fn frame(&self) -> StackFrame {
        StackFrame {
            script: self.name.clone().unwrap_or_default(),
            eval: self.name.is_none(),
            // Rendered 1-based, stored 0-based.
            line: self.location.map(|location| location.line + 1),
            column: self.location.map(|location| location.column + 1),
            ..StackFrame::default()
        }
    }
}

fn annotate(mut value: ErrorValue, origin: Option<&Origin>) -> ErrorValue {
    if value.stack.is_empty() {
        if let Some(origin) = origin {
            value.stack = crate::types::error::render_stack(&[origin.frame()]);
        }
    }
    value
}

/// A module request derived from a compiled module: specifier plus import
/// attributes with deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub specifier: String,
    pub attributes: IndexMap<String, String>,
}

/// Host-observable lifecycle of a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Compiled,
    Linked,
    Evaluated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleSource {
    SourceText,
    Synthetic,
}

/// A compiled source unit. Runs in a realm, returning a transferable
/// value.
#[derive(Clone)]
pub struct Script {
    remote: Remote<ScriptKind>,
    source: String,
    origin: Option<Origin>,
    #[allow(dead_code)]
    agent: Agent,
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("source", &self.source)
            .field("origin", &self.origin)
            .finish()
    }
}

impl Script {
    /// Compile `source` against the agent's scratch realm. Diagnostics
    /// surface immediately as [`Error::Compile`].
    pub fn compile(
        lock: &mut AgentLock<'_>,
        source: &str,
        origin: Option<Origin>,
        agent: Agent,
    ) -> Result<Script> {
        let compiled = {
            let mut scope = lock.enter_scratch()?;
            let context = scope.context();
            parse_script(source, origin.as_ref(), context)
                .map_err(|error| compile_error(&error, origin.as_ref(), context))?
        };
        let slot = lock
            .host()
            .registry
            .borrow_mut()
            .insert(Slot::Script(compiled));
        Ok(Script {
            remote: Remote::adopt(lock, slot),
            source: source.to_owned(),
            origin,
            agent,
        })
    }

    /// Run in the given realm, transferring the completion value out.
    ///
    /// The engine binds compiled code to its compilation realm, so running
    /// against a different realm re-parses the stored source there; the
    /// scratch-compiled artifact remains pinned by the remote handle for
    /// diagnostics and identity.
    pub fn run(&self, scope: &mut RealmScope<'_, '_>) -> Result<Value> {
        self.remote.check_environment(scope.lock())?;
        let origin = self.origin.clone();
        let context = scope.context();
        let compiled = parse_script(&self.source, origin.as_ref(), context)
            .map_err(|error| compile_error(&error, origin.as_ref(), context))?;
        match compiled.evaluate(context) {
            Ok(value) => {
                context.run_jobs();
                Ok(value_from_js(&value, context)?)
            }
            Err(error) => {
                let value = annotate(error_value_from_js(&error, context), origin.as_ref());
                Err(Error::Runtime(value))
            }
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }
}

fn parse_script(
    source: &str,
    origin: Option<&Origin>,
    context: &mut Context,
) -> std::result::Result<boa_engine::Script, JsError> {
    match origin.and_then(|origin| origin.name.clone()) {
        Some(name) => boa_engine::Script::parse(
            Source::from_reader(source.as_bytes(), Some(Path::new(&name))),
            None,
            context,
        ),
        None => boa_engine::Script::parse(Source::from_bytes(source.as_bytes()), None, context),
    }
}

fn compile_error(error: &JsError, origin: Option<&Origin>, context: &mut Context) -> Error {
    let mut value = error_value_from_js(error, context);
    if value.kind == "Error" {
        value.kind = "SyntaxError".into();
    }
    Error::Compile(annotate(value, origin))
}

/// Capture moved into a synthetic module's evaluation steps. The host
/// export values are copied into the module environment when the engine
/// invokes the steps.
#[derive(Trace, Finalize)]
struct SyntheticExports {
    #[unsafe_ignore_trace]
    entries: std::cell::RefCell<Vec<(String, Value)>>,
}

/// A compiled ES module: remote handle, origin, request list and state.
#[derive(Clone)]
pub struct ModuleRecord {
    remote: Remote<ModuleKind>,
    origin: Option<Origin>,
    requests: Vec<ModuleRequest>,
    kind: ModuleSource,
    state: Arc<Mutex<ModuleState>>,
    #[allow(dead_code)]
    agent: Agent,
}

impl ModuleRecord {
    /// Compile `source` as a module in the current realm. If the origin
    /// carries a name, the module → name association is recorded so link
    /// callbacks observe it as `referrer_name`.
    pub fn compile_in(
        scope: &mut RealmScope<'_, '_>,
        source: &str,
        origin: Option<Origin>,
    ) -> Result<(ModuleRecord, Vec<ModuleRequest>)> {
        let requests = enumerate_requests(source, origin.as_ref())?;
        let module = {
            let context = scope.context();
            let parsed = match origin.as_ref().and_then(|origin| origin.name.clone()) {
                Some(name) => boa_engine::Module::parse(
                    Source::from_reader(source.as_bytes(), Some(Path::new(&name))),
                    None,
                    context,
                ),
                None => {
                    boa_engine::Module::parse(Source::from_bytes(source.as_bytes()), None, context)
                }
            };
            parsed.map_err(|error| compile_error(&error, origin.as_ref(), context))?
        };

        let lock = scope.lock();
        if let Some(name) = origin.as_ref().and_then(|origin| origin.name.clone()) {
            lock.host().loader.record_specifier(module.clone(), name);
        }
        let agent = Agent::revive(&lock.host().shared).ok_or(Error::Terminated)?;
        let slot = lock
            .host()
            .registry
            .borrow_mut()
            .insert(Slot::Module(module));
        let record = ModuleRecord {
            remote: Remote::adopt(lock, slot),
            origin,
            requests: requests.clone(),
            kind: ModuleSource::SourceText,
            state: Arc::new(Mutex::new(ModuleState::Compiled)),
            agent,
        };
        Ok((record, requests))
    }

    /// Create a synthetic module with the given export names; the listed
    /// values are copied into the exports when the engine drives the
    /// module's evaluation step. Its link step is a no-op.
    pub fn create_synthetic(
        scope: &mut RealmScope<'_, '_>,
        origin: Origin,
        exports: Vec<(String, Value)>,
    ) -> Result<ModuleRecord> {
        let names: Vec<JsString> = exports
            .iter()
            .map(|(name, _)| JsString::from(name.as_str()))
            .collect();
        let capture = SyntheticExports {
            entries: std::cell::RefCell::new(exports),
        };
        let steps = boa_engine::module::SyntheticModuleInitializer::from_copy_closure_with_captures(
            |module, capture: &SyntheticExports, context| {
                let entries = capture.entries.borrow();
                for (name, value) in entries.iter() {
                    let export = value_to_js(value, context).map_err(|error| {
                        boa_engine::JsNativeError::typ().with_message(error.to_string())
                    })?;
                    module.set_export(&JsString::from(name.as_str()), export)?;
                }
                Ok(())
            },
            capture,
        );

        let module = {
            let context = scope.context();
            boa_engine::Module::synthetic(&names, steps, None, None, context)
        };

        let lock = scope.lock();
        if let Some(name) = origin.name.clone() {
            lock.host().loader.record_specifier(module.clone(), name);
        }
        let agent = Agent::revive(&lock.host().shared).ok_or(Error::Terminated)?;
        let slot = lock
            .host()
            .registry
            .borrow_mut()
            .insert(Slot::Module(module));
        Ok(ModuleRecord {
            remote: Remote::adopt(lock, slot),
            origin: Some(origin),
            requests: Vec::new(),
            kind: ModuleSource::Synthetic,
            state: Arc::new(Mutex::new(ModuleState::Compiled)),
            agent,
        })
    }

    /// The import requests of this module, in source order.
    pub fn requests(&self) -> &[ModuleRequest] {
        &self.requests
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock().unwrap()
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub(crate) fn slot(&self) -> u32 {
        self.remote.slot()
    }

    pub(crate) fn is_owned_by(&self, shared: &Arc<crate::agent::AgentShared>) -> bool {
        self.remote.is_owned_by(shared)
    }

    fn set_state(&self, state: ModuleState) {
        *self.state.lock().unwrap() = state;
    }

    /// Instantiate this module's graph. Each request the engine raises is
    /// resolved by `link_action`, called with the engine lock released.
    pub fn link<F>(&self, scope: &mut RealmScope<'_, '_>, link_action: F) -> Result<()>
    where
        F: FnMut(&LinkRequest) -> Result<ModuleRecord> + 'static,
    {
        let module = self.remote.deref(scope.lock())?;
        let loader = scope.lock().host().loader.clone();
        loader.begin_link(Box::new(link_action));
        let result = (|| -> Result<()> {
            let context = scope.context();
            let promise = module.load(context);
            context.run_jobs();
            match promise.state() {
                PromiseState::Fulfilled(_) => {}
                PromiseState::Rejected(reason) => {
                    let error = JsError::from_opaque(reason);
                    let value = annotate(
                        error_value_from_js(&error, context),
                        self.origin.as_ref(),
                    );
                    return Err(Error::Link(value));
                }
                PromiseState::Pending => {
                    return Err(Error::logic("module load did not settle synchronously"));
                }
            }
            module.link(context).map_err(|error| {
                let value = annotate(error_value_from_js(&error, context), self.origin.as_ref());
                Error::Link(value)
            })
        })();
        loader.end_link();
        match result {
            Ok(()) => {
                self.set_state(ModuleState::Linked);
                Ok(())
            }
            Err(error) => {
                // Partial linkage state is discarded with the record.
                self.set_state(ModuleState::Failed);
                Err(error)
            }
        }
    }

    /// Drive evaluation of a linked module. Yields the module's `default`
    /// export when one exists, else the completion value. A graph that is
    /// asynchronous at top level is rejected.
    pub fn evaluate(&self, scope: &mut RealmScope<'_, '_>) -> Result<Value> {
        let module = self.remote.deref(scope.lock())?;
        match self.state() {
            ModuleState::Compiled => {
                // Synthetic modules (and dependency-free source modules)
                // link trivially; graphs with requests must be linked
                // through `link` first.
                let context = scope.context();
                if self.kind == ModuleSource::SourceText {
                    let promise = module.load(context);
                    context.run_jobs();
                    if let PromiseState::Rejected(reason) = promise.state() {
                        let error = JsError::from_opaque(reason);
                        let value = error_value_from_js(&error, context);
                        self.set_state(ModuleState::Failed);
                        return Err(Error::Link(annotate(value, self.origin.as_ref())));
                    }
                }
                module.link(context).map_err(|error| {
                    let value =
                        annotate(error_value_from_js(&error, context), self.origin.as_ref());
                    self.set_state(ModuleState::Failed);
                    Error::Link(value)
                })?;
                self.set_state(ModuleState::Linked);
            }
            ModuleState::Linked | ModuleState::Evaluated => {}
            ModuleState::Failed => {
                return Err(Error::logic("module previously failed to link"));
            }
        }

        let context = scope.context();
        let promise = module.evaluate(context);
        context.run_jobs();
        match promise.state() {
            PromiseState::Fulfilled(_) => {
                self.set_state(ModuleState::Evaluated);
                let namespace = module.namespace(context);
                let default = namespace
                    .get(js_string!("default"), context)
                    .unwrap_or(JsValue::undefined());
                Ok(value_from_js(&default, context)?)
            }
            PromiseState::Rejected(reason) => {
                self.set_state(ModuleState::Failed);
                let error = JsError::from_opaque(reason);
                let value = annotate(error_value_from_js(&error, context), self.origin.as_ref());
                Err(Error::Runtime(value))
            }
            PromiseState::Pending => {
                self.set_state(ModuleState::Failed);
                Err(Error::Runtime(ErrorValue::new("Error", "module is async")))
            }
        }
    }
}

/// Enumerate the textual import list of a module source: import
/// declarations and re-exports, in source order.
fn enumerate_requests(source: &str, origin: Option<&Origin>) -> Result<Vec<ModuleRequest>> {
    use boa_ast::ModuleItem;

    let mut interner = boa_interner::Interner::default();
    let mut parser = boa_parser::Parser::new(boa_parser::Source::from_bytes(source.as_bytes()));
    let ast = parser.parse_module(&mut interner).map_err(|error| {
        let value = ErrorValue::new("SyntaxError", error.to_string());
        Error::Compile(annotate(value, origin))
    })?;

    let mut requests = Vec::new();
    for item in ast.items().items() {
        let specifier = match item {
            ModuleItem::ImportDeclaration(import) => Some(import.specifier()),
            ModuleItem::ExportDeclaration(export) => match export {
                boa_ast::declaration::ExportDeclaration::ReExport { specifier, .. } => {
                    Some(*specifier)
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(specifier) = specifier {
            let name = interner
                .resolve_expect(specifier.sym())
                .into_common::<JsString>(false)
                .to_std_string_escaped();
            requests.push(ModuleRequest {
                specifier: name,
                attributes: IndexMap::new(),
            });
        }
    }
    Ok(requests)
}
