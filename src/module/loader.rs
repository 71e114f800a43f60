//! The per-agent module loader and its link shuttle.
//!
//! The engine resolves module requests synchronously through the context's
//! registered loader. The host link callback is parked in the loader's
//! shuttle slot for the duration of one `link` operation; the engine's
//! upcall reads it, hands it the `(specifier, referrer_name, attributes)`
//! triple, and maps the returned record back to an engine module through
//! the agent's registry. The callback itself receives no lock witness and
//! cannot re-enter the engine.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Weak;

use boa_engine::module::{ModuleLoader, Referrer};
use boa_engine::{Context, JsNativeError, JsResult, JsString, Module};
use indexmap::IndexMap;

use crate::agent::AgentShared;
use crate::handle::registry::Registry;
use crate::handle::{ModuleKind, SlotKind};
use crate::module::ModuleRecord;
use crate::result::Result as HostResult;

/// One resolution request handed to a host link callback while the engine
/// lock is released.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub specifier: String,
    /// The compiling origin name of the requesting module, when one was
    /// recorded.
    pub referrer_name: Option<String>,
    /// Import attributes in source order. Sources the engine cannot parse
    /// attributes from yield an empty map.
    pub attributes: IndexMap<String, String>,
}

pub(crate) type LinkShuttle = Box<dyn FnMut(&LinkRequest) -> HostResult<ModuleRecord>>;

pub(crate) struct ShuttleLoader {
    shuttle: RefCell<Option<LinkShuttle>>,
    /// Module object → origin name; lets link callbacks observe referrer
    /// names. Cleared at teardown.
    specifiers: RefCell<HashMap<Module, String>>,
    registry: RefCell<Option<Rc<RefCell<Registry>>>>,
    owner: RefCell<Weak<AgentShared>>,
}

impl ShuttleLoader {
    pub(crate) fn new() -> Self {
        Self {
            shuttle: RefCell::new(None),
            specifiers: RefCell::new(HashMap::new()),
            registry: RefCell::new(None),
            owner: RefCell::new(Weak::new()),
        }
    }

    pub(crate) fn attach(&self, registry: Rc<RefCell<Registry>>, owner: Weak<AgentShared>) {
        *self.registry.borrow_mut() = Some(registry);
        *self.owner.borrow_mut() = owner;
    }

    /// Park the host callback for the duration of one link drive.
    pub(crate) fn begin_link(&self, shuttle: LinkShuttle) {
        *self.shuttle.borrow_mut() = Some(shuttle);
    }

    pub(crate) fn end_link(&self) {
        self.shuttle.borrow_mut().take();
    }

    pub(crate) fn record_specifier(&self, module: Module, name: String) {
        self.specifiers.borrow_mut().insert(module, name);
    }

    pub(crate) fn specifier_of(&self, module: &Module) -> Option<String> {
        self.specifiers.borrow().get(module).cloned()
    }

    pub(crate) fn clear(&self) {
        self.shuttle.borrow_mut().take();
        self.specifiers.borrow_mut().clear();
        self.registry.borrow_mut().take();
    }

    fn resolve(&self, referrer: &Referrer, specifier: &JsString) -> JsResult<Module> {
        let mut shuttle = self.shuttle.borrow_mut();
        let Some(callback) = shuttle.as_mut() else {
            return Err(JsNativeError::typ()
                .with_message("module resolution requested outside of a link operation")
                .into());
        };

        let referrer_name = match referrer {
            Referrer::Module(module) => self.specifier_of(module),
            _ => None,
        };
        let request = LinkRequest {
            specifier: specifier.to_std_string_escaped(),
            referrer_name,
            attributes: IndexMap::new(),
        };

        let record = callback(&request).map_err(|error| {
            JsNativeError::typ().with_message(format!(
                "link callback failed for \"{}\": {error}",
                request.specifier
            ))
        })?;

        let owner = self.owner.borrow().upgrade();
        let owned = owner
            .map(|owner| record.is_owned_by(&owner))
            .unwrap_or(false);
        if !owned {
            return Err(JsNativeError::typ()
                .with_message("link callback returned a module from a foreign agent")
                .into());
        }

        let registry = self.registry.borrow();
        let module = registry
            .as_ref()
            .and_then(|registry| {
                let registry = registry.borrow();
                registry.get(record.slot()).and_then(ModuleKind::from_slot)
            });
        module.ok_or_else(|| {
            JsNativeError::typ()
                .with_message("link callback returned an expired module handle")
                .into()
        })
    }
}

impl ModuleLoader for ShuttleLoader {
    fn load_imported_module(
        &self,
        referrer: Referrer,
        specifier: JsString,
        finish_load: Box<dyn FnOnce(JsResult<Module>, &mut Context)>,
        context: &mut Context,
    ) {
        let result = self.resolve(&referrer, &specifier);
        finish_load(result, context);
    }
}

impl std::fmt::Debug for ShuttleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuttleLoader")
            .field("linking", &self.shuttle.borrow().is_some())
            .field("specifiers", &self.specifiers.borrow().len())
            .finish()
    }
}
