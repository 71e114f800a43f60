//! Isolet embeds isolated JavaScript agents inside a Rust host process and
//! exposes them as a controllable, schedulable resource.
//!
//! Each [`Agent`](agent::Agent) owns a private engine instance, with its own
//! heap, microtask queue, virtual [clock](clock::Clock) and entropy source
//! multiplexed behind a single foreground thread so the engine lock
//! protocol holds by construction. Host code compiles
//! [scripts](module::Script) and [ES modules](module::ModuleRecord) inside
//! an agent, evaluates code in a specific [realm](context::Realm), links
//! module graphs through a host callback, and moves values across the
//! boundary through the tag-directed [transfer](transfer) pipeline with
//! discriminated-union and reference-graph support.
//!
//! ```no_run
//! use isolet::prelude::*;
//!
//! let cluster = Cluster::new();
//! let agent = cluster.create_agent(Behavior::default())?;
//! let realm = agent.create_realm()?;
//! let script = agent.compile_script("40 + 2", None)?;
//! assert_eq!(realm.run_script(&script)?, Value::Int32(42));
//! # isolet::result::Result::Ok(())
//! ```

pub mod agent;
pub mod clock;
pub mod cluster;
pub mod context;
pub mod event;
pub mod handle;
pub mod module;
pub mod platform;
pub mod prelude;
pub mod result;
pub mod scheduler;
pub mod transfer;
pub mod types;

pub use agent::{Agent, Behavior, DisposalWatch, WeakAgent};
pub use clock::Clock;
pub use cluster::Cluster;
pub use context::{AgentLock, Realm, RealmScope};
pub use handle::{CollectedHandle, Remote};
pub use module::{LinkRequest, ModuleRecord, ModuleRequest, Origin, Script};
pub use result::{Error, Result};
pub use types::{ErrorValue, Value};
