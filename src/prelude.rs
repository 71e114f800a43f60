//! A convenience module that re-exports the most commonly-used isolet
//! APIs.

pub use crate::agent::{Agent, Behavior, DisposalWatch, WeakAgent};
pub use crate::clock::Clock;
pub use crate::cluster::Cluster;
pub use crate::context::{AgentLock, Realm, RealmScope};
pub use crate::event::{TaskPriority, TaskRunnerView};
pub use crate::scheduler::StopToken;
pub use crate::handle::{CollectedHandle, Remote};
pub use crate::module::{LinkRequest, ModuleRecord, ModuleRequest, Origin, Script};
pub use crate::result::{Error, Result};
pub use crate::transfer::graph::ReferentialValue;
pub use crate::transfer::{
    from_value, to_value, transfer, transfer_strict, FromTransfer, IntoTransfer, TransferError,
};
pub use crate::types::{BigIntValue, ErrorValue, StringValue, Tag, Value};
