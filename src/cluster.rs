//! Clusters: groups of agents sharing a worker-thread pool.

use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::agent::{spawn_agent, Agent, AgentShared, Behavior};
use crate::platform::Platform;
use crate::result::{Error, Result};
use crate::scheduler::{Layer, Runner};

/// A group of agents sharing the process platform's worker threads.
///
/// Dropping a cluster severs its agents, stops its scheduler layer and
/// waits for the foreground threads to drain.
pub struct Cluster {
    agents: Mutex<Vec<Weak<AgentShared>>>,
    foreground: Runner,
    workers: Runner,
    layer: Layer,
    platform: Arc<Platform>,
}

impl Cluster {
    pub fn new() -> Self {
        let platform = Platform::acquire();
        let layer = Layer::child_of(platform.root_layer());
        let foreground = Runner::new(&layer);
        let workers = Runner::new(&layer);
        Self {
            agents: Mutex::new(Vec::new()),
            foreground,
            workers,
            layer,
            platform,
        }
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    /// Create an agent with the given behavior record. The engine is
    /// constructed asynchronously on the agent's own foreground thread;
    /// the returned handle can schedule immediately.
    pub fn create_agent(&self, behavior: Behavior) -> Result<Agent> {
        let agent = spawn_agent(&self.foreground.handle(), self.workers.handle(), behavior)
            .ok_or(Error::Terminated)?;
        let mut agents = self.agents.lock().unwrap();
        agents.retain(|weak| weak.strong_count() > 0);
        agents.push(Arc::downgrade(&agent.shared));
        Ok(agent)
    }

    /// Sever every agent in this cluster: outstanding handles keep their
    /// memory, but schedule calls no-op from here on.
    pub fn sever_all(&self) {
        for weak in self.agents.lock().unwrap().iter() {
            if let Some(shared) = weak.upgrade() {
                shared.sever();
            }
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        debug!("cluster shutting down");
        self.sever_all();
        self.layer.request_stop();
        // Field drops close the foreground runner (joining agent
        // threads), then the layer, then release the platform.
    }
}
