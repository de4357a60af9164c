//! Explicit per-session context.

use huddle_core::{ConsensusEngine, TransportConfig};
use tokio::runtime::Handle;

/// Everything a session needs from its surroundings
///
/// Passed into every state machine call instead of being looked up globally.
pub struct SessionContext<E> {
    engine: E,
    config: TransportConfig,
    runtime: Handle,
}

impl<E: ConsensusEngine> SessionContext<E> {
    /// Context driving `engine` with `config`; async requests are spawned on `runtime`
    pub fn new(engine: E, config: TransportConfig, runtime: Handle) -> Self {
        Self {
            engine,
            config,
            runtime,
        }
    }

    /// Consensus engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Consensus engine, mutably
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Runtime for relay requests
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Give back the engine
    pub fn into_engine(self) -> E {
        self.engine
    }
}

impl<E> std::fmt::Debug for SessionContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
