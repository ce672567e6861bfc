//! Shared application state.

use crate::config::Config;
use promptlib_core::Engine;

/// Shared application state.
pub struct AppState {
    pub engine: Engine,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> promptlib_core::Result<Self> {
        let engine = Engine::new(config.engine_config())?;
        Ok(Self { engine, config })
    }

    /// State over an already-built engine.
    pub fn with_engine(engine: Engine, config: Config) -> Self {
        Self { engine, config }
    }
}
