//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{EngineSettings, MatchEngine};
use crate::store::{ParticipantStore, SupabaseClient, SupabaseParticipantStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: MatchEngine,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let supabase = SupabaseClient::new(&config);
        let store: Arc<dyn ParticipantStore> = Arc::new(SupabaseParticipantStore::new(supabase));
        let engine = MatchEngine::new(store, EngineSettings::from_config(&config));

        Self {
            config: Arc::new(config),
            engine,
        }
    }

    /// State over an arbitrary store, for tests
    #[cfg(test)]
    pub fn with_store(config: Config, store: Arc<dyn ParticipantStore>) -> Self {
        let engine = MatchEngine::new(store, EngineSettings::from_config(&config));
        Self {
            config: Arc::new(config),
            engine,
        }
    }
}
