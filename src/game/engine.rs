//! Match engine: lifecycle operations shared by sessions and HTTP handlers

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::store::{MatchResult, ParticipantStore, SupabaseError};
use crate::util::time::tick_duration;
use crate::ws::protocol::{Direction, Role};

use super::r#match::{MatchState, MatchStatus};
use super::registry::{MatchEntry, MatchRegistry, SeatError};
use super::scheduler::{run_ready_countdown, run_ticker};
use super::snapshot::game_state_msg;
use super::MatchId;

/// Tunables for every match this engine runs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Points needed to win, unless a match is initialized with its own
    pub score_limit: u32,
    /// How long both players have to ready up for the first serve
    pub ready_timeout: Duration,
    pub tick_interval: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            score_limit: config.score_limit,
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            tick_interval: tick_duration(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            score_limit: 11,
            ready_timeout: Duration::from_secs(30),
            tick_interval: tick_duration(),
        }
    }
}

/// Why a connection could not join a match
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("user does not match the authenticated connection")]
    IdentityMismatch,

    #[error("not a participant of this match")]
    NotParticipant,

    #[error("match {0} is not running")]
    UnknownMatch(MatchId),

    #[error("match is already over")]
    MatchOver,

    #[error("{0}")]
    RoleTaken(#[from] SeatError),

    #[error("connection is already bound to a match")]
    AlreadyBound,

    #[error("participant lookup failed: {0}")]
    Store(#[from] SupabaseError),
}

impl RegisterError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            RegisterError::IdentityMismatch => "identity_mismatch",
            RegisterError::NotParticipant => "not_participant",
            RegisterError::UnknownMatch(_) => "unknown_match",
            RegisterError::MatchOver => "match_over",
            RegisterError::RoleTaken(_) => "role_taken",
            RegisterError::AlreadyBound => "already_bound",
            RegisterError::Store(_) => "store_unavailable",
        }
    }
}

/// Drives matches: creation, role binding, input, forfeits and conclusion
#[derive(Clone)]
pub struct MatchEngine {
    registry: Arc<MatchRegistry>,
    store: Arc<dyn ParticipantStore>,
    settings: EngineSettings,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn ParticipantStore>, settings: EngineSettings) -> Self {
        Self {
            registry: Arc::new(MatchRegistry::new()),
            store,
            settings,
        }
    }

    pub fn registry(&self) -> &MatchRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Create the simulation for `match_id` and start its timers.
    /// Idempotent: an existing match is returned as is.
    pub fn init_match(
        &self,
        match_id: MatchId,
        score_limit: Option<u32>,
    ) -> Result<Arc<MatchEntry>, RegisterError> {
        if self.registry.is_retired(match_id) {
            return Err(RegisterError::MatchOver);
        }

        let limit = score_limit.unwrap_or(self.settings.score_limit);
        let (entry, created) = self.registry.get_or_create(match_id, || {
            MatchEntry::new(match_id, MatchState::new(limit, rand::random()))
        });
        if created {
            info!(match_id, score_limit = limit, "Match initialized");
        }

        self.start_timers(&entry);
        Ok(entry)
    }

    fn start_timers(&self, entry: &Arc<MatchEntry>) {
        entry.install_ticker(|| tokio::spawn(run_ticker(self.clone(), entry.clone())));

        if entry.with_state(|s| s.status == MatchStatus::Starting) {
            let window = self.settings.ready_timeout;
            entry.install_countdown(|| {
                tokio::spawn(run_ready_countdown(self.clone(), entry.clone(), window))
            });
        }
    }

    /// Bind `connection` to `role` in `match_id`
    pub async fn register(
        &self,
        connection: Uuid,
        identity: Uuid,
        role: Role,
        user: Uuid,
        match_id: MatchId,
    ) -> Result<Arc<MatchEntry>, RegisterError> {
        if user != identity {
            return Err(RegisterError::IdentityMismatch);
        }
        if self.store.find_participant(match_id, user).await?.is_none() {
            return Err(RegisterError::NotParticipant);
        }

        let entry = self.init_match(match_id, None)?;
        if entry.is_terminal() {
            return Err(RegisterError::MatchOver);
        }
        entry.claim_seat(role, connection, user)?;
        let subscribers = entry.add_subscriber();

        info!(match_id, role = ?role, user_id = %user, subscribers, "Player registered");
        Ok(entry)
    }

    /// Join the broadcast group of a live match without a role
    pub fn spectate(&self, match_id: MatchId) -> Result<Arc<MatchEntry>, RegisterError> {
        let entry = self
            .registry
            .get(&match_id)
            .ok_or(RegisterError::UnknownMatch(match_id))?;
        let subscribers = entry.add_subscriber();
        debug!(match_id, subscribers, "Spectator joined");
        Ok(entry)
    }

    pub fn mark_ready(&self, entry: &MatchEntry, role: Role) {
        let served = entry.with_state(|s| s.mark_ready(role, Instant::now()));
        if served {
            entry.cancel_countdown();
            info!(match_id = entry.id, "Both players ready, ball in play");
        }
        entry.publish(entry.snapshot());
    }

    pub fn steer(&self, entry: &MatchEntry, role: Role, direction: Direction) {
        entry.with_state(|s| s.set_direction(role, direction));
    }

    /// `role` leaves a live match. Returns false if it was already over.
    pub async fn forfeit(&self, entry: &Arc<MatchEntry>, role: Role) -> bool {
        let forfeited = entry.with_state(|s| s.forfeit(role));
        if forfeited {
            warn!(match_id = entry.id, role = ?role, "Match forfeited");
            self.conclude(entry).await;
        }
        forfeited
    }

    /// Drop a subscriber (and its seat, for players); the entry goes away
    /// once the match is over and nobody is left.
    pub fn leave(&self, entry: &Arc<MatchEntry>, seat: Option<(Role, Uuid)>) {
        if let Some((role, connection)) = seat {
            entry.release_seat(role, connection);
        }
        let remaining = entry.remove_subscriber();
        debug!(match_id = entry.id, remaining, "Subscriber left");

        if self.registry.remove_if_idle(entry) {
            info!(match_id = entry.id, "Match removed from registry");
        }
    }

    /// Wrap up a terminal match: stop its timers, tell the group, and
    /// record one result per role. Only the first caller does anything.
    pub async fn conclude(&self, entry: &Arc<MatchEntry>) {
        if !entry.try_conclude() {
            return;
        }
        entry.cancel_timers();
        self.registry.retire(entry.id);

        let (outcome, final_state) =
            entry.with_state(|s| (s.outcome(), game_state_msg(entry.id, s)));
        entry.publish(final_state);

        let Some(outcome) = outcome else {
            error!(match_id = entry.id, "Concluding a match that is not over");
            return;
        };

        info!(match_id = entry.id, ?outcome, "Match concluded");

        for result in outcome {
            let Some(player_id) = entry.participant(result.role) else {
                warn!(match_id = entry.id, role = ?result.role, "Role never registered, no result recorded");
                continue;
            };
            let record = MatchResult {
                match_id: entry.id,
                player_id,
                score: i32::try_from(result.score).unwrap_or(i32::MAX),
                winner: result.winner,
            };
            if let Err(e) = self.store.record_result(record).await {
                error!(
                    match_id = entry.id,
                    player_id = %player_id,
                    error = %e,
                    "Failed to record match result"
                );
            }
        }

        if self.registry.remove_if_idle(entry) {
            info!(match_id = entry.id, "Match removed from registry");
        }
    }
}
