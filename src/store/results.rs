//! Match participants and final results

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::MatchId;

use super::supabase::{SupabaseClient, SupabaseError};

const PLAYER_MATCHES_TABLE: &str = "player_matches";

/// A participant row created by match-creation logic before play
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub match_id: MatchId,
    pub player_id: Uuid,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub winner: bool,
}

/// Final score for one participant, upserted when a match concludes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub match_id: MatchId,
    pub player_id: Uuid,
    pub score: i32,
    pub winner: bool,
}

/// Lookup and result sink for match participants
pub trait ParticipantStore: Send + Sync + 'static {
    /// The participant row for `(match_id, player_id)`, if any
    fn find_participant(
        &self,
        match_id: MatchId,
        player_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ParticipantRecord>, SupabaseError>>;

    /// Insert or overwrite the final result of one participant
    fn record_result(&self, result: MatchResult) -> BoxFuture<'_, Result<(), SupabaseError>>;
}

/// `player_matches` table over PostgREST
#[derive(Clone)]
pub struct SupabaseParticipantStore {
    client: SupabaseClient,
}

impl SupabaseParticipantStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl ParticipantStore for SupabaseParticipantStore {
    fn find_participant(
        &self,
        match_id: MatchId,
        player_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ParticipantRecord>, SupabaseError>> {
        Box::pin(async move {
            let query = format!("match_id=eq.{}&player_id=eq.{}", match_id, player_id);
            self.client.get_one(PLAYER_MATCHES_TABLE, &query).await
        })
    }

    fn record_result(&self, result: MatchResult) -> BoxFuture<'_, Result<(), SupabaseError>> {
        Box::pin(async move {
            self.client
                .upsert(PLAYER_MATCHES_TABLE, &result, "match_id,player_id")
                .await
        })
    }
}
