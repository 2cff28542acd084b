//! In-memory participant store for tests

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::game::MatchId;

use super::results::{MatchResult, ParticipantRecord, ParticipantStore};
use super::supabase::SupabaseError;

#[derive(Default)]
pub struct MemoryParticipantStore {
    participants: Mutex<HashSet<(MatchId, Uuid)>>,
    results: Mutex<Vec<MatchResult>>,
    fail_writes: AtomicBool,
}

impl MemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_participant(&self, match_id: MatchId, player_id: Uuid) {
        self.participants.lock().insert((match_id, player_id));
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every write attempted so far, failed ones included
    pub fn results(&self) -> Vec<MatchResult> {
        self.results.lock().clone()
    }
}

impl ParticipantStore for MemoryParticipantStore {
    fn find_participant(
        &self,
        match_id: MatchId,
        player_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ParticipantRecord>, SupabaseError>> {
        let found = self.participants.lock().contains(&(match_id, player_id));
        Box::pin(async move {
            Ok(found.then(|| ParticipantRecord {
                match_id,
                player_id,
                score: 0,
                winner: false,
            }))
        })
    }

    fn record_result(&self, result: MatchResult) -> BoxFuture<'_, Result<(), SupabaseError>> {
        self.results.lock().push(result);
        let fail = self.fail_writes.load(Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                Err(SupabaseError::Api {
                    status: 503,
                    body: "unavailable".into(),
                })
            } else {
                Ok(())
            }
        })
    }
}
