//! Simulation store: live match entries keyed by match id

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ws::protocol::{Role, ServerMsg};

use super::r#match::MatchState;
use super::snapshot::game_state_msg;
use super::MatchId;

/// How long a concluded match id stays blocked from re-initialization
pub const RETIRED_TTL: Duration = Duration::from_secs(60 * 60);

/// A connection holding a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub connection: Uuid,
    pub participant: Uuid,
}

/// Why a seat could not be claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("role is already held by another connection")]
    Occupied,
    #[error("role belongs to a different participant")]
    OtherParticipant,
    #[error("participant already holds the other role")]
    AlreadySeated,
}

#[derive(Debug, Default)]
struct Roster {
    /// Live connections per role
    seats: [Option<Seat>; 2],
    /// Participant that first claimed each role; kept after disconnect so
    /// results can still be attributed
    participants: [Option<Uuid>; 2],
}

/// One live match: authoritative state plus its broadcast group and timers.
/// The group only ever holds the latest published state.
#[derive(Debug)]
pub struct MatchEntry {
    pub id: MatchId,
    state: Mutex<MatchState>,
    roster: Mutex<Roster>,
    subscribers: AtomicUsize,
    latest_tx: watch::Sender<ServerMsg>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    countdown: Mutex<Option<JoinHandle<()>>>,
    concluded: AtomicBool,
}

impl MatchEntry {
    pub fn new(id: MatchId, state: MatchState) -> Self {
        let (latest_tx, _) = watch::channel(game_state_msg(id, &state));
        Self {
            id,
            state: Mutex::new(state),
            roster: Mutex::new(Roster::default()),
            subscribers: AtomicUsize::new(0),
            latest_tx,
            ticker: Mutex::new(None),
            countdown: Mutex::new(None),
            concluded: AtomicBool::new(false),
        }
    }

    /// Run `f` with exclusive access to the match state.
    /// Every mutation goes through here.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MatchState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.lock().status.is_terminal()
    }

    pub fn snapshot(&self) -> ServerMsg {
        let state = self.state.lock();
        game_state_msg(self.id, &state)
    }

    // --- broadcast group ---

    /// Receiver of the latest published state. The value current at
    /// subscription time counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<ServerMsg> {
        self.latest_tx.subscribe()
    }

    /// Replace the latest state; having no subscribers is fine
    pub fn publish(&self, msg: ServerMsg) {
        self.latest_tx.send_replace(msg);
    }

    pub fn add_subscriber(&self) -> usize {
        self.subscribers.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the number of subscribers left
    pub fn remove_subscriber(&self) -> usize {
        let previous = self
            .subscribers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    // --- roles ---

    pub fn claim_seat(&self, role: Role, connection: Uuid, participant: Uuid) -> Result<(), SeatError> {
        let mut roster = self.roster.lock();
        let slot = role.index();

        if roster.seats[slot].is_some() {
            return Err(SeatError::Occupied);
        }
        if roster.participants[slot].is_some_and(|owner| owner != participant) {
            return Err(SeatError::OtherParticipant);
        }
        if roster.participants[role.opponent().index()] == Some(participant) {
            return Err(SeatError::AlreadySeated);
        }

        roster.seats[slot] = Some(Seat {
            connection,
            participant,
        });
        roster.participants[slot] = Some(participant);
        Ok(())
    }

    /// Free `role` if `connection` holds it
    pub fn release_seat(&self, role: Role, connection: Uuid) {
        let mut roster = self.roster.lock();
        let slot = &mut roster.seats[role.index()];
        if slot.is_some_and(|seat| seat.connection == connection) {
            *slot = None;
        }
    }

    #[cfg(test)]
    pub fn seat(&self, role: Role) -> Option<Seat> {
        self.roster.lock().seats[role.index()]
    }

    /// Participant credited with `role`, even after they disconnected
    pub fn participant(&self, role: Role) -> Option<Uuid> {
        self.roster.lock().participants[role.index()]
    }

    // --- timers ---

    /// Spawn the tick loop unless one is already installed or the match is over
    pub fn install_ticker(&self, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        Self::install(&self.ticker, &self.concluded, spawn)
    }

    /// Spawn the ready countdown unless one is already installed or the match is over
    pub fn install_countdown(&self, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        Self::install(&self.countdown, &self.concluded, spawn)
    }

    fn install(
        slot: &Mutex<Option<JoinHandle<()>>>,
        concluded: &AtomicBool,
        spawn: impl FnOnce() -> JoinHandle<()>,
    ) -> bool {
        let mut slot = slot.lock();
        if slot.is_some() || concluded.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(spawn());
        true
    }

    #[cfg(test)]
    pub fn has_ticker(&self) -> bool {
        self.ticker.lock().is_some()
    }

    #[cfg(test)]
    pub fn has_countdown(&self) -> bool {
        self.countdown.lock().is_some()
    }

    /// Forget the tick loop handle without aborting it. Called by the loop
    /// itself before it concludes the match.
    pub fn detach_ticker(&self) {
        self.ticker.lock().take();
    }

    /// Same as [`detach_ticker`](Self::detach_ticker) for the countdown
    pub fn detach_countdown(&self) {
        self.countdown.lock().take();
    }

    pub fn cancel_countdown(&self) {
        if let Some(handle) = self.countdown.lock().take() {
            handle.abort();
        }
    }

    /// Abort both timers. Safe to call any number of times.
    pub fn cancel_timers(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
        self.cancel_countdown();
    }

    /// Returns true exactly once: for the caller that gets to conclude the match
    pub fn try_conclude(&self) -> bool {
        !self.concluded.swap(true, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_concluded(&self) -> bool {
        self.concluded.load(Ordering::Acquire)
    }

    /// Terminal and nobody is watching
    pub fn is_idle(&self) -> bool {
        self.subscriber_count() == 0 && self.is_terminal()
    }
}

/// Registry of all live matches
pub struct MatchRegistry {
    matches: DashMap<MatchId, Arc<MatchEntry>>,
    /// Concluded match ids and when they concluded; blocked from being
    /// simulated again until [`RETIRED_TTL`] has passed
    retired: DashMap<MatchId, Instant>,
    retired_ttl: Duration,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::with_retired_ttl(RETIRED_TTL)
    }

    pub fn with_retired_ttl(retired_ttl: Duration) -> Self {
        Self {
            matches: DashMap::new(),
            retired: DashMap::new(),
            retired_ttl,
        }
    }

    /// Block `id` from re-initialization, dropping retirements that expired
    pub fn retire(&self, id: MatchId) {
        let now = Instant::now();
        self.retired
            .retain(|_, at| now.saturating_duration_since(*at) < self.retired_ttl);
        self.retired.insert(id, now);
    }

    pub fn is_retired(&self, id: MatchId) -> bool {
        self.retired
            .get(&id)
            .is_some_and(|at| at.elapsed() < self.retired_ttl)
    }

    #[cfg(test)]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn get(&self, id: &MatchId) -> Option<Arc<MatchEntry>> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// Fetch the entry for `id`, creating it with `make` if absent.
    /// The flag is true when this call created it.
    pub fn get_or_create(&self, id: MatchId, make: impl FnOnce() -> MatchEntry) -> (Arc<MatchEntry>, bool) {
        match self.matches.entry(id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(slot) => {
                let entry = Arc::new(make());
                slot.insert(entry.clone());
                (entry, true)
            }
        }
    }

    /// Drop `entry` from the registry if it is over and unwatched
    pub fn remove_if_idle(&self, entry: &Arc<MatchEntry>) -> bool {
        self.matches
            .remove_if(&entry.id, |_, current| Arc::ptr_eq(current, entry) && current.is_idle())
            .is_some()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_subscribers(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().subscriber_count())
            .sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
