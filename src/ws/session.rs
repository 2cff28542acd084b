//! Per-connection protocol state machine

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{MatchEngine, MatchEntry, MatchId, RegisterError};
use crate::ws::outbox::Outbox;
use crate::ws::protocol::{ClientMsg, Direction, Role, ServerMsg};

/// What a connection is attached to
#[derive(Debug, Default)]
pub enum Binding {
    #[default]
    Unbound,
    Player { entry: Arc<MatchEntry>, role: Role },
    Spectator { entry: Arc<MatchEntry> },
}

impl Binding {
    pub fn match_id(&self) -> Option<MatchId> {
        match self {
            Binding::Unbound => None,
            Binding::Player { entry, .. } | Binding::Spectator { entry } => Some(entry.id),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Binding::Player { role, .. } => Some(*role),
            _ => None,
        }
    }
}

/// One live connection's view of the protocol. Owned by the connection's
/// reader loop; all inbound messages go through [`handle`](Self::handle).
pub struct ParticipantSession {
    connection_id: Uuid,
    identity: Uuid,
    engine: MatchEngine,
    outbox: Outbox,
    binding: Binding,
}

impl ParticipantSession {
    pub fn new(identity: Uuid, engine: MatchEngine, outbox: Outbox) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            identity,
            engine,
            outbox,
            binding: Binding::Unbound,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Dispatch one inbound message
    pub async fn handle(&mut self, msg: ClientMsg) {
        match msg {
            ClientMsg::Register {
                role,
                user,
                match_id,
            } => self.on_register(role, user, match_id).await,
            ClientMsg::Ready { role } => self.on_ready(role),
            ClientMsg::Player1Move { direction } => self.on_move(Role::Player1, direction),
            ClientMsg::Player2Move { direction } => self.on_move(Role::Player2, direction),
            ClientMsg::Spectate { match_id } => self.on_spectate(match_id).await,
        }
    }

    async fn on_register(&mut self, role: Role, user: Uuid, match_id: MatchId) {
        if !matches!(self.binding, Binding::Unbound) {
            self.reject(RegisterError::AlreadyBound).await;
            return;
        }

        match self
            .engine
            .register(self.connection_id, self.identity, role, user, match_id)
            .await
        {
            Ok(entry) => {
                self.binding = Binding::Player {
                    entry: entry.clone(),
                    role,
                };
                self.join_group(
                    &entry,
                    ServerMsg::Registration {
                        match_id,
                        role: Some(role),
                        message: format!("Registered as {:?} in match {}", role, match_id),
                    },
                )
                .await;
            }
            Err(e) => {
                warn!(
                    user_id = %self.identity,
                    match_id,
                    error = %e,
                    "Registration rejected"
                );
                self.reject(e).await;
            }
        }
    }

    fn on_ready(&mut self, role: Role) {
        match &self.binding {
            Binding::Player { entry, role: bound } if *bound == role => {
                self.engine.mark_ready(entry, role);
            }
            _ => warn!(user_id = %self.identity, role = ?role, "Ready for a role this connection does not hold"),
        }
    }

    fn on_move(&mut self, role: Role, direction: Direction) {
        if let Binding::Player { entry, role: bound } = &self.binding {
            if *bound == role {
                self.engine.steer(entry, role, direction);
            }
        }
    }

    async fn on_spectate(&mut self, match_id: MatchId) {
        if !matches!(self.binding, Binding::Unbound) {
            self.reject(RegisterError::AlreadyBound).await;
            return;
        }

        match self.engine.spectate(match_id) {
            Ok(entry) => {
                self.binding = Binding::Spectator {
                    entry: entry.clone(),
                };
                self.join_group(
                    &entry,
                    ServerMsg::Registration {
                        match_id,
                        role: None,
                        message: format!("Spectating match {}", match_id),
                    },
                )
                .await;
            }
            Err(e) => self.reject(e).await,
        }
    }

    /// Confirm the binding, then stream the match's state behind it
    async fn join_group(&self, entry: &MatchEntry, registration: ServerMsg) {
        self.send(registration).await;
        if !self.outbox.follow(entry.subscribe()).await {
            debug!(connection_id = %self.connection_id, "Outbox closed before joining group");
        }
    }

    async fn reject(&self, error: RegisterError) {
        self.send(ServerMsg::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        })
        .await;
    }

    async fn send(&self, msg: ServerMsg) {
        if !self.outbox.send(msg).await {
            debug!(connection_id = %self.connection_id, "Outbox closed");
        }
    }

    /// The connection is gone. A player on a live match forfeits it;
    /// a spectator just leaves the group.
    pub async fn disconnect(self) {
        match self.binding {
            Binding::Unbound => {}
            Binding::Player { entry, role } => {
                if self.engine.forfeit(&entry, role).await {
                    info!(match_id = entry.id, role = ?role, "Player disconnected mid-match");
                }
                self.engine
                    .leave(&entry, Some((role, self.connection_id)));
            }
            Binding::Spectator { entry } => {
                self.engine.leave(&entry, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EngineSettings, MatchStatus};
    use crate::store::memory::MemoryParticipantStore;
    use crate::util::time::tick_duration;
    use crate::ws::outbox::{self, OutboxReceiver};
    use std::time::Duration;

    const MATCH: MatchId = 7;
    const LIMIT: u32 = 3;

    struct Harness {
        engine: MatchEngine,
        store: Arc<MemoryParticipantStore>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryParticipantStore::new());
            let settings = EngineSettings {
                score_limit: LIMIT,
                ready_timeout: Duration::from_secs(10),
                tick_interval: tick_duration(),
            };
            Self {
                engine: MatchEngine::new(store.clone(), settings),
                store,
            }
        }

        fn participant(&self) -> Uuid {
            let id = Uuid::new_v4();
            self.store.add_participant(MATCH, id);
            id
        }

        fn connect(&self, identity: Uuid) -> (ParticipantSession, OutboxReceiver) {
            let (outbox, rx) = outbox::channel(64);
            (ParticipantSession::new(identity, self.engine.clone(), outbox), rx)
        }

        async fn player(&self, role: Role) -> (ParticipantSession, OutboxReceiver, Uuid) {
            let user = self.participant();
            let (mut session, rx) = self.connect(user);
            session
                .handle(ClientMsg::Register {
                    role,
                    user,
                    match_id: MATCH,
                })
                .await;
            (session, rx, user)
        }

        fn entry(&self) -> Arc<MatchEntry> {
            self.engine.registry().get(&MATCH).expect("match is live")
        }
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Some(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn error_code(msgs: &[ServerMsg]) -> Option<String> {
        msgs.iter().find_map(|m| match m {
            ServerMsg::Error { code, .. } => Some(code.clone()),
            _ => None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn register_replies_and_binds_role() {
        let h = Harness::new();
        let (session, mut rx, _) = h.player(Role::Player1).await;

        let msgs = drain(&mut rx);
        assert!(matches!(
            msgs.first(),
            Some(ServerMsg::Registration { match_id: MATCH, role: Some(Role::Player1), .. })
        ));
        assert!(matches!(msgs.get(1), Some(ServerMsg::GameState(_))));
        assert_eq!(session.binding().role(), Some(Role::Player1));
        assert_eq!(session.binding().match_id(), Some(MATCH));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_register_reports_and_stays_unbound() {
        let h = Harness::new();
        let someone = h.participant();
        let (mut session, mut rx) = h.connect(Uuid::new_v4());

        session
            .handle(ClientMsg::Register {
                role: Role::Player1,
                user: someone,
                match_id: MATCH,
            })
            .await;

        assert_eq!(error_code(&drain(&mut rx)).as_deref(), Some("identity_mismatch"));
        assert!(matches!(session.binding(), Binding::Unbound));
    }

    #[tokio::test(start_paused = true)]
    async fn second_register_on_same_connection_is_rejected() {
        let h = Harness::new();
        let (mut session, mut rx, user) = h.player(Role::Player1).await;
        drain(&mut rx);

        session
            .handle(ClientMsg::Register {
                role: Role::Player2,
                user,
                match_id: MATCH,
            })
            .await;
        assert_eq!(error_code(&drain(&mut rx)).as_deref(), Some("already_bound"));
        assert!(h.entry().seat(Role::Player2).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn moves_only_apply_to_the_owned_role() {
        let h = Harness::new();
        let (mut p1, _rx1, _) = h.player(Role::Player1).await;
        let (mut watcher, _rxw) = h.connect(Uuid::new_v4());
        watcher.handle(ClientMsg::Spectate { match_id: MATCH }).await;

        p1.handle(ClientMsg::Player2Move { direction: Direction::Up }).await;
        watcher.handle(ClientMsg::Player1Move { direction: Direction::Up }).await;
        let entry = h.entry();
        entry.with_state(|s| {
            assert_eq!(s.paddle(Role::Player1).direction, Direction::Still);
            assert_eq!(s.paddle(Role::Player2).direction, Direction::Still);
        });

        p1.handle(ClientMsg::Player1Move { direction: Direction::Down }).await;
        entry.with_state(|s| assert_eq!(s.paddle(Role::Player1).direction, Direction::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_for_unowned_role_is_ignored() {
        let h = Harness::new();
        let (mut p1, _rx1, _) = h.player(Role::Player1).await;
        let (_p2, _rx2, _) = h.player(Role::Player2).await;

        p1.handle(ClientMsg::Ready { role: Role::Player2 }).await;
        p1.handle(ClientMsg::Ready { role: Role::Player1 }).await;
        h.entry().with_state(|s| {
            assert!(s.paddle(Role::Player1).ready);
            assert!(!s.paddle(Role::Player2).ready);
            assert_eq!(s.status, MatchStatus::Starting);
        });
    }

    fn tick_of(msg: &ServerMsg) -> u64 {
        match msg {
            ServerMsg::GameState(snap) => snap.tick,
            other => panic!("expected game_state, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spectators_receive_the_group_state() {
        let h = Harness::new();
        let (_p1, _rx1, _) = h.player(Role::Player1).await;
        let (mut watcher, mut rx) = h.connect(Uuid::new_v4());
        watcher.handle(ClientMsg::Spectate { match_id: MATCH }).await;
        assert_eq!(drain(&mut rx).len(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(tick_of(&msgs[0]), h.entry().with_state(|s| s.tick));
    }

    #[tokio::test(start_paused = true)]
    async fn a_stalled_client_is_sent_the_newest_state() {
        let h = Harness::new();
        let (_p1, mut rx, _) = h.player(Role::Player1).await;

        // nothing reads the outbox for five seconds of ticks
        tokio::time::sleep(Duration::from_secs(5)).await;
        let committed = h.entry().with_state(|s| s.tick);
        assert!(committed >= 100, "only {committed} ticks ran");

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], ServerMsg::Registration { .. }));
        assert_eq!(tick_of(&msgs[1]), committed);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_precedes_any_state_of_a_running_group() {
        let h = Harness::new();
        assert!(h.engine.init_match(MATCH, None).is_ok());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let (_p1, mut rx, _) = h.player(Role::Player1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let msgs = drain(&mut rx);
        assert!(matches!(msgs.first(), Some(ServerMsg::Registration { .. })));
        assert!(msgs[1..].iter().all(|m| matches!(m, ServerMsg::GameState(_))));
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn both_ready_then_a_miss_scores_once_and_pauses() {
        let h = Harness::new();
        let (mut p1, _rx1, _) = h.player(Role::Player1).await;
        let (mut p2, _rx2, _) = h.player(Role::Player2).await;

        p1.handle(ClientMsg::Ready { role: Role::Player1 }).await;
        p2.handle(ClientMsg::Ready { role: Role::Player2 }).await;

        let entry = h.entry();
        assert_eq!(entry.with_state(|s| s.status), MatchStatus::Running);
        assert!(!entry.has_countdown());

        // send the ball at player2's end, well clear of the paddle
        entry.with_state(|s| {
            s.ball.x = 90.0;
            s.ball.y = 120.0;
            s.ball.dx = 0.0;
            s.ball.dy = 1.0;
        });

        tokio::time::sleep(Duration::from_secs(2)).await;

        entry.with_state(|s| {
            assert_eq!(s.score.points, [1, 0]);
            assert_eq!((s.ball.x, s.ball.y), (0.0, 0.0));
            assert!(!s.ball.is_moving());
            assert_eq!(s.status, MatchStatus::Paused);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn player_drop_forfeits_and_records_one_result_per_role() {
        let h = Harness::new();
        let (mut p1, mut rx1, alice) = h.player(Role::Player1).await;
        let (mut p2, _rx2, bob) = h.player(Role::Player2).await;

        p1.handle(ClientMsg::Ready { role: Role::Player1 }).await;
        p2.handle(ClientMsg::Ready { role: Role::Player2 }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let entry = h.entry();
        p2.disconnect().await;

        entry.with_state(|s| {
            assert_eq!(s.status, MatchStatus::Forfeited);
            assert_eq!(s.forfeiting_role, Some(Role::Player2));
        });

        let results = h.store.results();
        assert_eq!(results.len(), 2);
        let alice_row = results.iter().find(|r| r.player_id == alice).unwrap();
        let bob_row = results.iter().find(|r| r.player_id == bob).unwrap();
        assert_eq!((alice_row.score, alice_row.winner), (LIMIT as i32, true));
        assert_eq!((bob_row.score, bob_row.winner), (0, false));

        // the remaining player hears about it
        tokio::time::sleep(Duration::from_millis(10)).await;
        let forfeited_seen = drain(&mut rx1).iter().any(|m| {
            matches!(m, ServerMsg::GameState(s) if s.status == MatchStatus::Forfeited)
        });
        assert!(forfeited_seen);

        // leaving afterwards changes nothing and frees the match
        p1.disconnect().await;
        assert_eq!(h.store.results().len(), 2);
        assert_eq!(h.engine.registry().active_matches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spectator_drop_does_not_forfeit() {
        let h = Harness::new();
        let (_p1, _rx1, _) = h.player(Role::Player1).await;
        let (mut watcher, _rx) = h.connect(Uuid::new_v4());
        watcher.handle(ClientMsg::Spectate { match_id: MATCH }).await;
        let entry = h.entry();
        assert_eq!(entry.subscriber_count(), 2);

        watcher.disconnect().await;
        assert_eq!(entry.subscriber_count(), 1);
        assert_eq!(entry.with_state(|s| s.status), MatchStatus::Starting);
        assert!(h.store.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_window_expiry_credits_the_ready_player() {
        let h = Harness::new();
        let (mut p1, _rx1, alice) = h.player(Role::Player1).await;
        let (_p2, _rx2, bob) = h.player(Role::Player2).await;
        p1.handle(ClientMsg::Ready { role: Role::Player1 }).await;

        tokio::time::sleep(Duration::from_secs(11)).await;

        let entry = h.entry();
        entry.with_state(|s| {
            assert_eq!(s.status, MatchStatus::Forfeited);
            assert_eq!(s.forfeiting_role, Some(Role::Player2));
        });
        let results = h.store.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.player_id == alice && r.winner));
        assert!(results.iter().any(|r| r.player_id == bob && !r.winner && r.score == 0));
        assert!(!entry.has_ticker());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_is_cancelled_once_play_starts() {
        let h = Harness::new();
        let (mut p1, _rx1, _) = h.player(Role::Player1).await;
        let (mut p2, _rx2, _) = h.player(Role::Player2).await;
        p1.handle(ClientMsg::Ready { role: Role::Player1 }).await;
        p2.handle(ClientMsg::Ready { role: Role::Player2 }).await;

        // park the ball so no goal interferes
        h.entry().with_state(|s| {
            s.ball.dx = 0.0;
            s.ball.dy = 0.0;
        });
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(h.entry().with_state(|s| s.status), MatchStatus::Running);
        assert!(h.store.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_the_limit_finishes_and_records_board_scores() {
        let h = Harness::new();
        let (mut p1, _rx1, alice) = h.player(Role::Player1).await;
        let (mut p2, _rx2, bob) = h.player(Role::Player2).await;
        let entry = h.entry();

        for _ in 0..LIMIT {
            p1.handle(ClientMsg::Ready { role: Role::Player1 }).await;
            p2.handle(ClientMsg::Ready { role: Role::Player2 }).await;
            entry.with_state(|s| {
                s.ball.x = -90.0;
                s.ball.y = -120.0;
                s.ball.dx = 0.0;
                s.ball.dy = -1.0;
            });
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        assert_eq!(entry.with_state(|s| s.status), MatchStatus::Finished);
        assert_eq!(entry.with_state(|s| s.score.points), [0, LIMIT]);

        let results = h.store.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.player_id == bob && r.winner && r.score == LIMIT as i32));
        assert!(results.iter().any(|r| r.player_id == alice && !r.winner && r.score == 0));
        assert!(!entry.has_ticker());
    }
}
