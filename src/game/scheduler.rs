//! Per-match background tasks: the physics ticker and the ready countdown

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::util::time::elapsed_ticks;

use super::engine::MatchEngine;
use super::physics::PhysicsSystem;
use super::registry::MatchEntry;
use super::snapshot::game_state_msg;

/// Advance the match at a fixed rate and publish every committed state.
/// Ends when the match reaches a terminal status.
pub async fn run_ticker(engine: MatchEngine, entry: Arc<MatchEntry>) {
    debug!(match_id = entry.id, "Ticker started");

    let mut ticks = interval(engine.settings().tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticks.tick().await;

        let now = Instant::now();
        let (snapshot, status) = entry.with_state(|state| {
            let elapsed = elapsed_ticks(state.last_tick, now);
            *state = PhysicsSystem::step(state, elapsed);
            state.last_tick = now;
            (game_state_msg(entry.id, state), state.status)
        });

        if status.is_terminal() {
            // the conclusion below must not be aborted along with the ticker
            entry.detach_ticker();
            engine.conclude(&entry).await;
            break;
        }

        entry.publish(snapshot);
    }

    debug!(match_id = entry.id, "Ticker stopped");
}

/// Forfeit the match if it is still waiting for its first serve after `window`
pub async fn run_ready_countdown(engine: MatchEngine, entry: Arc<MatchEntry>, window: Duration) {
    sleep(window).await;
    entry.detach_countdown();

    let expired = entry.with_state(|state| {
        state
            .expire_ready_window()
            .then_some(state.forfeiting_role)
    });

    if let Some(forfeiting_role) = expired {
        warn!(
            match_id = entry.id,
            forfeiting_role = ?forfeiting_role,
            "Players did not ready up in time"
        );
        engine.conclude(&entry).await;
    }
}
