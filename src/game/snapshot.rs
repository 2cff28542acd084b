//! Snapshot building for network transmission

use crate::util::time::unix_millis;
use crate::ws::protocol::{
    BallSnapshot, GameStateSnapshot, PaddleSnapshot, Role, ScoreSnapshot, ServerMsg,
};

use super::r#match::{MatchState, Paddle};
use super::MatchId;

fn paddle_snapshot(paddle: &Paddle) -> PaddleSnapshot {
    PaddleSnapshot {
        position: paddle.position,
        direction: paddle.direction,
        ready: paddle.ready,
    }
}

/// Capture the full state of a match for its broadcast group
pub fn build_snapshot(match_id: MatchId, state: &MatchState) -> GameStateSnapshot {
    GameStateSnapshot {
        match_id,
        tick: state.tick,
        status: state.status,
        player1: paddle_snapshot(state.paddle(Role::Player1)),
        player2: paddle_snapshot(state.paddle(Role::Player2)),
        ball: BallSnapshot {
            x: state.ball.x,
            y: state.ball.y,
            dx: state.ball.dx,
            dy: state.ball.dy,
            speed: state.ball.speed,
        },
        score: ScoreSnapshot {
            player1: state.score.of(Role::Player1),
            player2: state.score.of(Role::Player2),
            limit: state.score.limit,
        },
        forfeiting_role: state.forfeiting_role,
        server_time: unix_millis(),
    }
}

/// Same as [`build_snapshot`], wrapped for the wire
pub fn game_state_msg(match_id: MatchId, state: &MatchState) -> ServerMsg {
    ServerMsg::GameState(build_snapshot(match_id, state))
}
