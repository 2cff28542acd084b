//! Paddle and ball physics

use std::f32::consts::FRAC_PI_4;

use crate::ws::protocol::Role;

use super::r#match::{Ball, MatchState, MatchStatus};

/// Half the court's lateral extent (side wall to side wall)
pub const ARENA_HALF_WIDTH: f32 = 100.0;
/// Half the court's length (end line to end line)
pub const ARENA_HALF_LENGTH: f32 = 150.0;
/// Distance of each paddle in front of its end line
pub const PADDLE_INSET: f32 = 20.0;
pub const PADDLE_HALF_LENGTH: f32 = 21.0;
/// Paddle travel per tick at full input
pub const PADDLE_SPEED: f32 = 5.0;
pub const BALL_RADIUS: f32 = 8.0;
pub const BALL_START_SPEED: f32 = 5.0;
pub const BALL_SPEED_INCREMENT: f32 = 0.1;
pub const BALL_MAX_SPEED: f32 = 20.0;
pub const WALL_SPEED_MULTIPLIER: f32 = 1.1;
pub const MAX_REFLECTION_ANGLE: f32 = FRAC_PI_4;
/// Upper bound on the ticks applied by one step, so a late tick can't
/// carry the ball through a paddle.
pub const MAX_ELAPSED_TICKS: f32 = 4.0;

/// Furthest a paddle centre can travel from the centre line
pub fn paddle_limit() -> f32 {
    ARENA_HALF_WIDTH - PADDLE_HALF_LENGTH
}

/// Furthest the ball centre can travel laterally
pub fn ball_lateral_limit() -> f32 {
    ARENA_HALF_WIDTH - BALL_RADIUS
}

/// Distance from centre at which a paddle meets the ball
pub fn paddle_line() -> f32 {
    ARENA_HALF_LENGTH - PADDLE_INSET
}

/// Distance from centre the ball must reach to be fully past an end line
pub fn goal_depth() -> f32 {
    ARENA_HALF_LENGTH + BALL_RADIUS
}

/// Sign of the court end `role` defends
fn end_of(role: Role) -> f32 {
    match role {
        Role::Player1 => -1.0,
        Role::Player2 => 1.0,
    }
}

/// Physics system for advancing a match
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance `state` by `elapsed_ticks` and return the result.
    ///
    /// Terminal matches come back unchanged. Paddles move in any other
    /// status; the ball only moves while running.
    pub fn step(state: &MatchState, elapsed_ticks: f32) -> MatchState {
        let mut next = state.clone();
        if next.status.is_terminal() {
            return next;
        }

        let dt = elapsed_ticks.clamp(0.0, MAX_ELAPSED_TICKS);
        next.tick += 1;

        let limit = paddle_limit();
        for paddle in next.paddles.iter_mut() {
            paddle.position =
                (paddle.position + paddle.direction.as_f32() * PADDLE_SPEED * dt).clamp(-limit, limit);
        }

        if next.status != MatchStatus::Running {
            return next;
        }

        let previous_y = next.ball.y;
        next.ball.x += next.ball.dx * next.ball.speed * dt;
        next.ball.y += next.ball.dy * next.ball.speed * dt;

        Self::bounce_off_side_walls(&mut next.ball);

        for defender in Role::BOTH {
            let paddle = next.paddle(defender).position;
            Self::deflect_off_paddle(&mut next.ball, previous_y, defender, paddle);
        }

        if let Some(scorer) = Self::goal_scorer(&next.ball) {
            next.award_goal(scorer);
        }

        next
    }

    /// Invert lateral travel at a side wall and speed the rally up
    fn bounce_off_side_walls(ball: &mut Ball) {
        let limit = ball_lateral_limit();
        let moving_outward = ball.x * ball.dx > 0.0;
        if ball.x.abs() >= limit && moving_outward {
            ball.dx = -ball.dx;
            ball.speed = (ball.speed * WALL_SPEED_MULTIPLIER).min(BALL_MAX_SPEED);
        }
        ball.x = ball.x.clamp(-limit, limit);
    }

    /// Reflect the ball off `defender`'s paddle if it reached the paddle
    /// line on this step and overlaps the paddle.
    fn deflect_off_paddle(ball: &mut Ball, previous_y: f32, defender: Role, paddle: f32) {
        let end = end_of(defender);
        let approaching = ball.dy * end > 0.0;
        let reached_line = ball.y * end >= paddle_line();
        let already_past = previous_y * end >= goal_depth();
        if !approaching || !reached_line || already_past {
            return;
        }

        let offset = ball.x - paddle;
        if offset.abs() > PADDLE_HALF_LENGTH {
            return;
        }

        let angle = offset / PADDLE_HALF_LENGTH * MAX_REFLECTION_ANGLE;
        let (dx, dy) = (angle.sin(), -end * angle.cos());
        let len = (dx * dx + dy * dy).sqrt();
        ball.dx = dx / len;
        ball.dy = dy / len;
        ball.speed = (ball.speed + BALL_SPEED_INCREMENT).min(BALL_MAX_SPEED);
        ball.y = end * paddle_line();
    }

    /// The role that scores if the ball is fully past an end line
    fn goal_scorer(ball: &Ball) -> Option<Role> {
        if ball.y >= goal_depth() {
            Some(Role::Player1)
        } else if ball.y <= -goal_depth() {
            Some(Role::Player2)
        } else {
            None
        }
    }
}
