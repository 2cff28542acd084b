//! Match state and lifecycle transitions

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::ws::protocol::{Direction, Role};

use super::physics::BALL_START_SPEED;

/// Match status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting for both players to ready up for the first serve
    Starting,
    /// Ball in play
    Running,
    /// Between points, waiting for both players to ready up
    Paused,
    /// A score reached the limit
    Finished,
    /// A player left or never readied
    Forfeited,
}

impl MatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Forfeited)
    }

    /// States from which a double ready serves the ball
    pub fn awaits_serve(self) -> bool {
        matches!(self, MatchStatus::Starting | MatchStatus::Paused)
    }
}

/// One player's paddle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paddle {
    /// Lateral offset from the court centre line
    pub position: f32,
    pub direction: Direction,
    pub ready: bool,
}

/// The ball. `x` is lateral, `y` runs from player1's end (negative) to
/// player2's end (positive).
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub speed: f32,
}

impl Ball {
    /// Centred and motionless
    pub fn at_rest() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            dx: 0.0,
            dy: 0.0,
            speed: BALL_START_SPEED,
        }
    }

    #[cfg(test)]
    pub fn is_moving(&self) -> bool {
        self.dx != 0.0 || self.dy != 0.0
    }
}

/// Largest win threshold a match accepts; results are stored as 32-bit
/// signed integers
pub const MAX_SCORE_LIMIT: u32 = i32::MAX as u32;

/// Whether `limit` can be used as a win threshold
pub fn valid_score_limit(limit: u32) -> bool {
    (1..=MAX_SCORE_LIMIT).contains(&limit)
}

/// Points per role plus the win threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub points: [u32; 2],
    pub limit: u32,
}

impl Score {
    pub fn of(&self, role: Role) -> u32 {
        self.points[role.index()]
    }
}

/// Final standing of one role, as persisted to the result sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleResult {
    pub role: Role,
    pub score: u32,
    pub winner: bool,
}

/// Authoritative state of one match
#[derive(Debug, Clone)]
pub struct MatchState {
    pub status: MatchStatus,
    pub paddles: [Paddle; 2],
    pub ball: Ball,
    pub score: Score,
    pub tick: u64,
    pub last_tick: Instant,
    pub forfeiting_role: Option<Role>,
    /// Who scored the last point; the next serve heads toward them
    pub last_scorer: Option<Role>,
    /// Lateral sign of the next serve, flipped after every goal
    pub serve_flip: bool,
}

impl MatchState {
    pub fn new(score_limit: u32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self {
            status: MatchStatus::Starting,
            paddles: [Paddle::default(), Paddle::default()],
            ball: Ball::at_rest(),
            score: Score {
                points: [0, 0],
                limit: score_limit.max(1),
            },
            tick: 0,
            last_tick: Instant::now(),
            forfeiting_role: None,
            last_scorer: None,
            serve_flip: rng.gen(),
        }
    }

    pub fn paddle(&self, role: Role) -> &Paddle {
        &self.paddles[role.index()]
    }

    pub fn paddle_mut(&mut self, role: Role) -> &mut Paddle {
        &mut self.paddles[role.index()]
    }

    pub fn both_ready(&self) -> bool {
        self.paddles.iter().all(|p| p.ready)
    }

    /// Record a ready signal. Returns true if this put the ball in play.
    pub fn mark_ready(&mut self, role: Role, now: Instant) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.paddle_mut(role).ready = true;

        if self.both_ready() && self.status.awaits_serve() {
            self.serve(now);
            return true;
        }
        false
    }

    /// Put the ball in play from the centre
    fn serve(&mut self, now: Instant) {
        let lateral = if self.serve_flip { 1.0 } else { -1.0 };
        let toward = match self.last_scorer {
            Some(Role::Player2) => 1.0,
            _ => -1.0,
        };
        let norm = std::f32::consts::FRAC_1_SQRT_2;

        self.ball = Ball {
            x: 0.0,
            y: 0.0,
            dx: lateral * norm,
            dy: toward * norm,
            speed: BALL_START_SPEED,
        };
        self.last_tick = now;
        self.status = MatchStatus::Running;
    }

    pub fn set_direction(&mut self, role: Role, direction: Direction) {
        if !self.status.is_terminal() {
            self.paddle_mut(role).direction = direction;
        }
    }

    /// Detect → score → reset, as one step. Only valid while running.
    pub fn award_goal(&mut self, scorer: Role) {
        debug_assert_eq!(self.status, MatchStatus::Running);

        self.score.points[scorer.index()] += 1;
        self.ball = Ball::at_rest();
        for paddle in self.paddles.iter_mut() {
            paddle.ready = false;
        }
        self.last_scorer = Some(scorer);
        self.serve_flip = !self.serve_flip;

        self.status = if self.score.of(scorer) >= self.score.limit {
            MatchStatus::Finished
        } else {
            MatchStatus::Paused
        };
    }

    /// `role` abandons the match. Returns false if the match was already over.
    pub fn forfeit(&mut self, role: Role) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = MatchStatus::Forfeited;
        self.forfeiting_role = Some(role);
        self.ball = Ball::at_rest();
        true
    }

    /// Nobody showed up: forfeited with no winner.
    pub fn abandon(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = MatchStatus::Forfeited;
        self.forfeiting_role = None;
        self.ball = Ball::at_rest();
        true
    }

    /// The ready window closed. Still `starting` means whoever did not
    /// ready forfeits. Returns true if the match ended here.
    pub fn expire_ready_window(&mut self) -> bool {
        if self.status != MatchStatus::Starting {
            return false;
        }
        let ready = [self.paddles[0].ready, self.paddles[1].ready];
        match ready {
            [true, false] => self.forfeit(Role::Player2),
            [false, true] => self.forfeit(Role::Player1),
            _ => self.abandon(),
        }
    }

    /// Final standings, once the match is terminal.
    ///
    /// A forfeit credits the remaining role with the score limit and the
    /// forfeiting role with zero, regardless of the points on the board.
    pub fn outcome(&self) -> Option<[RoleResult; 2]> {
        let result = |role: Role, score: u32, winner: bool| RoleResult {
            role,
            score,
            winner,
        };

        match self.status {
            MatchStatus::Finished => Some(Role::BOTH.map(|role| {
                let score = self.score.of(role);
                result(role, score, score >= self.score.limit)
            })),
            MatchStatus::Forfeited => Some(Role::BOTH.map(|role| match self.forfeiting_role {
                Some(loser) if loser == role => result(role, 0, false),
                Some(_) => result(role, self.score.limit, true),
                None => result(role, 0, false),
            })),
            _ => None,
        }
    }
}
