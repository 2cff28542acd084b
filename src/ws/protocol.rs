//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{MatchId, MatchStatus};

/// A paddle-controlling slot in a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Defends the negative end of the court
    Player1,
    /// Defends the positive end of the court
    Player2,
}

impl Role {
    pub const BOTH: [Role; 2] = [Role::Player1, Role::Player2];

    pub fn index(self) -> usize {
        match self {
            Role::Player1 => 0,
            Role::Player2 => 1,
        }
    }

    pub fn opponent(self) -> Role {
        match self {
            Role::Player1 => Role::Player2,
            Role::Player2 => Role::Player1,
        }
    }
}

/// Paddle input, sent on the wire as -1, 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    Down,
    #[default]
    Still,
    Up,
}

impl Direction {
    pub fn as_f32(self) -> f32 {
        i8::from(self) as f32
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Direction::Down),
            0 => Ok(Direction::Still),
            1 => Ok(Direction::Up),
            other => Err(format!("direction must be -1, 0 or 1, got {other}")),
        }
    }
}

impl From<Direction> for i8 {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Down => -1,
            Direction::Still => 0,
            Direction::Up => 1,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Claim a role in a match
    Register {
        role: Role,
        /// Participant id; must match the authenticated connection
        user: Uuid,
        #[serde(alias = "matchId")]
        match_id: MatchId,
    },

    /// Signal readiness for the next serve
    Ready { role: Role },

    /// Paddle input for player1
    Player1Move { direction: Direction },

    /// Paddle input for player2
    Player2Move { direction: Direction },

    /// Watch a match without taking a role
    Spectate {
        #[serde(alias = "matchId")]
        match_id: MatchId,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full authoritative state of a match
    GameState(GameStateSnapshot),

    /// Handshake accepted
    Registration {
        match_id: MatchId,
        /// None for spectators
        role: Option<Role>,
        message: String,
    },

    /// Error message
    Error { code: String, message: String },
}

/// Snapshot of one match, broadcast to its group every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    pub match_id: MatchId,
    /// Physics steps applied so far
    pub tick: u64,
    pub status: MatchStatus,
    pub player1: PaddleSnapshot,
    pub player2: PaddleSnapshot,
    pub ball: BallSnapshot,
    pub score: ScoreSnapshot,
    /// Set only when status is forfeited; null there means nobody readied
    pub forfeiting_role: Option<Role>,
    /// Server wall clock (unix millis)
    pub server_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    pub position: f32,
    pub direction: Direction,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    /// Lateral position
    pub x: f32,
    /// Position along the court, player1's end is negative
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub player1: u32,
    pub player2: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_with_either_match_id_spelling() {
        let user = Uuid::new_v4();
        for key in ["match_id", "matchId"] {
            let raw = format!(r#"{{"type":"register","role":"player2","user":"{user}","{key}":7}}"#);
            match serde_json::from_str::<ClientMsg>(&raw).unwrap() {
                ClientMsg::Register { role, user: u, match_id } => {
                    assert_eq!(role, Role::Player2);
                    assert_eq!(u, user);
                    assert_eq!(match_id, 7);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn parses_move_messages() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"player1_move","direction":-1}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Player1Move { direction: Direction::Down }));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"player2_move","direction":1}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Player2Move { direction: Direction::Up }));
    }

    #[test]
    fn rejects_out_of_range_direction_and_unknown_types() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"player1_move","direction":3}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport"}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>("not json").is_err());
    }

    #[test]
    fn server_messages_are_tagged() {
        let err = ServerMsg::Error {
            code: "role_taken".into(),
            message: "nope".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "role_taken");

        let reg = ServerMsg::Registration {
            match_id: 3,
            role: Some(Role::Player1),
            message: "ok".into(),
        };
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["type"], "registration");
        assert_eq!(json["role"], "player1");
    }

    #[test]
    fn roles_are_opponents() {
        for role in Role::BOTH {
            assert_ne!(role, role.opponent());
            assert_eq!(role, role.opponent().opponent());
        }
    }
}
