use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub mod rps_types {
    use ethers::contract::abigen;

    abigen!(
        RpsMinusOne,
        r#"[
            function games(address player) external view returns (uint256 betAmount, bool active)
            function gameCounts(address player) external view returns (uint256)
            function recentGames(address player, uint256 slot) external view returns (uint8 playerMove, uint8 opponentMove, uint8 result, uint256 betAmount)
            function rewards(address player) external view returns (uint256)
            function minimumBet() external view returns (uint256)
            function withdrawThreshold() external view returns (uint256)
            function withdrawFee() external view returns (uint256)
            function startGame(uint8 firstMove, uint8 secondMove) external payable
            function finishGame(uint8 moveIndex) external
            function withdraw() external
            event GameStarted(address indexed player, uint256 betAmount, uint8 contractFirstMove, uint8 contractSecondMove)
            event GameFinished(address indexed player, uint8 playerFinalMove, uint8 opponentFinalMove, uint8 result, uint256 payout)
        ]"#
    );
}

/// Number of slots in the contract's per-player history ring buffer.
pub const HISTORY_RING_SIZE: u64 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("unknown move code {0}")]
    Move(u8),
    #[error("unknown outcome code {0}")]
    Outcome(u8),
    #[error("a move pair must hold two different moves")]
    RepeatedMove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Move {
    Rock,
    Paper,
    Scissors,
}

impl Move {
    pub const ALL: [Move; 3] = [Move::Rock, Move::Paper, Move::Scissors];

    pub fn code(self) -> u8 {
        match self {
            Move::Rock => 0,
            Move::Paper => 1,
            Move::Scissors => 2,
        }
    }

    pub fn next(self) -> Move {
        Move::ALL[(self.code() as usize + 1) % Move::ALL.len()]
    }

    pub fn beats(self, other: Move) -> bool {
        matches!(
            (self, other),
            (Move::Rock, Move::Scissors)
                | (Move::Paper, Move::Rock)
                | (Move::Scissors, Move::Paper)
        )
    }
}

impl TryFrom<u8> for Move {
    type Error = CodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Move::ALL
            .get(code as usize)
            .copied()
            .ok_or(CodeError::Move(code))
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Move::Rock => "Rock",
            Move::Paper => "Paper",
            Move::Scissors => "Scissors",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Loss,
    Win,
    Tie,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Loss => 0,
            Outcome::Win => 1,
            Outcome::Tie => 2,
        }
    }

    pub fn between(player: Move, opponent: Move) -> Outcome {
        if player == opponent {
            Outcome::Tie
        } else if player.beats(opponent) {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

impl TryFrom<u8> for Outcome {
    type Error = CodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Outcome::Loss),
            1 => Ok(Outcome::Win),
            2 => Ok(Outcome::Tie),
            other => Err(CodeError::Outcome(other)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Loss => "Loss",
            Outcome::Win => "Win",
            Outcome::Tie => "Tie",
        };
        write!(f, "{name}")
    }
}

/// Two moves in commit order. Persisted as a two element array of move codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u8; 2]", into = "[u8; 2]")]
pub struct MovePair {
    pub first: Move,
    pub second: Move,
}

impl MovePair {
    pub fn new(first: Move, second: Move) -> Self {
        Self { first, second }
    }

    /// A pair the player may commit: both moves must differ.
    pub fn distinct(first: Move, second: Move) -> Result<Self, CodeError> {
        if first == second {
            return Err(CodeError::RepeatedMove);
        }
        Ok(Self::new(first, second))
    }

    pub fn get(&self, index: u8) -> Option<Move> {
        match index {
            0 => Some(self.first),
            1 => Some(self.second),
            _ => None,
        }
    }

    pub fn codes(&self) -> [u8; 2] {
        [self.first.code(), self.second.code()]
    }
}

impl TryFrom<[u8; 2]> for MovePair {
    type Error = CodeError;

    fn try_from(codes: [u8; 2]) -> Result<Self, Self::Error> {
        Ok(Self::new(Move::try_from(codes[0])?, Move::try_from(codes[1])?))
    }
}

impl From<MovePair> for [u8; 2] {
    fn from(pair: MovePair) -> Self {
        pair.codes()
    }
}

impl fmt::Display for MovePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.first, self.second)
    }
}
