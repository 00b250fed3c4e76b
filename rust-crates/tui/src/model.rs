use crate::error::GameError;
use ethers::{
    types::U256,
    utils::{
        format_ether,
        parse_ether,
    },
};
use game_abi::{
    HISTORY_RING_SIZE,
    Move,
    MovePair,
    Outcome,
};
use std::fmt;

/// Native token amount held in wei, displayed in ether.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ether(U256);

impl Ether {
    pub const ZERO: Ether = Ether(U256([0; 4]));

    pub fn from_wei(wei: impl Into<U256>) -> Self {
        Self(wei.into())
    }

    pub fn wei(self) -> U256 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Parses a decimal ether amount as typed by the user.
    pub fn parse(input: &str) -> Result<Self, GameError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.starts_with('-') {
            return Err(GameError::InvalidInput(format!(
                "'{input}' is not a valid ETH amount"
            )));
        }
        parse_ether(trimmed).map(Self).map_err(|_| {
            GameError::InvalidInput(format!("'{input}' is not a valid ETH amount"))
        })
    }

    pub fn saturating_mul(self, factor: u64) -> Self {
        Self(self.0.saturating_mul(U256::from(factor)))
    }
}

impl fmt::Display for Ether {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = format_ether(self.0);
        let trimmed = if formatted.contains('.') {
            formatted.trim_end_matches('0').trim_end_matches('.')
        } else {
            formatted.as_str()
        };
        f.write_str(trimmed)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveGameRecord {
    pub active: bool,
    pub bet_amount: Ether,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameLimits {
    pub minimum_bet: Ether,
    pub withdraw_threshold: Ether,
    pub withdraw_fee_percent: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub balance: Ether,
    pub rewards: Ether,
}

/// The device's reconciled picture of the game in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveGameView {
    pub bet_amount: Ether,
    pub pending_moves: Option<MovePair>,
    pub opponent_moves: Option<MovePair>,
}

impl ActiveGameView {
    /// True when the device no longer remembers which moves were committed.
    pub fn is_degraded(&self) -> bool {
        self.pending_moves.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecentGameRecord {
    pub player_move: Move,
    pub opponent_move: Move,
    pub outcome: Outcome,
    pub bet_amount: Ether,
}

/// Ring buffer slots holding the most recent games, newest first.
pub fn history_slots(total_count: u64) -> Vec<u64> {
    let fetch = total_count.min(HISTORY_RING_SIZE);
    (0..fetch)
        .map(|i| (total_count - 1 - i) % HISTORY_RING_SIZE)
        .collect()
}

pub fn can_withdraw(rewards: Ether, threshold: Ether) -> bool {
    !threshold.is_zero() && rewards >= threshold
}

/// Pre-flight checks for committing a new game, in the order the user sees them.
pub fn validate_commit(
    bet_input: &str,
    first: Option<Move>,
    second: Option<Move>,
    limits: &GameLimits,
    active: Option<&ActiveGameView>,
) -> Result<(MovePair, Ether), GameError> {
    let (Some(first), Some(second)) = (first, second) else {
        return Err(GameError::InvalidInput(
            "Enter a bet and choose two different moves".to_string(),
        ));
    };
    if bet_input.trim().is_empty() {
        return Err(GameError::InvalidInput(
            "Enter a bet and choose two different moves".to_string(),
        ));
    }
    let moves = MovePair::distinct(first, second).map_err(|_| {
        GameError::InvalidInput("Your first and second moves must be different".to_string())
    })?;
    let bet = Ether::parse(bet_input)?;
    if bet < limits.minimum_bet {
        return Err(GameError::InvalidInput(format!(
            "Minimum bet is {} ETH",
            limits.minimum_bet
        )));
    }
    if active.is_some() {
        return Err(GameError::InvalidInput(
            "Finish your active game before starting another".to_string(),
        ));
    }
    Ok((moves, bet))
}

/// Whether a typed bet would pass the minimum check.
pub fn bet_is_valid(bet_input: &str, limits: Option<&GameLimits>) -> bool {
    match (Ether::parse(bet_input), limits) {
        (Ok(bet), Some(limits)) => !bet.is_zero() && bet >= limits.minimum_bet,
        (Ok(bet), None) => !bet.is_zero(),
        (Err(_), _) => false,
    }
}

pub fn result_summary(player: Move, opponent: Move, outcome: Outcome) -> String {
    format!("Result: {outcome} ({player} vs {opponent})")
}
