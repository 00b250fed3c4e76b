use crate::{
    error::GameError,
    model::{
        ActiveGameRecord,
        Ether,
        RecentGameRecord,
    },
};
use ethers::{
    contract::parse_log,
    types::{
        Address,
        Log,
    },
};
use game_abi::{
    Move,
    MovePair,
    Outcome,
    rps_types::{
        GameFinishedFilter,
        GameStartedFilter,
    },
};
use std::future::Future;
use tracing::debug;

/// Logs of a confirmed transaction.
pub type TxLogs = Vec<Log>;

/// Typed façade over the game contract and the chain it lives on.
pub trait RemoteGame {
    fn chain_id(&self) -> impl Future<Output = Result<u64, GameError>>;

    /// Whether contract code exists at the configured address.
    fn is_deployed(&self) -> impl Future<Output = Result<bool, GameError>>;

    fn active_game(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<ActiveGameRecord, GameError>>;

    fn game_count(&self, account: Address) -> impl Future<Output = Result<u64, GameError>>;

    fn recent_game(
        &self,
        account: Address,
        slot: u64,
    ) -> impl Future<Output = Result<RecentGameRecord, GameError>>;

    fn rewards(&self, account: Address) -> impl Future<Output = Result<Ether, GameError>>;

    fn native_balance(&self, account: Address)
    -> impl Future<Output = Result<Ether, GameError>>;

    /// Native balance held by the game contract itself.
    fn treasury_balance(&self) -> impl Future<Output = Result<Ether, GameError>>;

    fn minimum_bet(&self) -> impl Future<Output = Result<Ether, GameError>>;

    fn withdraw_threshold(&self) -> impl Future<Output = Result<Ether, GameError>>;

    /// Fails with `OptionalFieldUnavailable` on deployments without a fee.
    fn withdraw_fee_percent(&self) -> impl Future<Output = Result<u64, GameError>>;

    fn start_game(
        &self,
        account: Address,
        moves: MovePair,
        bet: Ether,
    ) -> impl Future<Output = Result<TxLogs, GameError>>;

    fn finish_game(
        &self,
        account: Address,
        move_index: u8,
    ) -> impl Future<Output = Result<TxLogs, GameError>>;

    fn withdraw(&self, account: Address) -> impl Future<Output = Result<TxLogs, GameError>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    GameStarted,
    GameFinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameEvent {
    GameStarted {
        player: Address,
        bet_amount: Ether,
        contract_moves: MovePair,
    },
    GameFinished {
        player: Address,
        player_move: Move,
        opponent_move: Move,
        outcome: Outcome,
        payout: Ether,
    },
}

/// First log in `logs` that decodes as `kind`. Logs from other sources or of
/// other kinds are skipped.
pub fn decode_event(logs: &[Log], kind: EventKind) -> Option<GameEvent> {
    logs.iter().find_map(|log| {
        let decoded = match kind {
            EventKind::GameStarted => decode_started(log),
            EventKind::GameFinished => decode_finished(log),
        };
        if decoded.is_none() {
            debug!(address = ?log.address, ?kind, "skipping log");
        }
        decoded
    })
}

fn decode_started(log: &Log) -> Option<GameEvent> {
    let event = parse_log::<GameStartedFilter>(log.clone()).ok()?;
    let contract_moves =
        MovePair::try_from([event.contract_first_move, event.contract_second_move]).ok()?;
    Some(GameEvent::GameStarted {
        player: event.player,
        bet_amount: Ether::from_wei(event.bet_amount),
        contract_moves,
    })
}

fn decode_finished(log: &Log) -> Option<GameEvent> {
    let event = parse_log::<GameFinishedFilter>(log.clone()).ok()?;
    Some(GameEvent::GameFinished {
        player: event.player,
        player_move: Move::try_from(event.player_final_move).ok()?,
        opponent_move: Move::try_from(event.opponent_final_move).ok()?,
        outcome: Outcome::try_from(event.result).ok()?,
        payout: Ether::from_wei(event.payout),
    })
}
