//! Receipt log builders for exercising event decoding without a node.

use crate::{
    Move,
    MovePair,
    Outcome,
    rps_types::{
        GameFinishedFilter,
        GameStartedFilter,
    },
};
use ethers::{
    abi::{
        Token,
        encode,
    },
    contract::EthEvent,
    types::{
        Address,
        H256,
        Log,
        U256,
    },
};

pub fn game_started_log(
    contract: Address,
    player: Address,
    bet_amount: U256,
    contract_moves: MovePair,
) -> Log {
    let data = encode(&[
        Token::Uint(bet_amount),
        Token::Uint(U256::from(contract_moves.first.code())),
        Token::Uint(U256::from(contract_moves.second.code())),
    ]);
    Log {
        address: contract,
        topics: vec![GameStartedFilter::signature(), H256::from(player)],
        data: data.into(),
        ..Default::default()
    }
}

pub fn game_finished_log(
    contract: Address,
    player: Address,
    player_move: Move,
    opponent_move: Move,
    outcome: Outcome,
    payout: U256,
) -> Log {
    let data = encode(&[
        Token::Uint(U256::from(player_move.code())),
        Token::Uint(U256::from(opponent_move.code())),
        Token::Uint(U256::from(outcome.code())),
        Token::Uint(payout),
    ]);
    Log {
        address: contract,
        topics: vec![GameFinishedFilter::signature(), H256::from(player)],
        data: data.into(),
        ..Default::default()
    }
}

/// A log emitted by some other contract in the same transaction.
pub fn foreign_log(source: Address) -> Log {
    Log {
        address: source,
        topics: vec![H256::repeat_byte(0xab)],
        data: vec![0u8; 32].into(),
        ..Default::default()
    }
}
