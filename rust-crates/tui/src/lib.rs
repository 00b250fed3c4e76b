pub mod controller;
pub mod error;
pub mod evm;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod reconciler;
pub mod remote;
pub mod session;
pub mod store;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use game_abi::{
    Move,
    MovePair,
    Outcome,
};
