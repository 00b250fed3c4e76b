//! In-process fakes for the wallet provider and the game contract.

use crate::{
    controller::{
        GameController,
        Task,
        run_task,
    },
    error::GameError,
    model::{
        ActiveGameRecord,
        Ether,
        RecentGameRecord,
    },
    provider::{
        ProviderEvent,
        Subscribers,
        Subscription,
        WalletProvider,
    },
    remote::{
        RemoteGame,
        TxLogs,
    },
    store::KeyValueStore,
};
use ethers::types::Address;
use game_abi::{
    HISTORY_RING_SIZE,
    Move,
    MovePair,
    Outcome,
    test_helpers::{
        foreign_log,
        game_finished_log,
        game_started_log,
    },
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

pub const SEPOLIA: u64 = 11_155_111;
pub const MAINNET: u64 = 1;

pub fn account(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn contract_address() -> Address {
    Address::repeat_byte(0xcc)
}

struct FakeWallet {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: u64,
    reject: bool,
    switch_fails: bool,
    prompts: usize,
}

/// Scriptable stand-in for a browser-style wallet.
#[derive(Clone)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeWallet>>,
    subscribers: Subscribers,
}

impl FakeProvider {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeWallet {
                accounts,
                authorized: false,
                chain_id,
                reject: false,
                switch_fails: false,
                prompts: 0,
            })),
            subscribers: Subscribers::default(),
        }
    }

    pub fn authorized(accounts: Vec<Address>, chain_id: u64) -> Self {
        let provider = Self::new(accounts, chain_id);
        provider.lock().authorized = true;
        provider
    }

    fn lock(&self) -> MutexGuard<'_, FakeWallet> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reject_requests(&self, reject: bool) {
        self.lock().reject = reject;
    }

    pub fn fail_chain_switch(&self, fail: bool) {
        self.lock().switch_fails = fail;
    }

    pub fn current_chain(&self) -> u64 {
        self.lock().chain_id
    }

    pub fn is_authorized(&self) -> bool {
        self.lock().authorized
    }

    pub fn prompt_count(&self) -> usize {
        self.lock().prompts
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Simulates the user picking other accounts in the wallet.
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.lock().accounts = accounts.clone();
        self.subscribers
            .emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// Simulates the user switching networks in the wallet.
    pub fn set_chain(&self, chain_id: u64) {
        self.lock().chain_id = chain_id;
        self.subscribers.emit(ProviderEvent::ChainChanged(chain_id));
    }
}

impl WalletProvider for FakeProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, GameError> {
        let mut state = self.lock();
        state.prompts += 1;
        if state.reject {
            return Err(GameError::UserRejected);
        }
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>, GameError> {
        let state = self.lock();
        if !state.authorized {
            return Ok(Vec::new());
        }
        Ok(state.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, GameError> {
        Ok(self.lock().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), GameError> {
        {
            let mut state = self.lock();
            if state.switch_fails {
                return Err(GameError::RemoteUnreachable(
                    "wallet refused the network".to_string(),
                ));
            }
            state.chain_id = chain_id;
        }
        self.subscribers.emit(ProviderEvent::ChainChanged(chain_id));
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}

/// Contract state behind `FakeRemote`. Tests mutate it through `FakeRemote::with`.
pub struct FakeChain {
    pub chain_id: u64,
    pub deployed: bool,
    pub games: HashMap<Address, ActiveGameRecord>,
    pub committed: HashMap<Address, MovePair>,
    pub history: HashMap<Address, Vec<RecentGameRecord>>,
    pub rewards: HashMap<Address, Ether>,
    pub balances: HashMap<Address, Ether>,
    pub treasury: Ether,
    pub minimum_bet: Ether,
    pub withdraw_threshold: Ether,
    pub withdraw_fee: Option<u64>,
    /// Moves the contract deals for the next game.
    pub opponent_moves: MovePair,
    pub emit_started_event: bool,
    pub fail_reads: bool,
    pub fail_next_write: Option<GameError>,
    pub calls: Vec<&'static str>,
    pub slot_reads: Vec<u64>,
}

/// In-memory game contract following the on-chain rules closely enough for
/// client tests: the opponent reveals the first dealt move and winners are
/// credited twice the bet.
#[derive(Clone)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeChain>>,
}

fn eth(value: &str) -> Ether {
    Ether::parse(value).unwrap_or_default()
}

fn revert(reason: &str) -> GameError {
    GameError::CallReverted {
        reason: Some(reason.to_string()),
    }
}

impl FakeRemote {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeChain {
                chain_id,
                deployed: true,
                games: HashMap::new(),
                committed: HashMap::new(),
                history: HashMap::new(),
                rewards: HashMap::new(),
                balances: HashMap::new(),
                treasury: eth("10"),
                minimum_bet: eth("0.01"),
                withdraw_threshold: eth("0.02"),
                withdraw_fee: Some(2),
                opponent_moves: MovePair::new(Move::Paper, Move::Scissors),
                emit_started_event: true,
                fail_reads: false,
                fail_next_write: None,
                calls: Vec::new(),
                slot_reads: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeChain> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeChain) -> T) -> T {
        f(&mut self.lock())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn slot_reads(&self) -> Vec<u64> {
        self.lock().slot_reads.clone()
    }

    pub fn set_active(&self, player: Address, bet: Ether) {
        self.lock().games.insert(
            player,
            ActiveGameRecord {
                active: true,
                bet_amount: bet,
            },
        );
    }

    pub fn push_history(&self, player: Address, game: RecentGameRecord) {
        self.lock().history.entry(player).or_default().push(game);
    }

    fn read(&self, call: &'static str) -> Result<MutexGuard<'_, FakeChain>, GameError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.fail_reads {
            return Err(GameError::RemoteUnreachable("fake node is down".to_string()));
        }
        Ok(state)
    }

    fn write(&self, call: &'static str) -> Result<MutexGuard<'_, FakeChain>, GameError> {
        let mut state = self.lock();
        state.calls.push(call);
        if let Some(err) = state.fail_next_write.take() {
            return Err(err);
        }
        Ok(state)
    }
}

impl RemoteGame for FakeRemote {
    async fn chain_id(&self) -> Result<u64, GameError> {
        let mut state = self.lock();
        state.calls.push("chainId");
        Ok(state.chain_id)
    }

    async fn is_deployed(&self) -> Result<bool, GameError> {
        Ok(self.read("getCode")?.deployed)
    }

    async fn active_game(&self, account: Address) -> Result<ActiveGameRecord, GameError> {
        let state = self.read("games")?;
        Ok(state.games.get(&account).copied().unwrap_or_default())
    }

    async fn game_count(&self, account: Address) -> Result<u64, GameError> {
        let state = self.read("gameCounts")?;
        Ok(state.history.get(&account).map_or(0, |games| games.len() as u64))
    }

    async fn recent_game(
        &self,
        account: Address,
        slot: u64,
    ) -> Result<RecentGameRecord, GameError> {
        let mut state = self.read("recentGames")?;
        state.slot_reads.push(slot);
        let games = state.history.get(&account).cloned().unwrap_or_default();
        let total = games.len() as u64;
        (total.saturating_sub(HISTORY_RING_SIZE)..total)
            .find(|index| index % HISTORY_RING_SIZE == slot)
            .and_then(|index| games.get(index as usize).copied())
            .ok_or_else(|| revert("empty history slot"))
    }

    async fn rewards(&self, account: Address) -> Result<Ether, GameError> {
        let state = self.read("rewards")?;
        Ok(state.rewards.get(&account).copied().unwrap_or_default())
    }

    async fn native_balance(&self, account: Address) -> Result<Ether, GameError> {
        let state = self.read("getBalance")?;
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }

    async fn treasury_balance(&self) -> Result<Ether, GameError> {
        Ok(self.read("treasury")?.treasury)
    }

    async fn minimum_bet(&self) -> Result<Ether, GameError> {
        Ok(self.read("minimumBet")?.minimum_bet)
    }

    async fn withdraw_threshold(&self) -> Result<Ether, GameError> {
        Ok(self.read("withdrawThreshold")?.withdraw_threshold)
    }

    async fn withdraw_fee_percent(&self) -> Result<u64, GameError> {
        self.read("withdrawFee")?
            .withdraw_fee
            .ok_or(GameError::OptionalFieldUnavailable("withdrawFee"))
    }

    async fn start_game(
        &self,
        account: Address,
        moves: MovePair,
        bet: Ether,
    ) -> Result<TxLogs, GameError> {
        let mut state = self.write("startGame")?;
        if state.games.get(&account).is_some_and(|game| game.active) {
            return Err(revert("Game already active"));
        }
        if bet < state.minimum_bet {
            return Err(revert("Bet below minimum"));
        }
        state.games.insert(
            account,
            ActiveGameRecord {
                active: true,
                bet_amount: bet,
            },
        );
        state.committed.insert(account, moves);
        state.treasury = Ether::from_wei(state.treasury.wei() + bet.wei());

        let mut logs = vec![foreign_log(Address::repeat_byte(0x99))];
        if state.emit_started_event {
            logs.push(game_started_log(
                contract_address(),
                account,
                bet.wei(),
                state.opponent_moves,
            ));
        }
        Ok(logs)
    }

    async fn finish_game(&self, account: Address, move_index: u8) -> Result<TxLogs, GameError> {
        let mut state = self.write("finishGame")?;
        let game = state.games.get(&account).copied().unwrap_or_default();
        if !game.active {
            return Err(revert("No active game"));
        }
        let committed = state
            .committed
            .get(&account)
            .copied()
            .ok_or_else(|| revert("No committed moves"))?;
        let player_move = committed
            .get(move_index)
            .ok_or_else(|| revert("Invalid move index"))?;
        let opponent_move = state.opponent_moves.first;
        let outcome = Outcome::between(player_move, opponent_move);
        let payout = match outcome {
            Outcome::Win => game.bet_amount.saturating_mul(2),
            Outcome::Tie => game.bet_amount,
            Outcome::Loss => Ether::ZERO,
        };

        let credited = state.rewards.get(&account).copied().unwrap_or_default();
        state
            .rewards
            .insert(account, Ether::from_wei(credited.wei() + payout.wei()));
        state.games.remove(&account);
        state.committed.remove(&account);
        state.history.entry(account).or_default().push(RecentGameRecord {
            player_move,
            opponent_move,
            outcome,
            bet_amount: game.bet_amount,
        });

        Ok(vec![game_finished_log(
            contract_address(),
            account,
            player_move,
            opponent_move,
            outcome,
            payout.wei(),
        )])
    }

    async fn withdraw(&self, account: Address) -> Result<TxLogs, GameError> {
        let mut state = self.write("withdraw")?;
        let rewards = state.rewards.get(&account).copied().unwrap_or_default();
        if rewards < state.withdraw_threshold {
            return Err(revert("Below withdraw threshold"));
        }
        state.rewards.insert(account, Ether::ZERO);
        Ok(Vec::new())
    }
}

/// Runs every task and its follow-ups to completion, one at a time.
pub async fn settle<P, R, S>(controller: &mut GameController<P, R, S>, task: Option<Task>)
where
    P: WalletProvider,
    R: RemoteGame + Clone,
    S: KeyValueStore,
{
    let mut next = task;
    while let Some(task) = next {
        let remote = controller.remote().clone();
        let outcome = run_task(&remote, task).await;
        next = controller.complete(outcome);
    }
}
