use crate::{
    error::{
        Flow,
        GameError,
        StatusMessage,
        status_for,
    },
    model::{
        ActiveGameView,
        Ether,
        GameLimits,
        WalletSnapshot,
        can_withdraw,
        result_summary,
        validate_commit,
    },
    remote::{
        EventKind,
        GameEvent,
        RemoteGame,
        decode_event,
    },
    session::SessionGuard,
    store::{
        GameCache,
        KeyValueStore,
    },
};
use ethers::types::Address;
use game_abi::{
    Move,
    MovePair,
    Outcome,
};
use std::collections::HashSet;
use tracing::{
    error,
    info,
    warn,
};

const SETTINGS_LOADING: &str = "Game settings are still loading. Please refresh.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitPlan {
    pub guard: SessionGuard,
    pub moves: MovePair,
    pub bet: Ether,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealPlan {
    pub guard: SessionGuard,
    pub move_index: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawPlan {
    pub guard: SessionGuard,
    pub rewards: Ether,
}

/// Decoded `GameFinished` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealResult {
    pub player_move: Move,
    pub opponent_move: Move,
    pub outcome: Outcome,
    pub payout: Ether,
}

#[derive(Debug)]
pub struct CommitOutcome {
    pub plan: CommitPlan,
    /// Opponent moves, when the confirmation carried them.
    pub result: Result<Option<MovePair>, GameError>,
}

#[derive(Debug)]
pub struct RevealOutcome {
    pub plan: RevealPlan,
    pub result: Result<Option<RevealResult>, GameError>,
}

#[derive(Debug)]
pub struct WithdrawOutcome {
    pub plan: WithdrawPlan,
    pub result: Result<(), GameError>,
}

/// What the caller should do once a write flow has settled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowReport {
    pub status: Option<StatusMessage>,
    pub refresh: bool,
    pub clear_selection: bool,
}

impl FlowReport {
    fn settled(status: StatusMessage) -> Self {
        Self {
            status: Some(status),
            refresh: true,
            clear_selection: false,
        }
    }

    fn failed(status: StatusMessage) -> Self {
        Self {
            status: Some(status),
            refresh: false,
            clear_selection: false,
        }
    }
}

/// Runs the commit, reveal and withdraw flows. At most one write is in
/// flight per account at any time.
#[derive(Debug)]
pub struct TransactionOrchestrator {
    expected_chain: u64,
    network_name: String,
    in_flight: HashSet<Address>,
}

impl TransactionOrchestrator {
    pub fn new(expected_chain: u64, network_name: impl Into<String>) -> Self {
        Self {
            expected_chain,
            network_name: network_name.into(),
            in_flight: HashSet::new(),
        }
    }

    pub fn is_busy(&self, account: Address) -> bool {
        self.in_flight.contains(&account)
    }

    fn ensure_chain(&self, guard: &SessionGuard) -> Result<(), GameError> {
        if guard.chain_id != self.expected_chain {
            return Err(GameError::WrongChain {
                expected: self.expected_chain,
                actual: guard.chain_id,
            });
        }
        Ok(())
    }

    fn claim(&mut self, account: Address) -> Result<(), GameError> {
        if !self.in_flight.insert(account) {
            return Err(GameError::Busy);
        }
        Ok(())
    }

    fn release(&mut self, account: Address) {
        self.in_flight.remove(&account);
    }

    fn status(&self, flow: Flow, err: &GameError) -> StatusMessage {
        status_for(flow, err, &self.network_name)
    }

    pub fn prepare_commit(
        &mut self,
        guard: SessionGuard,
        bet_input: &str,
        first: Option<Move>,
        second: Option<Move>,
        limits: Option<&GameLimits>,
        active: Option<&ActiveGameView>,
    ) -> Result<CommitPlan, GameError> {
        self.ensure_chain(&guard)?;
        let limits =
            limits.ok_or_else(|| GameError::InvalidInput(SETTINGS_LOADING.to_string()))?;
        let (moves, bet) = validate_commit(bet_input, first, second, limits, active)?;
        self.claim(guard.account)?;
        info!(
            account = %format!("{:#x}", guard.account),
            %moves,
            %bet,
            "starting game"
        );
        Ok(CommitPlan { guard, moves, bet })
    }

    pub async fn execute_commit<R: RemoteGame>(remote: &R, plan: CommitPlan) -> CommitOutcome {
        let result = commit(remote, &plan).await;
        CommitOutcome { plan, result }
    }

    /// Persists the committed pair for the account that signed, whether or
    /// not that account is still selected. View updates need a current guard.
    pub fn finish_commit<S: KeyValueStore>(
        &mut self,
        outcome: CommitOutcome,
        is_current: bool,
        cache: &GameCache<S>,
    ) -> FlowReport {
        let CommitOutcome { plan, result } = outcome;
        let account = plan.guard.account;
        self.release(account);

        let opponent = match result {
            Ok(opponent) => opponent,
            Err(err) => {
                warn!(?err, "start game failed");
                if !is_current {
                    return FlowReport::default();
                }
                return FlowReport::failed(self.status(Flow::Commit, &err));
            }
        };

        let mut status =
            StatusMessage::success("Game started. Choose your final move to finish.");
        if let Err(err) = cache.set_pending(account, plan.moves) {
            error!(?err, "failed to remember committed moves");
            status = StatusMessage::error(format!(
                "Game started, but your moves could not be saved on this device: {err}"
            ));
        }
        match opponent {
            Some(moves) => {
                if let Err(err) = cache.set_opponent(account, moves) {
                    warn!(?err, "failed to remember opponent moves");
                }
            }
            None => warn!("start game confirmed without opponent moves"),
        }

        if !is_current {
            info!(
                account = %format!("{account:#x}"),
                "start game confirmed for an account that is no longer selected"
            );
            return FlowReport::default();
        }
        FlowReport {
            status: Some(status),
            refresh: true,
            clear_selection: true,
        }
    }

    pub fn prepare_reveal(
        &mut self,
        guard: SessionGuard,
        move_index: u8,
        active: Option<&ActiveGameView>,
    ) -> Result<RevealPlan, GameError> {
        self.ensure_chain(&guard)?;
        if active.is_none() {
            return Err(GameError::InvalidInput("No active game found".to_string()));
        }
        if move_index > 1 {
            return Err(GameError::InvalidInput(
                "Choose your first or second move to finish".to_string(),
            ));
        }
        self.claim(guard.account)?;
        info!(
            account = %format!("{:#x}", guard.account),
            move_index,
            "finishing game"
        );
        Ok(RevealPlan { guard, move_index })
    }

    pub async fn execute_reveal<R: RemoteGame>(remote: &R, plan: RevealPlan) -> RevealOutcome {
        let result = reveal(remote, &plan).await;
        RevealOutcome { plan, result }
    }

    pub fn finish_reveal<S: KeyValueStore>(
        &mut self,
        outcome: RevealOutcome,
        is_current: bool,
        cache: &GameCache<S>,
    ) -> FlowReport {
        let RevealOutcome { plan, result } = outcome;
        let account = plan.guard.account;
        self.release(account);

        let finished = match result {
            Ok(finished) => finished,
            Err(err) => {
                warn!(?err, "finish game failed");
                if !is_current {
                    return FlowReport::default();
                }
                return FlowReport::failed(self.status(Flow::Reveal, &err));
            }
        };

        if let Err(err) = cache.clear(account) {
            warn!(?err, "failed to clear cached moves after finishing");
        }
        if !is_current {
            return FlowReport::default();
        }
        let status = match finished {
            Some(result) => StatusMessage::success(result_summary(
                result.player_move,
                result.opponent_move,
                result.outcome,
            )),
            None => StatusMessage::success("Game finished."),
        };
        FlowReport::settled(status)
    }

    pub fn prepare_withdraw(
        &mut self,
        guard: SessionGuard,
        wallet: Option<&WalletSnapshot>,
        limits: Option<&GameLimits>,
    ) -> Result<WithdrawPlan, GameError> {
        self.ensure_chain(&guard)?;
        let limits =
            limits.ok_or_else(|| GameError::InvalidInput(SETTINGS_LOADING.to_string()))?;
        let rewards = wallet.map(|wallet| wallet.rewards).unwrap_or_default();
        if !can_withdraw(rewards, limits.withdraw_threshold) {
            return Err(GameError::InvalidInput(format!(
                "Withdraw is available after {} ETH rewards",
                limits.withdraw_threshold
            )));
        }
        self.claim(guard.account)?;
        info!(
            account = %format!("{:#x}", guard.account),
            %rewards,
            "withdrawing rewards"
        );
        Ok(WithdrawPlan { guard, rewards })
    }

    pub async fn execute_withdraw<R: RemoteGame>(
        remote: &R,
        plan: WithdrawPlan,
    ) -> WithdrawOutcome {
        let result = remote.withdraw(plan.guard.account).await.map(|_| ());
        WithdrawOutcome { plan, result }
    }

    pub fn finish_withdraw(&mut self, outcome: WithdrawOutcome, is_current: bool) -> FlowReport {
        let WithdrawOutcome { plan, result } = outcome;
        self.release(plan.guard.account);
        if !is_current {
            return FlowReport::default();
        }
        match result {
            Ok(()) => FlowReport::settled(StatusMessage::success("Withdraw successful")),
            Err(err) => {
                warn!(?err, "withdraw failed");
                FlowReport::failed(self.status(Flow::Withdraw, &err))
            }
        }
    }
}

async fn commit<R: RemoteGame>(
    remote: &R,
    plan: &CommitPlan,
) -> Result<Option<MovePair>, GameError> {
    let treasury = remote.treasury_balance().await?;
    if treasury < plan.bet.saturating_mul(2) {
        warn!(%treasury, bet = %plan.bet, "treasury cannot cover the payout");
        return Err(GameError::TreasuryShortfall);
    }
    let logs = remote
        .start_game(plan.guard.account, plan.moves, plan.bet)
        .await?;
    match decode_event(&logs, EventKind::GameStarted) {
        Some(GameEvent::GameStarted {
            player,
            contract_moves,
            ..
        }) if player == plan.guard.account => Ok(Some(contract_moves)),
        _ => Ok(None),
    }
}

async fn reveal<R: RemoteGame>(
    remote: &R,
    plan: &RevealPlan,
) -> Result<Option<RevealResult>, GameError> {
    let logs = remote
        .finish_game(plan.guard.account, plan.move_index)
        .await?;
    match decode_event(&logs, EventKind::GameFinished) {
        Some(GameEvent::GameFinished {
            player,
            player_move,
            opponent_move,
            outcome,
            payout,
        }) if player == plan.guard.account => Ok(Some(RevealResult {
            player_move,
            opponent_move,
            outcome,
            payout,
        })),
        _ => {
            warn!("finish game confirmed without a readable result");
            Ok(None)
        }
    }
}
