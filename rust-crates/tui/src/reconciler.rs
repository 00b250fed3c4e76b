use crate::{
    error::GameError,
    model::{
        ActiveGameRecord,
        ActiveGameView,
        GameLimits,
        RecentGameRecord,
        WalletSnapshot,
        history_slots,
    },
    remote::RemoteGame,
    session::SessionGuard,
    store::{
        GameCache,
        KeyValueStore,
    },
};
use ethers::types::Address;
use std::collections::HashMap;
use tracing::{
    debug,
    info,
    warn,
};

/// Work order for one authoritative refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshRequest {
    pub guard: SessionGuard,
    known_limits: Option<GameLimits>,
    expected_chain: u64,
    write_epoch: u64,
}

/// Everything read from the remote store in one refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub record: ActiveGameRecord,
    pub wallet: WalletSnapshot,
    pub limits: GameLimits,
    pub history: Vec<RecentGameRecord>,
    pub fee_missing: bool,
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub guard: SessionGuard,
    /// Settled writes of the account seen when the refresh was started.
    pub write_epoch: u64,
    pub result: Result<RemoteSnapshot, GameError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshReport {
    /// The session moved on while this refresh was in flight.
    Discarded,
    /// The view was replaced. `notice` carries a degraded-but-usable condition.
    Applied { notice: Option<GameError> },
    /// Nothing changed.
    Failed(GameError),
}

pub async fn fetch_snapshot<R: RemoteGame>(remote: &R, request: RefreshRequest) -> RefreshOutcome {
    debug!(generation = request.guard.generation, "refresh started");
    let result = read_snapshot(remote, &request).await;
    RefreshOutcome {
        guard: request.guard,
        write_epoch: request.write_epoch,
        result,
    }
}

async fn read_snapshot<R: RemoteGame>(
    remote: &R,
    request: &RefreshRequest,
) -> Result<RemoteSnapshot, GameError> {
    let expected = request.expected_chain;
    if request.guard.chain_id != expected {
        return Err(GameError::WrongChain {
            expected,
            actual: request.guard.chain_id,
        });
    }
    let actual = remote.chain_id().await?;
    if actual != expected {
        return Err(GameError::WrongChain { expected, actual });
    }
    if !remote.is_deployed().await? {
        return Err(GameError::RemoteUnreachable(
            "no contract code at the configured address".to_string(),
        ));
    }

    let account = request.guard.account;
    let record = remote.active_game(account).await?;
    let wallet = WalletSnapshot {
        balance: remote.native_balance(account).await?,
        rewards: remote.rewards(account).await?,
    };
    let (limits, fee_missing) = match request.known_limits {
        Some(limits) => (limits, false),
        None => read_limits(remote).await?,
    };

    let total = remote.game_count(account).await?;
    let mut history = Vec::new();
    for slot in history_slots(total) {
        history.push(remote.recent_game(account, slot).await?);
    }

    Ok(RemoteSnapshot {
        record,
        wallet,
        limits,
        history,
        fee_missing,
    })
}

async fn read_limits<R: RemoteGame>(remote: &R) -> Result<(GameLimits, bool), GameError> {
    let minimum_bet = remote.minimum_bet().await?;
    let withdraw_threshold = remote.withdraw_threshold().await?;
    let withdraw_fee_percent = match remote.withdraw_fee_percent().await {
        Ok(fee) => Some(fee),
        Err(err) => {
            warn!(?err, "withdraw fee unavailable, continuing without it");
            None
        }
    };
    let limits = GameLimits {
        minimum_bet,
        withdraw_threshold,
        withdraw_fee_percent,
    };
    Ok((limits, withdraw_fee_percent.is_none()))
}

/// Owns the reconciled view and decides which refresh results may land.
#[derive(Debug)]
pub struct GameStateReconciler {
    expected_chain: u64,
    limits: Option<GameLimits>,
    wallet: Option<WalletSnapshot>,
    view: Option<ActiveGameView>,
    history: Vec<RecentGameRecord>,
    in_flight: Option<SessionGuard>,
    queued: bool,
    write_epochs: HashMap<Address, u64>,
}

impl GameStateReconciler {
    pub fn new(expected_chain: u64) -> Self {
        Self {
            expected_chain,
            limits: None,
            wallet: None,
            view: None,
            history: Vec::new(),
            in_flight: None,
            queued: false,
            write_epochs: HashMap::new(),
        }
    }

    pub fn limits(&self) -> Option<&GameLimits> {
        self.limits.as_ref()
    }

    pub fn wallet(&self) -> Option<&WalletSnapshot> {
        self.wallet.as_ref()
    }

    pub fn view(&self) -> Option<&ActiveGameView> {
        self.view.as_ref()
    }

    pub fn history(&self) -> &[RecentGameRecord] {
        &self.history
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Records a settled write for `account`. Refreshes started before it
    /// may have read the chain before the write landed.
    pub fn note_write(&mut self, account: Address) {
        *self.write_epochs.entry(account).or_default() += 1;
    }

    fn write_epoch(&self, account: Address) -> u64 {
        self.write_epochs.get(&account).copied().unwrap_or_default()
    }

    /// Starts a refresh unless one is already running for the same session,
    /// in which case another run is queued behind it.
    pub fn begin(&mut self, guard: SessionGuard) -> Option<RefreshRequest> {
        if self.in_flight == Some(guard) {
            self.queued = true;
            return None;
        }
        self.in_flight = Some(guard);
        self.queued = false;
        Some(RefreshRequest {
            guard,
            known_limits: self
                .limits
                .filter(|limits| limits.withdraw_fee_percent.is_some()),
            expected_chain: self.expected_chain,
            write_epoch: self.write_epoch(guard.account),
        })
    }

    /// Whether a refresh was requested while the last one was running.
    pub fn take_queued(&mut self) -> bool {
        std::mem::take(&mut self.queued)
    }

    /// Forgets everything tied to the previous account.
    pub fn reset(&mut self) {
        self.wallet = None;
        self.view = None;
        self.history.clear();
        self.in_flight = None;
        self.queued = false;
    }

    pub fn apply<S: KeyValueStore>(
        &mut self,
        outcome: RefreshOutcome,
        is_current: bool,
        cache: &GameCache<S>,
    ) -> RefreshReport {
        if self.in_flight == Some(outcome.guard) {
            self.in_flight = None;
        }
        if !is_current {
            debug!(
                generation = outcome.guard.generation,
                "discarding refresh for a previous session"
            );
            return RefreshReport::Discarded;
        }
        if outcome.write_epoch < self.write_epoch(outcome.guard.account) {
            debug!(
                generation = outcome.guard.generation,
                "discarding refresh that predates a settled write"
            );
            self.queued = true;
            return RefreshReport::Discarded;
        }

        let snapshot = match outcome.result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(?err, "refresh failed, keeping previous view");
                return RefreshReport::Failed(err);
            }
        };

        let account = outcome.guard.account;
        self.limits = Some(snapshot.limits);
        self.wallet = Some(snapshot.wallet);
        self.history = snapshot.history;

        if !snapshot.record.active {
            match cache.clear(account) {
                Ok(true) => info!(
                    account = %format!("{account:#x}"),
                    "cleared cached moves of a finished game"
                ),
                Ok(false) => {}
                Err(err) => warn!(?err, "failed to clear cached moves"),
            }
            self.view = None;
        } else {
            let view = ActiveGameView {
                bet_amount: snapshot.record.bet_amount,
                pending_moves: cache.pending(account),
                opponent_moves: cache.opponent(account),
            };
            if view.is_degraded() {
                warn!(
                    account = %format!("{account:#x}"),
                    "active game without remembered moves"
                );
            }
            self.view = Some(view);
        }

        let notice = if self.view.is_some_and(|view| view.is_degraded()) {
            Some(GameError::CacheInconsistency)
        } else if snapshot.fee_missing {
            Some(GameError::OptionalFieldUnavailable("withdrawFee"))
        } else {
            None
        };
        RefreshReport::Applied { notice }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        model::Ether,
        store::InMemoryStore,
        test_helpers::{
            FakeRemote,
            SEPOLIA,
            account,
        },
    };
    use game_abi::{
        Move,
        MovePair,
        Outcome,
    };

    fn guard(generation: u64) -> SessionGuard {
        SessionGuard {
            generation,
            account: account(1),
            chain_id: SEPOLIA,
        }
    }

    fn eth(value: &str) -> Ether {
        Ether::parse(value).unwrap()
    }

    async fn refresh(
        reconciler: &mut GameStateReconciler,
        remote: &FakeRemote,
        cache: &GameCache<InMemoryStore>,
        guard: SessionGuard,
    ) -> RefreshReport {
        let request = reconciler.begin(guard).unwrap();
        let outcome = fetch_snapshot(remote, request).await;
        reconciler.apply(outcome, true, cache)
    }

    #[tokio::test]
    async fn apply__clears_stale_moves_when_no_game_is_active() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        let cache = GameCache::new(InMemoryStore::new());
        cache
            .set_pending(account(1), MovePair::new(Move::Rock, Move::Paper))
            .unwrap();
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when
        let report = refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert_eq!(report, RefreshReport::Applied { notice: None });
        assert_eq!(reconciler.view(), None);
        assert_eq!(cache.pending(account(1)), None);
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn apply__combines_active_record_with_cached_moves() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.set_active(account(1), eth("0.05"));
        let cache = GameCache::new(InMemoryStore::new());
        let mine = MovePair::new(Move::Rock, Move::Paper);
        let theirs = MovePair::new(Move::Scissors, Move::Rock);
        cache.set_pending(account(1), mine).unwrap();
        cache.set_opponent(account(1), theirs).unwrap();
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when
        let report = refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert_eq!(report, RefreshReport::Applied { notice: None });
        assert_eq!(
            reconciler.view(),
            Some(&ActiveGameView {
                bet_amount: eth("0.05"),
                pending_moves: Some(mine),
                opponent_moves: Some(theirs),
            })
        );
    }

    #[tokio::test]
    async fn apply__reports_degraded_view_without_inventing_moves() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.set_active(account(1), eth("0.02"));
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when
        let report = refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert_eq!(
            report,
            RefreshReport::Applied {
                notice: Some(GameError::CacheInconsistency)
            }
        );
        let view = reconciler.view().unwrap();
        assert_eq!(view.pending_moves, None);
        assert_eq!(view.opponent_moves, None);
    }

    #[tokio::test]
    async fn apply__failure_keeps_previous_view() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.set_active(account(1), eth("0.02"));
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;
        let before = reconciler.view().copied();
        remote.with(|chain| chain.fail_reads = true);

        // when
        let report = refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert!(matches!(report, RefreshReport::Failed(GameError::RemoteUnreachable(_))));
        assert_eq!(reconciler.view().copied(), before);
        assert!(before.is_some());
    }

    #[tokio::test]
    async fn apply__discards_results_for_a_replaced_session() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.set_active(account(1), eth("0.02"));
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        let request = reconciler.begin(guard(1)).unwrap();
        let outcome = fetch_snapshot(&remote, request).await;

        // when
        let report = reconciler.apply(outcome, false, &cache);

        // then
        assert_eq!(report, RefreshReport::Discarded);
        assert_eq!(reconciler.view(), None);
        assert!(!reconciler.is_loading());
    }

    #[tokio::test]
    async fn fetch_snapshot__reads_history_newest_first() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        for i in 0..7u64 {
            remote.push_history(
                account(1),
                RecentGameRecord {
                    player_move: Move::Rock,
                    opponent_move: Move::Scissors,
                    outcome: Outcome::Win,
                    bet_amount: Ether::from_wei(i + 1),
                },
            );
        }
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        let request = reconciler.begin(guard(1)).unwrap();

        // when
        let outcome = fetch_snapshot(&remote, request).await;

        // then
        let bets: Vec<_> = outcome
            .result
            .unwrap()
            .history
            .iter()
            .map(|game| game.bet_amount)
            .collect();
        assert_eq!(
            bets,
            (3..=7u64).rev().map(Ether::from_wei).collect::<Vec<_>>()
        );
        assert_eq!(
            remote.slot_reads(),
            vec![1, 0, 4, 3, 2]
        );
    }

    #[tokio::test]
    async fn fetch_snapshot__stops_at_wrong_wallet_chain() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        let request = reconciler
            .begin(SessionGuard {
                chain_id: 1,
                ..guard(1)
            })
            .unwrap();

        // when
        let outcome = fetch_snapshot(&remote, request).await;

        // then
        assert_eq!(
            outcome.result,
            Err(GameError::WrongChain {
                expected: SEPOLIA,
                actual: 1,
            })
        );
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn fetch_snapshot__reports_missing_contract() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.with(|chain| chain.deployed = false);
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        let request = reconciler.begin(guard(1)).unwrap();

        // when
        let outcome = fetch_snapshot(&remote, request).await;

        // then
        assert!(matches!(outcome.result, Err(GameError::RemoteUnreachable(_))));
    }

    #[tokio::test]
    async fn apply__missing_fee_degrades_only_that_field() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.with(|chain| chain.withdraw_fee = None);
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when
        let report = refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert_eq!(
            report,
            RefreshReport::Applied {
                notice: Some(GameError::OptionalFieldUnavailable("withdrawFee"))
            }
        );
        let limits = reconciler.limits().unwrap();
        assert_eq!(limits.minimum_bet, eth("0.01"));
        assert_eq!(limits.withdraw_fee_percent, None);
    }

    #[tokio::test]
    async fn begin__reads_limits_only_once_when_complete() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        let reads = remote
            .calls()
            .into_iter()
            .filter(|call| *call == "minimumBet")
            .count();
        assert_eq!(reads, 1);
    }

    #[tokio::test]
    async fn apply__refresh_started_before_a_write_does_not_clear_its_moves() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        let request = reconciler.begin(guard(1)).unwrap();
        let stale = fetch_snapshot(&remote, request).await;
        // the commit lands after the read above saw no active game
        remote.set_active(account(1), eth("0.05"));
        let mine = MovePair::new(Move::Rock, Move::Paper);
        cache.set_pending(account(1), mine).unwrap();
        reconciler.note_write(account(1));

        // when
        let report = reconciler.apply(stale, true, &cache);

        // then
        assert_eq!(report, RefreshReport::Discarded);
        assert_eq!(cache.pending(account(1)), Some(mine));
        assert!(reconciler.take_queued());

        // and the follow-up refresh sees the game
        let report = refresh(&mut reconciler, &remote, &cache, guard(1)).await;
        assert_eq!(report, RefreshReport::Applied { notice: None });
        assert_eq!(reconciler.view().and_then(|view| view.pending_moves), Some(mine));
    }

    #[tokio::test]
    async fn apply__writes_of_another_account_do_not_discard_the_refresh() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        remote.set_active(account(1), eth("0.05"));
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);
        let request = reconciler.begin(guard(1)).unwrap();
        let outcome = fetch_snapshot(&remote, request).await;
        reconciler.note_write(account(2));

        // when
        let report = reconciler.apply(outcome, true, &cache);

        // then
        assert_eq!(
            report,
            RefreshReport::Applied {
                notice: Some(GameError::CacheInconsistency)
            }
        );
        assert!(!reconciler.take_queued());
    }

    #[tokio::test]
    async fn apply__repeated_refresh_without_writes_is_idempotent() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        for i in 0..3u64 {
            remote.push_history(
                account(1),
                RecentGameRecord {
                    player_move: Move::Paper,
                    opponent_move: Move::Rock,
                    outcome: Outcome::Win,
                    bet_amount: Ether::from_wei(i + 1),
                },
            );
        }
        let cache = GameCache::new(InMemoryStore::new());
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when no game is running
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;
        let view = reconciler.view().copied();
        let history = reconciler.history().to_vec();
        let wallet = reconciler.wallet().copied();
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert_eq!(view, None);
        assert_eq!(history.len(), 3);
        assert_eq!(reconciler.view().copied(), view);
        assert_eq!(reconciler.history().to_vec(), history);
        assert_eq!(reconciler.wallet().copied(), wallet);

        // given a running game with remembered moves
        remote.set_active(account(1), eth("0.05"));
        cache
            .set_pending(account(1), MovePair::new(Move::Scissors, Move::Rock))
            .unwrap();
        cache
            .set_opponent(account(1), MovePair::new(Move::Rock, Move::Paper))
            .unwrap();

        // when
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;
        let view = reconciler.view().copied();
        let history = reconciler.history().to_vec();
        refresh(&mut reconciler, &remote, &cache, guard(1)).await;

        // then
        assert!(view.is_some_and(|view| !view.is_degraded()));
        assert_eq!(reconciler.view().copied(), view);
        assert_eq!(reconciler.history().to_vec(), history);
        assert_eq!(
            cache.pending(account(1)),
            Some(MovePair::new(Move::Scissors, Move::Rock))
        );
    }

    #[test]
    fn begin__queues_a_second_refresh_for_the_same_session() {
        // given
        let mut reconciler = GameStateReconciler::new(SEPOLIA);

        // when
        let first = reconciler.begin(guard(1));
        let second = reconciler.begin(guard(1));
        let newer_session = reconciler.begin(guard(2));

        // then
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(newer_session.is_some());
        assert!(!reconciler.take_queued());
    }
}
