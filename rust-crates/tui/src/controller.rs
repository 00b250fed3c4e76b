use crate::{
    error::{
        Flow,
        GameError,
        StatusMessage,
        status_for,
    },
    model::{
        ActiveGameView,
        GameLimits,
        RecentGameRecord,
        WalletSnapshot,
        bet_is_valid,
        can_withdraw,
    },
    orchestrator::{
        CommitOutcome,
        CommitPlan,
        FlowReport,
        RevealOutcome,
        RevealPlan,
        TransactionOrchestrator,
        WithdrawOutcome,
        WithdrawPlan,
    },
    provider::{
        ProviderEvent,
        Subscription,
        WalletProvider,
    },
    reconciler::{
        GameStateReconciler,
        RefreshOutcome,
        RefreshReport,
        RefreshRequest,
        fetch_snapshot,
    },
    remote::RemoteGame,
    session::{
        SessionChange,
        SessionGuard,
        WalletSession,
        WalletSessionManager,
    },
    store::{
        GameCache,
        KeyValueStore,
    },
};
use ethers::types::Address;
use game_abi::Move;
use tracing::{
    debug,
    warn,
};

const MAX_BET_INPUT_LEN: usize = 24;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub expected_chain: u64,
    pub network_name: String,
}

/// Remote work the controller hands to the run loop.
#[derive(Debug)]
pub enum Task {
    Refresh(RefreshRequest),
    Commit(CommitPlan),
    Reveal(RevealPlan),
    Withdraw(WithdrawPlan),
}

#[derive(Debug)]
pub enum TaskOutcome {
    Refresh(RefreshOutcome),
    Commit(CommitOutcome),
    Reveal(RevealOutcome),
    Withdraw(WithdrawOutcome),
}

pub async fn run_task<R: RemoteGame>(remote: &R, task: Task) -> TaskOutcome {
    match task {
        Task::Refresh(request) => TaskOutcome::Refresh(fetch_snapshot(remote, request).await),
        Task::Commit(plan) => {
            TaskOutcome::Commit(TransactionOrchestrator::execute_commit(remote, plan).await)
        }
        Task::Reveal(plan) => {
            TaskOutcome::Reveal(TransactionOrchestrator::execute_reveal(remote, plan).await)
        }
        Task::Withdraw(plan) => {
            TaskOutcome::Withdraw(TransactionOrchestrator::execute_withdraw(remote, plan).await)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveSelection {
    pub bet_input: String,
    pub first: Option<Move>,
    pub second: Option<Move>,
}

/// Everything the UI needs to draw one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub started: bool,
    pub network: String,
    pub expected_chain: u64,
    pub provider_available: bool,
    pub session: Option<WalletSession>,
    pub wallet: Option<WalletSnapshot>,
    pub limits: Option<GameLimits>,
    pub can_withdraw: bool,
    pub active: Option<ActiveGameView>,
    pub history: Vec<RecentGameRecord>,
    pub show_recent: bool,
    pub bet_input: String,
    pub bet_valid: bool,
    pub first: Option<Move>,
    pub second: Option<Move>,
    pub status: Option<StatusMessage>,
    pub loading: bool,
    pub busy: bool,
}

impl ClientSnapshot {
    pub fn is_wrong_chain(&self) -> bool {
        self.session
            .is_some_and(|session| session.chain_id != self.expected_chain)
    }
}

pub struct GameController<P, R, S> {
    session: WalletSessionManager<P>,
    remote: R,
    cache: GameCache<S>,
    reconciler: GameStateReconciler,
    orchestrator: TransactionOrchestrator,
    selection: MoveSelection,
    status: Option<(Flow, StatusMessage)>,
    network_name: String,
    started: bool,
    show_recent: bool,
}

impl<P, R, S> GameController<P, R, S>
where
    P: WalletProvider,
    R: RemoteGame,
    S: KeyValueStore,
{
    pub fn new(config: ControllerConfig, provider: Option<P>, remote: R, store: S) -> Self {
        let cache = GameCache::new(store);
        let started = cache.started();
        Self {
            session: WalletSessionManager::new(provider, config.expected_chain),
            remote,
            cache,
            reconciler: GameStateReconciler::new(config.expected_chain),
            orchestrator: TransactionOrchestrator::new(
                config.expected_chain,
                config.network_name.clone(),
            ),
            selection: MoveSelection::default(),
            status: None,
            network_name: config.network_name,
            started,
            show_recent: false,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn provider(&self) -> Option<&P> {
        self.session.provider()
    }

    pub fn session(&self) -> Option<WalletSession> {
        self.session.session()
    }

    pub fn cache(&self) -> &GameCache<S> {
        &self.cache
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref().map(|(_, status)| status)
    }

    pub fn subscribe(&self) -> Option<Subscription> {
        self.session.subscribe()
    }

    fn set_status(&mut self, flow: Flow, status: StatusMessage) {
        self.status = Some((flow, status));
    }

    fn report_error(&mut self, flow: Flow, err: &GameError) {
        let status = status_for(flow, err, &self.network_name);
        self.set_status(flow, status);
    }

    /// Restores an already authorized session without prompting.
    pub async fn hydrate(&mut self) -> Option<Task> {
        let previous = self.current_account();
        match self.session.hydrate().await {
            Ok(Some(session)) => {
                self.on_session_change(previous, SessionChange::Established(session))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(?err, "restoring wallet session failed");
                self.report_error(Flow::Connect, &err);
                None
            }
        }
    }

    pub async fn connect(&mut self) -> Option<Task> {
        let previous = self.current_account();
        match self.session.connect().await {
            Ok(session) => {
                self.on_session_change(previous, SessionChange::Established(session))
            }
            Err(err) => {
                warn!(?err, "wallet connection failed");
                self.report_error(Flow::Connect, &err);
                None
            }
        }
    }

    pub async fn handle_provider_event(&mut self, event: ProviderEvent) -> Option<Task> {
        let previous = self.current_account();
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                match self.session.on_accounts_changed(&accounts).await {
                    Ok(change) => self.on_session_change(previous, change),
                    Err(err) => {
                        warn!(?err, "handling account change failed");
                        self.report_error(Flow::Connect, &err);
                        None
                    }
                }
            }
            ProviderEvent::ChainChanged(chain_id) => {
                match self.session.on_chain_changed(chain_id).await {
                    Ok(change) => self.on_session_change(previous, change),
                    Err(err) => {
                        warn!(?err, "handling chain change failed");
                        self.report_error(Flow::Connect, &err);
                        None
                    }
                }
            }
        }
    }

    fn current_account(&self) -> Option<Address> {
        self.session.session().map(|session| session.account)
    }

    fn on_session_change(
        &mut self,
        previous: Option<Address>,
        change: SessionChange,
    ) -> Option<Task> {
        match change {
            SessionChange::Cleared => {
                self.forget_account();
                None
            }
            SessionChange::Established(session) => {
                if previous != Some(session.account) {
                    self.forget_account();
                }
                self.refresh()
            }
        }
    }

    fn forget_account(&mut self) {
        self.reconciler.reset();
        self.selection = MoveSelection::default();
        self.status = None;
    }

    /// Requests an authoritative refresh. Coalesces with one already running.
    pub fn refresh(&mut self) -> Option<Task> {
        let guard = self.session.guard()?;
        self.reconciler.begin(guard).map(Task::Refresh)
    }

    pub fn set_bet_input(&mut self, input: impl Into<String>) {
        self.selection.bet_input = input.into();
    }

    /// Accepts digits and a single decimal point.
    pub fn push_bet_char(&mut self, c: char) {
        let input = &mut self.selection.bet_input;
        if input.len() >= MAX_BET_INPUT_LEN {
            return;
        }
        if c.is_ascii_digit() || (c == '.' && !input.contains('.')) {
            input.push(c);
        }
    }

    pub fn pop_bet_char(&mut self) {
        self.selection.bet_input.pop();
    }

    pub fn select_first(&mut self, choice: Option<Move>) {
        self.selection.first = choice;
    }

    pub fn select_second(&mut self, choice: Option<Move>) {
        self.selection.second = choice;
    }

    pub fn cycle_first(&mut self) {
        self.selection.first = Some(self.selection.first.map_or(Move::Rock, Move::next));
    }

    pub fn cycle_second(&mut self) {
        self.selection.second = Some(self.selection.second.map_or(Move::Rock, Move::next));
    }

    pub fn toggle_recent(&mut self) {
        self.show_recent = !self.show_recent;
    }

    pub fn enter_game(&mut self) {
        self.started = true;
        if let Err(err) = self.cache.set_started(true) {
            warn!(?err, "failed to remember started flag");
        }
    }

    pub fn leave_game(&mut self) {
        self.started = false;
        if let Err(err) = self.cache.set_started(false) {
            warn!(?err, "failed to clear started flag");
        }
    }

    fn require_session(&mut self) -> Option<SessionGuard> {
        let guard = self.session.guard();
        if guard.is_none() {
            self.set_status(Flow::Connect, StatusMessage::error("Connect a wallet first"));
        }
        guard
    }

    pub fn start_game(&mut self) -> Option<Task> {
        let guard = self.require_session()?;
        let prepared = self.orchestrator.prepare_commit(
            guard,
            &self.selection.bet_input,
            self.selection.first,
            self.selection.second,
            self.reconciler.limits(),
            self.reconciler.view(),
        );
        match prepared {
            Ok(plan) => {
                self.set_status(Flow::Commit, StatusMessage::info("Starting game..."));
                Some(Task::Commit(plan))
            }
            Err(err) => {
                debug!(?err, "start game rejected");
                self.report_error(Flow::Commit, &err);
                None
            }
        }
    }

    pub fn finish_game(&mut self, move_index: u8) -> Option<Task> {
        let guard = self.require_session()?;
        match self
            .orchestrator
            .prepare_reveal(guard, move_index, self.reconciler.view())
        {
            Ok(plan) => {
                self.set_status(Flow::Reveal, StatusMessage::info("Finishing game..."));
                Some(Task::Reveal(plan))
            }
            Err(err) => {
                debug!(?err, "finish game rejected");
                self.report_error(Flow::Reveal, &err);
                None
            }
        }
    }

    pub fn withdraw(&mut self) -> Option<Task> {
        let guard = self.require_session()?;
        match self.orchestrator.prepare_withdraw(
            guard,
            self.reconciler.wallet(),
            self.reconciler.limits(),
        ) {
            Ok(plan) => {
                self.set_status(
                    Flow::Withdraw,
                    StatusMessage::info("Withdrawing rewards..."),
                );
                Some(Task::Withdraw(plan))
            }
            Err(err) => {
                debug!(?err, "withdraw rejected");
                self.report_error(Flow::Withdraw, &err);
                None
            }
        }
    }

    /// Folds a finished task back into the view. May hand back a follow-up.
    pub fn complete(&mut self, outcome: TaskOutcome) -> Option<Task> {
        match outcome {
            TaskOutcome::Refresh(outcome) => {
                let current = self.session.is_current(&outcome.guard);
                match self.reconciler.apply(outcome, current, &self.cache) {
                    RefreshReport::Discarded => {}
                    RefreshReport::Applied { notice: Some(notice) } => {
                        self.report_error(Flow::Refresh, &notice)
                    }
                    RefreshReport::Applied { notice: None } => {
                        if matches!(self.status, Some((Flow::Refresh | Flow::Connect, _))) {
                            self.status = None;
                        }
                    }
                    RefreshReport::Failed(err) => self.report_error(Flow::Refresh, &err),
                }
                if self.reconciler.take_queued() {
                    self.refresh()
                } else {
                    None
                }
            }
            TaskOutcome::Commit(outcome) => {
                self.reconciler.note_write(outcome.plan.guard.account);
                let current = self.session.is_current(&outcome.plan.guard);
                let report = self
                    .orchestrator
                    .finish_commit(outcome, current, &self.cache);
                self.apply_flow_report(Flow::Commit, report)
            }
            TaskOutcome::Reveal(outcome) => {
                self.reconciler.note_write(outcome.plan.guard.account);
                let current = self.session.is_current(&outcome.plan.guard);
                let report = self
                    .orchestrator
                    .finish_reveal(outcome, current, &self.cache);
                self.apply_flow_report(Flow::Reveal, report)
            }
            TaskOutcome::Withdraw(outcome) => {
                self.reconciler.note_write(outcome.plan.guard.account);
                let current = self.session.is_current(&outcome.plan.guard);
                let report = self.orchestrator.finish_withdraw(outcome, current);
                self.apply_flow_report(Flow::Withdraw, report)
            }
        }
    }

    fn apply_flow_report(&mut self, flow: Flow, report: FlowReport) -> Option<Task> {
        if let Some(status) = report.status {
            self.set_status(flow, status);
        }
        if report.clear_selection {
            self.selection = MoveSelection::default();
        }
        if report.refresh { self.refresh() } else { None }
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        let limits = self.reconciler.limits().copied();
        let wallet = self.reconciler.wallet().copied();
        let session = self.session.session();
        ClientSnapshot {
            started: self.started,
            network: self.network_name.clone(),
            expected_chain: self.session.expected_chain(),
            provider_available: self.session.provider().is_some(),
            session,
            wallet,
            limits,
            can_withdraw: match (wallet, limits) {
                (Some(wallet), Some(limits)) => {
                    can_withdraw(wallet.rewards, limits.withdraw_threshold)
                }
                _ => false,
            },
            active: self.reconciler.view().copied(),
            history: self.reconciler.history().to_vec(),
            show_recent: self.show_recent,
            bet_input: self.selection.bet_input.clone(),
            bet_valid: bet_is_valid(&self.selection.bet_input, limits.as_ref()),
            first: self.selection.first,
            second: self.selection.second,
            status: self.status().cloned(),
            loading: self.reconciler.is_loading(),
            busy: session.is_some_and(|session| self.orchestrator.is_busy(session.account)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        store::InMemoryStore,
        test_helpers::{
            FakeProvider,
            FakeRemote,
            SEPOLIA,
            account,
            settle,
        },
    };

    type Controller = GameController<FakeProvider, FakeRemote, InMemoryStore>;

    fn controller(provider: FakeProvider, remote: FakeRemote) -> Controller {
        GameController::new(
            ControllerConfig {
                expected_chain: SEPOLIA,
                network_name: "Sepolia".to_string(),
            },
            Some(provider),
            remote,
            InMemoryStore::new(),
        )
    }

    #[test]
    fn push_bet_char__accepts_one_decimal_point() {
        // given
        let mut controller = controller(
            FakeProvider::new(vec![account(1)], SEPOLIA),
            FakeRemote::new(SEPOLIA),
        );

        // when
        for c in "0.0.5x".chars() {
            controller.push_bet_char(c);
        }

        // then
        assert_eq!(controller.snapshot().bet_input, "0.05");
    }

    #[test]
    fn pop_bet_char__edits_a_capped_input() {
        // given
        let mut controller = controller(
            FakeProvider::new(vec![account(1)], SEPOLIA),
            FakeRemote::new(SEPOLIA),
        );
        for _ in 0..MAX_BET_INPUT_LEN + 4 {
            controller.push_bet_char('1');
        }
        assert_eq!(controller.snapshot().bet_input.len(), MAX_BET_INPUT_LEN);

        // when
        controller.pop_bet_char();
        controller.push_bet_char('.');
        controller.push_bet_char('5');

        // then
        let input = controller.snapshot().bet_input;
        assert_eq!(input.len(), MAX_BET_INPUT_LEN);
        assert!(input.ends_with('.'));
    }

    #[test]
    fn cycle_first__walks_through_moves() {
        let mut controller = controller(
            FakeProvider::new(vec![account(1)], SEPOLIA),
            FakeRemote::new(SEPOLIA),
        );
        controller.cycle_first();
        assert_eq!(controller.snapshot().first, Some(Move::Rock));
        controller.cycle_first();
        assert_eq!(controller.snapshot().first, Some(Move::Paper));
    }

    #[test]
    fn start_game__requires_a_session() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        let mut controller = controller(
            FakeProvider::new(vec![account(1)], SEPOLIA),
            remote.clone(),
        );

        // when
        let task = controller.start_game();

        // then
        assert!(task.is_none());
        assert_eq!(
            controller.status(),
            Some(&StatusMessage::error("Connect a wallet first"))
        );
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn hydrate__loads_view_for_authorized_account() {
        // given
        let remote = FakeRemote::new(SEPOLIA);
        let mut controller = controller(
            FakeProvider::authorized(vec![account(1)], SEPOLIA),
            remote,
        );

        // when
        let task = controller.hydrate().await;
        settle(&mut controller, task).await;

        // then
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.session.map(|s| s.account), Some(account(1)));
        assert!(snapshot.limits.is_some());
        assert!(!snapshot.loading);
        assert_eq!(snapshot.status, None);
    }

    #[tokio::test]
    async fn connect__reports_rejection_in_status() {
        // given
        let provider = FakeProvider::new(vec![account(1)], SEPOLIA);
        provider.reject_requests(true);
        let mut controller = controller(provider, FakeRemote::new(SEPOLIA));

        // when
        let task = controller.connect().await;

        // then
        assert!(task.is_none());
        assert_eq!(
            controller.status(),
            Some(&StatusMessage::error(
                "Wallet connection failed. Please try again."
            ))
        );
    }

    #[test]
    fn enter_game__persists_started_flag() {
        // given
        let store = InMemoryStore::new();
        let mut controller: Controller = GameController::new(
            ControllerConfig {
                expected_chain: SEPOLIA,
                network_name: "Sepolia".to_string(),
            },
            None,
            FakeRemote::new(SEPOLIA),
            store.clone(),
        );

        // when
        controller.enter_game();
        let reopened: Controller = GameController::new(
            ControllerConfig {
                expected_chain: SEPOLIA,
                network_name: "Sepolia".to_string(),
            },
            None,
            FakeRemote::new(SEPOLIA),
            store,
        );

        // then
        assert!(reopened.snapshot().started);
    }
}
