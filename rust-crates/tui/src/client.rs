use crate::ui::{
    self,
    UserEvent,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
    compute_code_hash,
    record_deployment,
};
use ethers::{
    signers::LocalWallet,
    types::Address,
};
use futures::{
    FutureExt,
    StreamExt,
    future::LocalBoxFuture,
    stream::FuturesUnordered,
};
use rps_client::{
    controller::{
        ControllerConfig,
        GameController,
        Task,
        TaskOutcome,
        run_task,
    },
    evm::EvmGameClient,
    provider::{
        ProviderEvent,
        Subscription,
    },
    remote::RemoteGame,
    store::SledStore,
    wallets::{
        self,
        KeystoreProvider,
    },
};
use std::path::PathBuf;
use tracing::{
    info,
    warn,
};

type Controller = GameController<KeystoreProvider, EvmGameClient, SledStore>;
type PendingTasks = FuturesUnordered<LocalBoxFuture<'static, TaskOutcome>>;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: DeploymentEnv,
    pub rpc_url: String,
    pub wallet_names: Vec<String>,
    pub wallet_dir: Option<String>,
    pub store_dir: PathBuf,
}

/// Records the contract at `address` as the deployment for the configured network.
pub async fn register(config: &AppConfig, address: &str, block: Option<u64>) -> Result<()> {
    let contract: Address = address
        .parse()
        .wrap_err_with(|| format!("'{address}' is not a contract address"))?;
    let remote = EvmGameClient::new(
        &config.rpc_url,
        contract,
        config.env.chain_id(),
        Vec::new(),
    )?;
    let chain_id = remote
        .chain_id()
        .await
        .wrap_err("Failed to read chain id")?;
    if chain_id != config.env.chain_id() {
        warn!(
            chain_id,
            expected = config.env.chain_id(),
            "node reports an unexpected chain id"
        );
    }
    let code = remote
        .runtime_code()
        .await
        .wrap_err("Failed to read contract code")?;
    if code.is_empty() {
        return Err(eyre!("No contract code at {address} on {}", config.env));
    }

    let store = DeploymentStore::new(config.env).map_err(|e| eyre!(e))?;
    let record = record_deployment(
        &store,
        format!("{contract:#x}"),
        chain_id,
        compute_code_hash(&code),
        &config.rpc_url,
        block,
    )
    .map_err(|e| eyre!(e))?;
    info!(address = %record.contract_address, chain_id, "deployment recorded");
    println!(
        "Recorded {} deployment {} in {}",
        config.env,
        record.contract_address,
        store.path().display()
    );
    Ok(())
}

fn missing_deployment(env: DeploymentEnv, store: &DeploymentStore) -> color_eyre::eyre::Report {
    let flag = env.dir_name();
    eyre!(
        "No deployment recorded for {env} in {}.\n\nRecord one with:\n  rps-tui --{flag} register --address <contract address>",
        store.path().display()
    )
}

fn unlock_wallets(config: &AppConfig) -> Result<Vec<LocalWallet>> {
    if config.wallet_names.is_empty() {
        warn!("no --wallet given, starting without a wallet provider");
        return Ok(Vec::new());
    }
    let dir = wallets::resolve_wallet_dir(config.wallet_dir.as_deref())?;
    config
        .wallet_names
        .iter()
        .map(|name| {
            let descriptor = wallets::find_wallet(&dir, name)?;
            wallets::unlock_wallet(&descriptor)
        })
        .collect()
}

async fn check_code_hash(remote: &EvmGameClient, record: &DeploymentRecord) {
    match remote.runtime_code().await {
        Ok(code) if code.is_empty() => {
            warn!(address = %record.contract_address, "no contract code at recorded address");
        }
        Ok(code) => {
            let hash = compute_code_hash(&code);
            if !record.is_compatible_with_hash(&hash) {
                warn!(
                    recorded = %record.code_hash,
                    deployed = %hash,
                    "deployed code differs from the recorded deployment"
                );
            }
        }
        Err(err) => warn!(?err, "could not read deployed code"),
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let deployments = DeploymentStore::new(config.env).map_err(|e| eyre!(e))?;
    let record = deployments
        .load()
        .map_err(|e| eyre!(e))?
        .ok_or_else(|| missing_deployment(config.env, &deployments))?;
    let contract: Address = record
        .contract_address
        .parse()
        .wrap_err("Deployment record holds an invalid contract address")?;
    let expected_chain = record.chain_id;
    let network_name = DeploymentEnv::from_chain_id(expected_chain)
        .map(|env| env.to_string())
        .unwrap_or_else(|| format!("chain {expected_chain}"));

    // Password prompts need the plain terminal, so unlock before the UI starts.
    let unlocked = unlock_wallets(&config)?;
    let known_chains: Vec<u64> = DeploymentEnv::ALL.iter().map(|env| env.chain_id()).collect();
    let provider = (!unlocked.is_empty())
        .then(|| KeystoreProvider::from_wallets(&unlocked, expected_chain, known_chains));
    let remote = EvmGameClient::new(&config.rpc_url, contract, expected_chain, unlocked)?;
    check_code_hash(&remote, &record).await;
    let store = SledStore::open(&config.store_dir).wrap_err("Failed to open local store")?;

    let controller = GameController::new(
        ControllerConfig {
            expected_chain,
            network_name,
        },
        provider,
        remote,
        store,
    );
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!(contract = %format!("{contract:#x}"), expected_chain, "starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(controller, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

fn schedule(tasks: &mut PendingTasks, remote: &EvmGameClient, task: Option<Task>) {
    if let Some(task) = task {
        let remote = remote.clone();
        tasks.push(async move { run_task(&remote, task).await }.boxed_local());
    }
}

async fn next_provider_event(subscription: &mut Option<Subscription>) -> Option<ProviderEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn run_loop(
    mut controller: Controller,
    ui_state: &mut ui::UiState,
    input_events: &mut crossterm::event::EventStream,
) -> Result<()> {
    let remote = controller.remote().clone();
    let provider = controller.provider().cloned();
    let mut subscription = controller.subscribe();
    let mut tasks = PendingTasks::new();

    let hydrated = controller.hydrate().await;
    schedule(&mut tasks, &remote, hydrated);
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            Some(outcome) = tasks.next(), if !tasks.is_empty() => {
                let follow_up = controller.complete(outcome);
                schedule(&mut tasks, &remote, follow_up);
            }
            Some(event) = next_provider_event(&mut subscription) => {
                let task = controller.handle_provider_event(event).await;
                schedule(&mut tasks, &remote, task);
            }
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event, &controller.snapshot()) else {
                    continue;
                };
                let task = match ev {
                    UserEvent::Quit => break,
                    UserEvent::Redraw => None,
                    UserEvent::EnterGame => {
                        controller.enter_game();
                        None
                    }
                    UserEvent::LeaveGame => {
                        controller.leave_game();
                        None
                    }
                    UserEvent::Connect => controller.connect().await,
                    UserEvent::Refresh => controller.refresh(),
                    UserEvent::NextAccount => {
                        if let Some(provider) = &provider {
                            provider.next_account();
                        }
                        None
                    }
                    UserEvent::Disconnect => {
                        if let Some(provider) = &provider {
                            provider.disconnect();
                        }
                        None
                    }
                    UserEvent::CycleNetwork => {
                        if let Some(provider) = &provider {
                            provider.cycle_network();
                        }
                        None
                    }
                    UserEvent::SetBet(input) => {
                        controller.set_bet_input(input);
                        None
                    }
                    UserEvent::BetChar(c) => {
                        controller.push_bet_char(c);
                        None
                    }
                    UserEvent::BetBackspace => {
                        controller.pop_bet_char();
                        None
                    }
                    UserEvent::CycleFirst => {
                        controller.cycle_first();
                        None
                    }
                    UserEvent::CycleSecond => {
                        controller.cycle_second();
                        None
                    }
                    UserEvent::StartGame => controller.start_game(),
                    UserEvent::FinishGame(index) => controller.finish_game(index),
                    UserEvent::Withdraw => controller.withdraw(),
                    UserEvent::ToggleRecent => {
                        controller.toggle_recent();
                        None
                    }
                };
                schedule(&mut tasks, &remote, task);
            }
        }
        ui::draw(ui_state, &controller.snapshot()).wrap_err("draw failed")?;
    }
    info!("leaving UI");
    Ok(())
}
