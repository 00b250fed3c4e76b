#![allow(non_snake_case)]

use rps_client::{
    Move,
    MovePair,
    controller::{
        ControllerConfig,
        GameController,
    },
    error::StatusMessage,
    model::Ether,
    store::InMemoryStore,
    test_helpers::{
        FakeProvider,
        FakeRemote,
        MAINNET,
        SEPOLIA,
        account,
        settle,
    },
};

type Controller = GameController<FakeProvider, FakeRemote, InMemoryStore>;

fn controller(provider: Option<FakeProvider>, remote: &FakeRemote) -> Controller {
    GameController::new(
        ControllerConfig {
            expected_chain: SEPOLIA,
            network_name: "Sepolia".to_string(),
        },
        provider,
        remote.clone(),
        InMemoryStore::new(),
    )
}

#[tokio::test]
async fn connect__moves_the_wallet_to_the_expected_network() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let provider = FakeProvider::new(vec![account(1)], MAINNET);
    let mut controller = controller(Some(provider.clone()), &remote);

    // when
    let task = controller.connect().await;
    settle(&mut controller, task).await;

    // then
    assert_eq!(provider.prompt_count(), 1);
    assert_eq!(provider.current_chain(), SEPOLIA);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.session.map(|s| s.chain_id), Some(SEPOLIA));
    assert!(snapshot.limits.is_some());
    assert_eq!(snapshot.status, None);
}

#[tokio::test]
async fn connect__refused_network_switch_leaves_the_session_unset() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let provider = FakeProvider::new(vec![account(1)], MAINNET);
    provider.fail_chain_switch(true);
    let mut controller = controller(Some(provider), &remote);

    // when
    let task = controller.connect().await;

    // then
    assert!(task.is_none());
    assert_eq!(controller.session(), None);
    assert_eq!(
        controller.status(),
        Some(&StatusMessage::error(
            "Please switch your wallet network to Sepolia."
        ))
    );
}

#[tokio::test]
async fn connect__without_a_wallet_explains_how_to_add_one() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let mut controller = controller(None, &remote);

    // when
    let task = controller.connect().await;

    // then
    assert!(task.is_none());
    assert!(!controller.snapshot().provider_available);
    assert!(
        controller
            .status()
            .unwrap()
            .text
            .starts_with("No wallet provider found")
    );
}

#[tokio::test]
async fn hydrate__does_not_prompt_an_unauthorized_wallet() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let provider = FakeProvider::new(vec![account(1)], SEPOLIA);
    let mut controller = controller(Some(provider.clone()), &remote);

    // when
    let task = controller.hydrate().await;

    // then
    assert!(task.is_none());
    assert_eq!(provider.prompt_count(), 0);
    assert_eq!(controller.session(), None);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn disconnect__clears_the_view_but_keeps_remembered_moves() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    remote.set_active(account(1), Ether::parse("0.05").unwrap());
    let provider = FakeProvider::authorized(vec![account(1)], SEPOLIA);
    let mut controller = controller(Some(provider.clone()), &remote);
    let pending = MovePair::new(Move::Paper, Move::Rock);
    controller.cache().set_pending(account(1), pending).unwrap();
    let mut events = controller.subscribe().unwrap();
    let task = controller.hydrate().await;
    settle(&mut controller, task).await;
    assert!(controller.snapshot().active.is_some());

    // when
    provider.set_accounts(Vec::new());
    let event = events.try_next().unwrap();
    let task = controller.handle_provider_event(event).await;

    // then
    assert!(task.is_none());
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.session, None);
    assert_eq!(snapshot.active, None);
    assert_eq!(snapshot.wallet, None);
    assert!(snapshot.history.is_empty());
    assert_eq!(controller.cache().pending(account(1)), Some(pending));

    // and reconnecting picks the game up again
    provider.set_accounts(vec![account(1)]);
    let event = events.try_next().unwrap();
    let task = controller.handle_provider_event(event).await;
    settle(&mut controller, task).await;
    let active = controller.snapshot().active.unwrap();
    assert_eq!(active.pending_moves, Some(pending));
}

#[tokio::test]
async fn reconnect__on_another_network_asks_for_a_switch() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let provider = FakeProvider::authorized(vec![account(1)], SEPOLIA);
    let mut controller = controller(Some(provider.clone()), &remote);
    let mut events = controller.subscribe().unwrap();
    let task = controller.hydrate().await;
    settle(&mut controller, task).await;
    provider.set_accounts(Vec::new());
    let event = events.try_next().unwrap();
    controller.handle_provider_event(event).await;
    provider.set_chain(MAINNET);
    let event = events.try_next().unwrap();
    controller.handle_provider_event(event).await;
    let calls_before = remote.calls().len();

    // when
    provider.set_accounts(vec![account(1)]);
    let event = events.try_next().unwrap();
    let task = controller.handle_provider_event(event).await;
    settle(&mut controller, task).await;

    // then
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.session.map(|s| s.chain_id), Some(MAINNET));
    assert!(snapshot.is_wrong_chain());
    assert_eq!(
        snapshot.status,
        Some(StatusMessage::error(
            "Please switch your wallet network to Sepolia."
        ))
    );
    assert_eq!(remote.calls().len(), calls_before);
}

#[tokio::test]
async fn account_change__resets_the_move_selection() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let provider = FakeProvider::authorized(vec![account(1), account(2)], SEPOLIA);
    let mut controller = controller(Some(provider.clone()), &remote);
    let mut events = controller.subscribe().unwrap();
    let task = controller.hydrate().await;
    settle(&mut controller, task).await;
    controller.set_bet_input("0.05");
    controller.select_first(Some(Move::Rock));

    // when
    provider.set_accounts(vec![account(2)]);
    let event = events.try_next().unwrap();
    let task = controller.handle_provider_event(event).await;
    settle(&mut controller, task).await;

    // then
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.session.map(|s| s.account), Some(account(2)));
    assert_eq!(snapshot.bet_input, "");
    assert_eq!(snapshot.first, None);
}

#[test]
fn subscribe__dropping_the_subscription_unregisters_it() {
    // given
    let remote = FakeRemote::new(SEPOLIA);
    let provider = FakeProvider::authorized(vec![account(1)], SEPOLIA);
    let controller = controller(Some(provider.clone()), &remote);

    // when
    let subscription = controller.subscribe().unwrap();
    let registered = provider.subscriber_count();
    drop(subscription);

    // then
    assert_eq!(registered, 1);
    assert_eq!(provider.subscriber_count(), 0);
}
